//! Data models for TubeSage.

mod channel;
mod chat;
mod chunk;
mod queue;
mod user;
mod video;

pub use channel::{Channel, ChannelStatus};
pub use chat::{ChatMessage, ChatSession, Citation, MessageRole};
pub use chunk::TranscriptChunk;
pub use queue::{ChannelQueueItem, QueuePriority, QueueStatus};
pub use user::{RequestUser, UserClass};
pub use video::Video;
