//! Streaming chat orchestrator.
//!
//! Builds retrieval-grounded context, streams model output to a sink,
//! extracts citations from the finished response, and persists both turns.
//! Client disconnect is observed between deltas; a cancelled stream is
//! abandoned server-side with no persistence for that turn.

pub mod prompts;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{Cache, DEFAULT_TTL};
use crate::chunker::truncate_chars;
use crate::error_sink::ErrorSink;
use crate::llm::{ChatModel, ChatTurn};
use crate::models::{Channel, ChatSession, Citation, MessageRole, RequestUser, Video};
use crate::repository::{ChannelRepository, ChatRepository, VideoRepository};
use crate::search::{RetrievalEngine, SearchHit};

/// Chunks retrieved per chat turn.
const RETRIEVAL_K: usize = 10;

/// Session titles derive from the first user message, truncated here.
const SESSION_TITLE_CHARS: usize = 80;

/// One SSE frame of the chat stream grammar.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatFrame {
    Content(String),
    Done(Vec<Citation>),
    Error(String),
}

impl ChatFrame {
    /// The frame's wire JSON.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ChatFrame::Content(content) => serde_json::json!({
                "type": "content",
                "content": content,
                "done": false,
            }),
            ChatFrame::Done(citations) => serde_json::json!({
                "type": "done",
                "citations": citations,
                "done": true,
            }),
            ChatFrame::Error(message) => serde_json::json!({
                "type": "error",
                "error": message,
            }),
        }
    }
}

/// Capability the transport hands the orchestrator for one stream.
#[async_trait]
pub trait ChatSink: Send + Sync {
    /// Deliver one frame. Returns false when the client is gone.
    async fn write_frame(&self, frame: &ChatFrame) -> bool;

    /// Whether the transport has observed a disconnect.
    fn is_cancelled(&self) -> bool;

    async fn close(&self);
}

/// Terminal state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Active,
    Completed,
    Cancelled,
    Errored,
}

/// In-process registry of live streams.
#[derive(Clone, Default)]
pub struct StreamRegistry {
    inner: Arc<RwLock<HashMap<String, StreamState>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, stream_id: &str) {
        self.inner
            .write()
            .await
            .insert(stream_id.to_string(), StreamState::Active);
    }

    pub async fn is_active(&self, stream_id: &str) -> bool {
        matches!(
            self.inner.read().await.get(stream_id),
            Some(StreamState::Active)
        )
    }

    /// Flip an active stream to cancelled (client disconnect).
    pub async fn cancel(&self, stream_id: &str) {
        let mut inner = self.inner.write().await;
        if inner.get(stream_id) == Some(&StreamState::Active) {
            inner.insert(stream_id.to_string(), StreamState::Cancelled);
        }
    }

    /// Record the terminal state and drop the entry.
    pub async fn finish(&self, stream_id: &str, state: StreamState) {
        debug!("stream {} finished as {:?}", stream_id, state);
        self.inner.write().await.remove(stream_id);
    }

    pub async fn active_count(&self) -> usize {
        self.inner
            .read()
            .await
            .values()
            .filter(|s| **s == StreamState::Active)
            .count()
    }
}

/// Cached chat answer: response text plus its citations.
#[derive(Debug, Serialize, Deserialize)]
struct CachedAnswer {
    response: String,
    citations: Vec<Citation>,
}

enum ChatTarget {
    Video(Video),
    Channel(Channel),
}

impl ChatTarget {
    fn cache_prefix(&self) -> &'static str {
        match self {
            ChatTarget::Video(_) => "video_chat",
            ChatTarget::Channel(_) => "channel_chat",
        }
    }

    fn external_id(&self) -> &str {
        match self {
            ChatTarget::Video(v) => &v.external_id,
            ChatTarget::Channel(c) => &c.external_id,
        }
    }
}

/// Orchestrates one chat turn per call: retrieve, prompt, stream, persist.
#[derive(Clone)]
pub struct ChatOrchestrator {
    search: RetrievalEngine,
    llm: Arc<dyn ChatModel>,
    chat: Arc<ChatRepository>,
    videos: Arc<VideoRepository>,
    channels: Arc<ChannelRepository>,
    cache: Cache,
    registry: StreamRegistry,
    errors: ErrorSink,
}

impl ChatOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        search: RetrievalEngine,
        llm: Arc<dyn ChatModel>,
        chat: ChatRepository,
        videos: VideoRepository,
        channels: ChannelRepository,
        cache: Cache,
        registry: StreamRegistry,
        errors: ErrorSink,
    ) -> Self {
        Self {
            search,
            llm,
            chat: Arc::new(chat),
            videos: Arc::new(videos),
            channels: Arc::new(channels),
            cache,
            registry,
            errors,
        }
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    /// Stream a chat turn grounded in one video.
    pub async fn stream_video_chat(
        &self,
        messages: &[ChatTurn],
        video_external_id: &str,
        session_id: Option<String>,
        user: &RequestUser,
        sink: &dyn ChatSink,
    ) {
        let video = match self.videos.get_by_external_id(video_external_id).await {
            Ok(Some(video)) => video,
            Ok(None) => {
                sink.write_frame(&ChatFrame::Error(format!(
                    "video {} not found",
                    video_external_id
                )))
                .await;
                sink.close().await;
                return;
            }
            Err(e) => {
                self.fail_early(sink, "store", &e.to_string()).await;
                return;
            }
        };
        self.run(messages, ChatTarget::Video(video), session_id, user, sink)
            .await;
    }

    /// Stream a chat turn grounded in a whole channel.
    pub async fn stream_channel_chat(
        &self,
        messages: &[ChatTurn],
        channel_external_id: &str,
        session_id: Option<String>,
        user: &RequestUser,
        sink: &dyn ChatSink,
    ) {
        let channel = match self.channels.get_by_external_id(channel_external_id).await {
            Ok(Some(channel)) => channel,
            Ok(None) => {
                sink.write_frame(&ChatFrame::Error(format!(
                    "channel {} not found",
                    channel_external_id
                )))
                .await;
                sink.close().await;
                return;
            }
            Err(e) => {
                self.fail_early(sink, "store", &e.to_string()).await;
                return;
            }
        };
        self.run(messages, ChatTarget::Channel(channel), session_id, user, sink)
            .await;
    }

    async fn run(
        &self,
        messages: &[ChatTurn],
        target: ChatTarget,
        session_id: Option<String>,
        user: &RequestUser,
        sink: &dyn ChatSink,
    ) {
        // 1. The last user message anchors retrieval and caching
        let Some(last_user) = messages.iter().rev().find(|m| m.role == "user") else {
            sink.write_frame(&ChatFrame::Done(Vec::new())).await;
            sink.close().await;
            return;
        };
        let question = last_user.content.clone();

        let stream_id = Uuid::new_v4().to_string();
        self.registry.register(&stream_id).await;

        // 2. Cache probe on (target, question)
        let cache_key = Cache::key(target.cache_prefix(), &[target.external_id(), &question]);
        if let Some(cached) = self.cache.get(&cache_key).await {
            if let Ok(answer) = serde_json::from_str::<CachedAnswer>(&cached) {
                debug!("chat cache hit for {}", target.external_id());
                sink.write_frame(&ChatFrame::Content(answer.response.clone()))
                    .await;
                self.persist_turn(&target, session_id, user, &question, &answer.response, &answer.citations)
                    .await;
                sink.write_frame(&ChatFrame::Done(answer.citations)).await;
                sink.close().await;
                self.registry.finish(&stream_id, StreamState::Completed).await;
                return;
            }
        }

        // 3. Retrieve context
        let hits = match &target {
            ChatTarget::Video(video) => self.search.video_search(video, &question, RETRIEVAL_K).await,
            ChatTarget::Channel(channel) => {
                self.search.channel_search(channel, &question, RETRIEVAL_K).await
            }
        };
        let hits = match hits {
            Ok(hits) => hits,
            Err(e) => {
                self.registry.finish(&stream_id, StreamState::Errored).await;
                self.fail_early(sink, "retrieval", &e.to_string()).await;
                return;
            }
        };

        let context_citations: Vec<Citation> = hits
            .iter()
            .map(|hit| Citation::Context {
                video_id: hit.video_external_id.clone(),
                video_title: Some(hit.video_title.clone()),
                start_time: hit.start_time,
                end_time: hit.end_time,
                text: truncate_chars(&hit.text, 200),
            })
            .collect();

        // 4. Compose the system prompt
        let system = self.system_prompt(&target, &hits);

        // 5. Stream the completion
        let mut deltas = match self.llm.stream_completion(&system, messages).await {
            Ok(stream) => stream,
            Err(e) => {
                self.registry.finish(&stream_id, StreamState::Errored).await;
                self.errors
                    .capture(
                        "upstream_llm",
                        &e.to_string(),
                        None,
                        serde_json::json!({ "target": target.external_id() }),
                    )
                    .await;
                self.fail_early(sink, "llm", &e.to_string()).await;
                return;
            }
        };

        let mut response = String::new();
        while let Some(delta) = deltas.next().await {
            // 6. Cancellation wins over any pending delta
            if sink.is_cancelled() || !self.registry.is_active(&stream_id).await {
                info!("stream {} cancelled by client", stream_id);
                drop(deltas);
                self.registry.finish(&stream_id, StreamState::Cancelled).await;
                sink.close().await;
                return;
            }

            match delta {
                Ok(content) => {
                    response.push_str(&content);
                    if !sink.write_frame(&ChatFrame::Content(content)).await {
                        info!("stream {} sink closed mid-stream", stream_id);
                        drop(deltas);
                        self.registry.finish(&stream_id, StreamState::Cancelled).await;
                        return;
                    }
                }
                Err(e) => {
                    warn!("stream {} upstream error: {}", stream_id, e);
                    self.registry.finish(&stream_id, StreamState::Errored).await;
                    self.errors
                        .capture(
                            "upstream_llm",
                            &e.to_string(),
                            None,
                            serde_json::json!({ "streamId": stream_id }),
                        )
                        .await;
                    sink.write_frame(&ChatFrame::Error(e.to_string())).await;
                    sink.close().await;
                    return;
                }
            }
        }

        // 7. Citations: context first, then timestamps scraped from the answer
        let mut citations = context_citations;
        citations.extend(extract_citations(&response));

        // 8. Persist both turns
        self.persist_turn(&target, session_id, user, &question, &response, &citations)
            .await;

        let answer = CachedAnswer {
            response,
            citations: citations.clone(),
        };
        if let Ok(serialized) = serde_json::to_string(&answer) {
            self.cache.set(&cache_key, &serialized, DEFAULT_TTL).await;
        }

        // 9. Terminal frame
        sink.write_frame(&ChatFrame::Done(citations)).await;
        sink.close().await;
        self.registry.finish(&stream_id, StreamState::Completed).await;
    }

    fn system_prompt(&self, target: &ChatTarget, hits: &[SearchHit]) -> String {
        match target {
            ChatTarget::Video(video) => {
                let context = if hits.is_empty() {
                    prompts::degenerate_context(&video.title, &video.description)
                } else {
                    prompts::build_video_context(hits)
                };
                prompts::video_system_prompt(&video.title, &context)
            }
            ChatTarget::Channel(channel) => {
                let context = if hits.is_empty() {
                    prompts::degenerate_context(&channel.title, "")
                } else {
                    prompts::build_channel_context(hits)
                };
                prompts::channel_system_prompt(&channel.title, &context)
            }
        }
    }

    async fn persist_turn(
        &self,
        target: &ChatTarget,
        session_id: Option<String>,
        user: &RequestUser,
        question: &str,
        response: &str,
        citations: &[Citation],
    ) {
        let session_id = match self.ensure_session(target, session_id, user, question).await {
            Some(id) => id,
            None => return,
        };

        let persisted = async {
            self.chat
                .insert_message(&session_id, MessageRole::User, question, &[])
                .await?;
            self.chat
                .insert_message(&session_id, MessageRole::Assistant, response, citations)
                .await?;
            self.chat.bump_session(&session_id, 2).await
        }
        .await;

        if let Err(e) = persisted {
            warn!("turn persistence failed for session {}: {}", session_id, e);
            self.errors
                .capture(
                    "store",
                    &e.to_string(),
                    None,
                    serde_json::json!({ "sessionId": session_id }),
                )
                .await;
        }
    }

    async fn ensure_session(
        &self,
        target: &ChatTarget,
        session_id: Option<String>,
        user: &RequestUser,
        question: &str,
    ) -> Option<String> {
        if let Some(id) = &session_id {
            match self.chat.get_session(id).await {
                Ok(Some(_)) => return Some(id.clone()),
                Ok(None) => {}
                Err(e) => {
                    warn!("session lookup failed: {}", e);
                    return None;
                }
            }
        }

        let title = truncate_chars(question, SESSION_TITLE_CHARS);
        let mut session = match target {
            ChatTarget::Video(video) => ChatSession::for_video(user.id.clone(), video.id, title),
            ChatTarget::Channel(channel) => {
                ChatSession::for_channel(user.id.clone(), channel.id, title)
            }
        };
        // Honor a client-chosen id for a session that does not exist yet
        if let Some(id) = session_id {
            session.id = id;
        }

        match self.chat.insert_session(&session).await {
            Ok(()) => Some(session.id),
            Err(e) => {
                warn!("session create failed: {}", e);
                None
            }
        }
    }

    async fn fail_early(&self, sink: &dyn ChatSink, stage: &str, message: &str) {
        warn!("chat failed during {}: {}", stage, message);
        sink.write_frame(&ChatFrame::Error(message.to_string())).await;
        sink.close().await;
    }
}

/// Timestamps like `[12:34]`, `(1:02:03)` in the assistant's output.
fn timestamp_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[\[(](\d{1,2}:)?\d{1,2}:\d{2}[\])]").expect("timestamp regex compiles")
    })
}

/// Extract one citation per timestamp occurrence in the response.
pub fn extract_citations(response: &str) -> Vec<Citation> {
    timestamp_regex()
        .find_iter(response)
        .filter_map(|m| {
            let text = m.as_str();
            let stamp = &text[1..text.len() - 1];
            let seconds = parse_timestamp_seconds(stamp)?;
            Some(Citation::Extracted {
                timestamp: stamp.to_string(),
                seconds,
                text: text.to_string(),
            })
        })
        .collect()
}

fn parse_timestamp_seconds(stamp: &str) -> Option<i64> {
    let parts: Vec<&str> = stamp.split(':').collect();
    match parts.as_slice() {
        [m, s] => Some(m.parse::<i64>().ok()? * 60 + s.parse::<i64>().ok()?),
        [h, m, s] => Some(
            h.parse::<i64>().ok()? * 3600 + m.parse::<i64>().ok()? * 60 + s.parse::<i64>().ok()?,
        ),
        _ => None,
    }
}
