//! Repository layer for database persistence.
//!
//! All database access goes through sqlx with a shared SQLite pool.
//! Timestamps are stored as RFC 3339 text; embeddings as little-endian
//! f32 blobs.

mod cache_entries;
mod channels;
mod chat;
mod chunks;
mod context;
mod error_events;
mod locks;
mod queue;
mod rate_events;
mod videos;

pub use cache_entries::CacheEntryRepository;
pub use channels::ChannelRepository;
pub use chat::ChatRepository;
pub use chunks::ChunkRepository;
pub use context::DbContext;
pub use error_events::{ErrorEventRepository, StoredErrorEvent};
pub use locks::{LockRepository, LockRow};
pub use queue::QueueRepository;
pub use rate_events::RateEventRepository;
pub use videos::VideoRepository;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors raised by the repository layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("blob store error: {0}")]
    Blob(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for repository operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

/// Create a file-backed throwaway context for tests. A pooled in-memory
/// SQLite would give each connection its own database.
#[cfg(test)]
pub(crate) async fn test_context() -> (DbContext, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("test.db").display());
    let ctx = DbContext::from_url(&url).await.unwrap();
    (ctx, dir)
}
