//! Video model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single video. Identity is the provider video id; rows may exist as
/// placeholders (`transcript_cached = false`) before the pipeline completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    /// Database row ID.
    pub id: i64,
    /// Provider video id, globally unique.
    pub external_id: String,
    /// Owning channel row, if any (None for ad-hoc videos).
    pub channel_id: Option<i64>,
    pub title: String,
    pub description: String,
    pub duration_seconds: i64,
    /// Whether the transcript blob has been written.
    pub transcript_cached: bool,
    /// Whether the chunk set has been committed.
    pub chunks_processed: bool,
    /// Whether a video-level ingest has been requested but not completed.
    pub processing_queued: bool,
    /// Last pipeline failure for this video, if any.
    pub processing_error: Option<String>,
    /// Path of the transcript blob inside the container.
    pub transcript_blob_path: Option<String>,
    /// Publish date from the metadata provider.
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Video {
    /// Create a placeholder row for a video that has not been processed yet.
    pub fn placeholder(external_id: String, channel_id: Option<i64>, title: String) -> Self {
        Self {
            id: 0, // Set by database
            external_id,
            channel_id,
            title,
            description: String::new(),
            duration_seconds: 0,
            transcript_cached: false,
            chunks_processed: false,
            processing_queued: false,
            processing_error: None,
            transcript_blob_path: None,
            published_at: None,
            created_at: Utc::now(),
        }
    }

    /// Whether this video has been fully ingested.
    pub fn is_processed(&self) -> bool {
        self.transcript_cached && self.chunks_processed
    }
}
