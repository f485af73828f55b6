//! Channel ingestion queue item model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Dispatch priority. High priority triggers immediate dispatch on enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuePriority {
    High,
    Normal,
    Low,
}

impl QueuePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(Self::High),
            "normal" => Some(Self::Normal),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

/// One unit of channel ingest work.
///
/// Progress fields are written only by the channel pipeline while it holds
/// the queue-item lease; the dispatcher writes only `status` when resetting
/// failed items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelQueueItem {
    /// Database row ID (the qid).
    pub id: i64,
    /// Channel row this work targets.
    pub channel_id: i64,
    /// Requesting user, None for system-initiated work.
    pub requested_by: Option<String>,
    pub status: QueueStatus,
    pub priority: QueuePriority,
    pub retry_count: i64,
    pub total_videos: i64,
    pub videos_processed: i64,
    pub current_video_index: i64,
    pub current_video_title: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub estimated_completion_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            QueueStatus::Pending,
            QueueStatus::Processing,
            QueueStatus::Completed,
            QueueStatus::Failed,
        ] {
            assert_eq!(QueueStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_priority_round_trip() {
        for p in [
            QueuePriority::High,
            QueuePriority::Normal,
            QueuePriority::Low,
        ] {
            assert_eq!(QueuePriority::parse(p.as_str()), Some(p));
        }
    }
}
