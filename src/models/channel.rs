//! Channel model and indexing status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Indexing status of a channel.
///
/// Transitions are monotonic except `Failed -> Pending` via operator retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl ChannelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "ready" => Some(Self::Ready),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A YouTube channel known to the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    /// Database row ID.
    pub id: i64,
    /// Provider channel id (e.g. "UC...").
    pub external_id: String,
    /// Channel title as reported by the metadata provider.
    pub title: String,
    /// Indexing status.
    pub status: ChannelStatus,
    /// Number of videos indexed for this channel.
    pub video_count: i64,
    /// When the channel last completed indexing.
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Channel {
    /// Create a channel row pending its first ingest.
    pub fn new(external_id: String, title: String) -> Self {
        Self {
            id: 0, // Set by database
            external_id,
            title,
            status: ChannelStatus::Pending,
            video_count: 0,
            last_indexed_at: None,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            ChannelStatus::Pending,
            ChannelStatus::Processing,
            ChannelStatus::Ready,
            ChannelStatus::Failed,
        ] {
            assert_eq!(ChannelStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ChannelStatus::parse("bogus"), None);
    }
}
