//! Chat session and message models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat session over exactly one video or one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    /// Opaque session id (UUID).
    pub id: String,
    /// Owning user; None for anonymous sessions.
    pub user_id: Option<String>,
    /// Target video row; exactly one of video_id/channel_id is set.
    pub video_id: Option<i64>,
    /// Target channel row.
    pub channel_id: Option<i64>,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: i64,
}

impl ChatSession {
    /// Create a session targeting a video.
    pub fn for_video(user_id: Option<String>, video_id: i64, title: String) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            video_id: Some(video_id),
            channel_id: None,
            title,
            created_at: now,
            last_activity: now,
            message_count: 0,
        }
    }

    /// Create a session targeting a channel.
    pub fn for_channel(user_id: Option<String>, channel_id: i64, title: String) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            video_id: None,
            channel_id: Some(channel_id),
            title,
            created_at: now,
            last_activity: now,
            message_count: 0,
        }
    }
}

/// Speaker role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// A citation attached to an assistant message.
///
/// Context citations come from retrieval; extracted citations are scraped
/// from timestamps in the assistant's own output. Clients tolerate both
/// wire shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Citation {
    Context {
        #[serde(rename = "videoId")]
        video_id: String,
        #[serde(rename = "videoTitle", skip_serializing_if = "Option::is_none")]
        video_title: Option<String>,
        #[serde(rename = "startTime")]
        start_time: i64,
        #[serde(rename = "endTime")]
        end_time: i64,
        text: String,
    },
    Extracted {
        timestamp: String,
        seconds: i64,
        text: String,
    },
}

/// One turn within a chat session. Ordering is `created_at`, then row id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Database row ID.
    pub id: i64,
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    pub citations: Vec<Citation>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_citation_context_wire_shape() {
        let citation = Citation::Context {
            video_id: "abc123".into(),
            video_title: Some("Intro".into()),
            start_time: 90,
            end_time: 150,
            text: "welcome to the course".into(),
        };
        let json = serde_json::to_value(&citation).unwrap();
        assert_eq!(json["videoId"], "abc123");
        assert_eq!(json["startTime"], 90);
        assert!(json.get("timestamp").is_none());
    }

    #[test]
    fn test_citation_extracted_wire_shape() {
        let citation = Citation::Extracted {
            timestamp: "12:34".into(),
            seconds: 754,
            text: "[12:34]".into(),
        };
        let json = serde_json::to_value(&citation).unwrap();
        assert_eq!(json["timestamp"], "12:34");
        assert_eq!(json["seconds"], 754);
    }

    #[test]
    fn test_citation_round_trip_both_shapes() {
        let wire = serde_json::json!([
            {"videoId": "v1", "startTime": 0, "endTime": 10, "text": "t"},
            {"timestamp": "1:02:03", "seconds": 3723, "text": "[1:02:03]"},
        ]);
        let parsed: Vec<Citation> = serde_json::from_value(wire).unwrap();
        assert!(matches!(parsed[0], Citation::Context { .. }));
        assert!(matches!(parsed[1], Citation::Extracted { .. }));
    }
}
