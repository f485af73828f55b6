//! Transcript retrieval for a video.
//!
//! The production source fetches YouTube timed text in the json3 track
//! format. Errors are classified so the video pipeline can distinguish
//! "this video has no captions" from transient provider trouble.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Initial backoff after a rate-limit signal; doubles per attempt.
const RETRY_INITIAL: Duration = Duration::from_secs(5);

/// Total attempts per fetch.
const MAX_ATTEMPTS: u32 = 3;

/// Errors from transcript retrieval, by cause.
#[derive(Debug, Error)]
pub enum TranscriptError {
    /// Captions are absent or disabled for this video.
    #[error("no transcript available for this video")]
    NoTranscript,

    /// The video is private, deleted, or region-restricted.
    #[error("video unavailable: {0}")]
    Unavailable(String),

    /// DNS or transport failure.
    #[error("network error: {0}")]
    Network(String),

    /// Upstream throttling persisted through all retries.
    #[error("transcript provider rate limited")]
    RateLimited,

    #[error("transcript fetch failed: {0}")]
    Unknown(String),
}

/// One caption segment with whole-second timing.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptSegment {
    pub start_seconds: i64,
    pub end_seconds: i64,
    pub text: String,
}

/// Trait for transcript providers.
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    async fn fetch(&self, video_id: &str) -> Result<Vec<TranscriptSegment>, TranscriptError>;
}

/// YouTube timed-text (json3) transcript source.
pub struct TimedTextSource {
    client: reqwest::Client,
}

/// json3 track wire format.
#[derive(Debug, Deserialize)]
struct TimedTextResponse {
    #[serde(default)]
    events: Vec<TimedTextEvent>,
}

#[derive(Debug, Deserialize)]
struct TimedTextEvent {
    #[serde(rename = "tStartMs", default)]
    start_ms: i64,
    #[serde(rename = "dDurationMs", default)]
    duration_ms: i64,
    #[serde(default)]
    segs: Vec<TimedTextSeg>,
}

#[derive(Debug, Deserialize)]
struct TimedTextSeg {
    #[serde(default)]
    utf8: String,
}

impl TimedTextSource {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    async fn fetch_once(&self, video_id: &str) -> Result<Vec<TranscriptSegment>, TranscriptError> {
        let url = format!(
            "https://www.youtube.com/api/timedtext?v={}&lang=en&fmt=json3",
            video_id
        );

        let resp = self.client.get(&url).send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                TranscriptError::Network(e.to_string())
            } else {
                TranscriptError::Unknown(e.to_string())
            }
        })?;

        match resp.status().as_u16() {
            200 => {}
            404 => return Err(TranscriptError::NoTranscript),
            403 | 410 => {
                return Err(TranscriptError::Unavailable(format!(
                    "HTTP {}",
                    resp.status()
                )))
            }
            429 => return Err(TranscriptError::RateLimited),
            status => return Err(TranscriptError::Unknown(format!("HTTP {}", status))),
        }

        let body = resp
            .text()
            .await
            .map_err(|e| TranscriptError::Network(e.to_string()))?;
        // Videos without caption tracks answer 200 with an empty body.
        if body.trim().is_empty() {
            return Err(TranscriptError::NoTranscript);
        }

        let track: TimedTextResponse = serde_json::from_str(&body)
            .map_err(|e| TranscriptError::Unknown(format!("bad timedtext payload: {}", e)))?;

        let segments = parse_events(track.events);
        if segments.is_empty() {
            return Err(TranscriptError::NoTranscript);
        }
        Ok(segments)
    }
}

impl Default for TimedTextSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TranscriptSource for TimedTextSource {
    async fn fetch(&self, video_id: &str) -> Result<Vec<TranscriptSegment>, TranscriptError> {
        let mut backoff = RETRY_INITIAL;

        for attempt in 1..=MAX_ATTEMPTS {
            match self.fetch_once(video_id).await {
                Ok(segments) => {
                    debug!("fetched {} transcript segments for {}", segments.len(), video_id);
                    return Ok(segments);
                }
                Err(TranscriptError::RateLimited) if attempt < MAX_ATTEMPTS => {
                    warn!(
                        "transcript fetch rate limited for {}, retrying in {:?}",
                        video_id, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        }

        Err(TranscriptError::RateLimited)
    }
}

/// Convert json3 events to whole-second segments, dropping empty text.
fn parse_events(events: Vec<TimedTextEvent>) -> Vec<TranscriptSegment> {
    events
        .into_iter()
        .filter_map(|event| {
            let text: String = event
                .segs
                .iter()
                .map(|s| s.utf8.as_str())
                .collect::<String>()
                .replace('\n', " ")
                .trim()
                .to_string();
            if text.is_empty() {
                return None;
            }
            Some(TranscriptSegment {
                start_seconds: event.start_ms / 1000,
                end_seconds: (event.start_ms + event.duration_ms) / 1000,
                text,
            })
        })
        .collect()
}
