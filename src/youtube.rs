//! Video metadata provider.
//!
//! Resolves channel handles to channel ids, lists channel videos newest
//! first, and fetches per-video details through the YouTube Data API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("api error: {0}")]
    Api(String),
    #[error("channel not found: {0}")]
    ChannelNotFound(String),
    #[error("parse error: {0}")]
    Parse(String),
}

/// Resolved channel identity.
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub channel_id: String,
    pub title: String,
}

/// One entry of a channel's video listing.
#[derive(Debug, Clone)]
pub struct VideoListing {
    pub video_id: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// Full metadata for a single video.
#[derive(Debug, Clone)]
pub struct VideoDetails {
    pub video_id: String,
    pub title: String,
    pub description: String,
    pub duration_seconds: i64,
    pub published_at: Option<DateTime<Utc>>,
}

/// Trait for the video metadata provider.
#[async_trait]
pub trait VideoDirectory: Send + Sync {
    /// Resolve a channel handle (`@name`) or raw channel id.
    async fn resolve_channel(&self, reference: &str) -> Result<ChannelInfo, MetadataError>;

    /// List a channel's videos in reverse-chronological order. When
    /// `published_after` is set, only newer videos are returned.
    async fn list_videos(
        &self,
        channel_id: &str,
        max_results: usize,
        published_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<VideoListing>, MetadataError>;

    /// Fetch details for one video; None when the video does not exist.
    async fn video_details(&self, video_id: &str) -> Result<Option<VideoDetails>, MetadataError>;
}

/// YouTube Data API v3 implementation.
pub struct YouTubeDirectory {
    client: reqwest::Client,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ApiList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ChannelItem {
    id: String,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchId,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
struct SearchId {
    #[serde(rename = "videoId", default)]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    id: String,
    snippet: Snippet,
    #[serde(rename = "contentDetails", default)]
    content_details: Option<ContentDetails>,
}

#[derive(Debug, Deserialize, Default)]
struct Snippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "publishedAt", default)]
    published_at: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ContentDetails {
    #[serde(default)]
    duration: String,
}

impl YouTubeDirectory {
    pub fn new(api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self { client, api_key }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, MetadataError> {
        let mut query: Vec<(&str, String)> = params.to_vec();
        query.push(("key", self.api_key.clone()));

        let resp = self
            .client
            .get(format!("{}/{}", API_BASE, path))
            .query(&query)
            .send()
            .await
            .map_err(|e| MetadataError::Connection(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(MetadataError::Api(format!("HTTP {}: {}", status, body)));
        }

        resp.json::<T>()
            .await
            .map_err(|e| MetadataError::Parse(e.to_string()))
    }
}

#[async_trait]
impl VideoDirectory for YouTubeDirectory {
    async fn resolve_channel(&self, reference: &str) -> Result<ChannelInfo, MetadataError> {
        let param = if let Some(handle) = reference.strip_prefix('@') {
            ("forHandle", format!("@{handle}"))
        } else {
            ("id", reference.to_string())
        };

        let list: ApiList<ChannelItem> = self
            .get_json("channels", &[("part", "snippet".into()), param])
            .await?;

        let item = list
            .items
            .into_iter()
            .next()
            .ok_or_else(|| MetadataError::ChannelNotFound(reference.to_string()))?;

        debug!("resolved channel {} -> {}", reference, item.id);
        Ok(ChannelInfo {
            channel_id: item.id,
            title: item.snippet.title,
        })
    }

    async fn list_videos(
        &self,
        channel_id: &str,
        max_results: usize,
        published_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<VideoListing>, MetadataError> {
        let mut params = vec![
            ("part", "snippet".to_string()),
            ("channelId", channel_id.to_string()),
            ("order", "date".to_string()),
            ("type", "video".to_string()),
            ("maxResults", max_results.min(50).to_string()),
        ];
        if let Some(after) = published_after {
            params.push(("publishedAfter", after.to_rfc3339()));
        }

        let list: ApiList<SearchItem> = self.get_json("search", &params).await?;

        Ok(list
            .items
            .into_iter()
            .filter_map(|item| {
                let video_id = item.id.video_id?;
                Some(VideoListing {
                    video_id,
                    title: item.snippet.title,
                    published_at: item
                        .snippet
                        .published_at
                        .as_deref()
                        .and_then(parse_rfc3339),
                })
            })
            .take(max_results)
            .collect())
    }

    async fn video_details(&self, video_id: &str) -> Result<Option<VideoDetails>, MetadataError> {
        let list: ApiList<VideoItem> = self
            .get_json(
                "videos",
                &[
                    ("part", "snippet,contentDetails".to_string()),
                    ("id", video_id.to_string()),
                ],
            )
            .await?;

        Ok(list.items.into_iter().next().map(|item| VideoDetails {
            video_id: item.id,
            duration_seconds: item
                .content_details
                .map(|d| parse_iso8601_duration(&d.duration))
                .unwrap_or(0),
            published_at: item
                .snippet
                .published_at
                .as_deref()
                .and_then(parse_rfc3339),
            title: item.snippet.title,
            description: item.snippet.description,
        }))
    }
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Parse an ISO 8601 duration like `PT1H2M3S` to seconds.
fn parse_iso8601_duration(input: &str) -> i64 {
    let Some(rest) = input.strip_prefix("PT") else {
        return 0;
    };
    let mut total = 0i64;
    let mut digits = String::new();
    for c in rest.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else {
            let value: i64 = digits.parse().unwrap_or(0);
            digits.clear();
            total += match c {
                'H' => value * 3600,
                'M' => value * 60,
                'S' => value,
                _ => 0,
            };
        }
    }
    total
}
