//! Completion notification email provider.
//!
//! Sends one notice per finished channel ingest, branching on outcome.
//! Without an EMAIL_API_KEY the no-op mailer is wired in and notices are
//! only logged.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("api error: {0}")]
    Api(String),
}

/// Outcome statistics of one channel ingest run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Videos available after the run (already cached + newly processed).
    pub processed: u32,
    pub failed: u32,
    /// Videos that were already fully processed before this run.
    pub existing: u32,
    pub no_transcript: u32,
    pub total: u32,
}

/// A completion notice for the requesting user.
#[derive(Debug, Clone)]
pub struct CompletionNotice {
    pub recipient: String,
    pub channel_title: String,
    /// "completed" or "failed".
    pub status: &'static str,
    pub stats: IngestStats,
    pub error_message: Option<String>,
}

impl CompletionNotice {
    fn subject(&self) -> String {
        match self.status {
            "completed" => format!("Your channel \"{}\" is ready to chat", self.channel_title),
            _ => format!("Processing \"{}\" ran into trouble", self.channel_title),
        }
    }

    fn body(&self) -> String {
        match self.status {
            "completed" => format!(
                "Processing finished for \"{}\".\n\n\
                 Videos ready: {}\nAlready indexed: {}\nWithout captions: {}\nFailed: {}\nTotal examined: {}\n",
                self.channel_title,
                self.stats.processed,
                self.stats.existing,
                self.stats.no_transcript,
                self.stats.failed,
                self.stats.total,
            ),
            _ => format!(
                "Processing \"{}\" failed: {}\n\nWe will retry automatically.\n",
                self.channel_title,
                self.error_message.as_deref().unwrap_or("unknown error"),
            ),
        }
    }
}

/// Trait for the email provider.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_completion_notice(&self, notice: &CompletionNotice) -> Result<(), EmailError>;
}

/// HTTP email provider (Resend-compatible API).
pub struct HttpMailer {
    client: reqwest::Client,
    api_key: String,
    from: String,
}

impl HttpMailer {
    pub fn new(api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            from: "TubeSage <notifications@tubesage.app>".to_string(),
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send_completion_notice(&self, notice: &CompletionNotice) -> Result<(), EmailError> {
        let resp = self
            .client
            .post("https://api.resend.com/emails")
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "from": self.from,
                "to": [notice.recipient],
                "subject": notice.subject(),
                "text": notice.body(),
            }))
            .send()
            .await
            .map_err(|e| EmailError::Connection(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(EmailError::Api(format!("HTTP {}: {}", status, body)));
        }

        info!(
            "sent {} notice for \"{}\" to {}",
            notice.status, notice.channel_title, notice.recipient
        );
        Ok(())
    }
}

/// Mailer used when notifications are disabled.
pub struct NoopMailer;

#[async_trait]
impl Mailer for NoopMailer {
    async fn send_completion_notice(&self, notice: &CompletionNotice) -> Result<(), EmailError> {
        warn!(
            "email disabled; dropping {} notice for \"{}\"",
            notice.status, notice.channel_title
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(status: &'static str) -> CompletionNotice {
        CompletionNotice {
            recipient: "user@example.com".into(),
            channel_title: "Rust Deep Dives".into(),
            status,
            stats: IngestStats {
                processed: 4,
                failed: 0,
                existing: 2,
                no_transcript: 1,
                total: 5,
            },
            error_message: None,
        }
    }

    #[test]
    fn test_completed_template_carries_statistics() {
        let n = notice("completed");
        assert!(n.subject().contains("ready to chat"));
        let body = n.body();
        assert!(body.contains("Videos ready: 4"));
        assert!(body.contains("Already indexed: 2"));
        assert!(body.contains("Without captions: 1"));
        assert!(body.contains("Total examined: 5"));
    }

    #[test]
    fn test_failed_template_carries_error() {
        let mut n = notice("failed");
        n.error_message = Some("provider quota exceeded".into());
        assert!(n.subject().contains("trouble"));
        assert!(n.body().contains("provider quota exceeded"));
    }
}
