//! Buffered error capture with context redaction.
//!
//! Failures from every component are buffered in memory and flushed to the
//! error_events table periodically, at a buffer threshold, and on shutdown.
//! Context objects are redacted before they ever reach the buffer.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use crate::repository::{ErrorEventRepository, StoredErrorEvent};

/// Flush as soon as the buffer reaches this many events.
const FLUSH_THRESHOLD: usize = 50;

/// Context keys whose values are removed before persistence. Keys are
/// compared lowercased with separators stripped, so `apiKey`, `api_key`
/// and `APIKEY` all match.
const SENSITIVE_KEYS: &[&str] = &["password", "token", "apikey", "secret", "authorization"];

/// Buffered sink for error events.
#[derive(Clone)]
pub struct ErrorSink {
    repo: Arc<ErrorEventRepository>,
    buffer: Arc<Mutex<Vec<StoredErrorEvent>>>,
}

impl ErrorSink {
    pub fn new(repo: ErrorEventRepository) -> Self {
        Self {
            repo: Arc::new(repo),
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Capture one error with structured context.
    pub async fn capture(
        &self,
        error_type: &str,
        message: &str,
        stack: Option<String>,
        context: Value,
    ) {
        let event = StoredErrorEvent {
            message: message.to_string(),
            error_type: error_type.to_string(),
            stack,
            context: redact(context),
            created_at: Utc::now(),
        };

        let should_flush = {
            let mut buffer = self.buffer.lock().await;
            buffer.push(event);
            buffer.len() >= FLUSH_THRESHOLD
        };

        if should_flush {
            self.flush().await;
        }
    }

    /// Persist and clear the buffer. Events are re-buffered on store
    /// failure so they get another chance at the next flush.
    pub async fn flush(&self) {
        let pending: Vec<StoredErrorEvent> = {
            let mut buffer = self.buffer.lock().await;
            buffer.drain(..).collect()
        };
        if pending.is_empty() {
            return;
        }

        if let Err(e) = self.repo.insert_batch(&pending).await {
            warn!("error sink flush failed ({} events): {}", pending.len(), e);
            let mut buffer = self.buffer.lock().await;
            // Keep the buffer bounded even when the store stays down
            if buffer.len() + pending.len() <= FLUSH_THRESHOLD * 4 {
                let mut restored = pending;
                restored.extend(buffer.drain(..));
                *buffer = restored;
            }
        }
    }

    /// Buffered (not yet persisted) event count.
    pub async fn buffered(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// Persisted totals and recent per-type counts for the stats endpoint.
    pub async fn stats(&self) -> Value {
        let total = self.repo.count().await.unwrap_or(0);
        let by_type = self.repo.recent_type_counts().await.unwrap_or_default();
        serde_json::json!({
            "total": total,
            "buffered": self.buffered().await,
            "last24h": by_type
                .into_iter()
                .map(|(t, n)| serde_json::json!({"type": t, "count": n}))
                .collect::<Vec<_>>(),
        })
    }
}

/// Remove values of known sensitive keys, recursively.
pub fn redact(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, v)| {
                    if is_sensitive(&key) {
                        (key, Value::String("[redacted]".to_string()))
                    } else {
                        (key, redact(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(redact).collect()),
        other => other,
    }
}

fn is_sensitive(key: &str) -> bool {
    let normalized: String = key
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    SENSITIVE_KEYS.iter().any(|s| normalized == *s)
}
