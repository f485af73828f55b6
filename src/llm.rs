//! LLM client for chat completions.
//!
//! Supports the OpenAI chat completions API, streaming for chat and
//! non-streaming for summaries.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Chat model used for streaming chat and summaries.
const CHAT_MODEL: &str = "gpt-4o-mini";

/// Sampling temperature.
const TEMPERATURE: f32 = 0.3;

/// Output token cap per completion.
const MAX_TOKENS: u32 = 1000;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("api error: {0}")]
    Api(String),
    #[error("parse error: {0}")]
    Parse(String),
}

/// One conversation turn as received from clients and sent upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// Stream of content deltas from a completion.
pub type DeltaStream = BoxStream<'static, Result<String, LlmError>>;

/// Trait for chat completion providers.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Start a streaming completion; yields content deltas.
    async fn stream_completion(
        &self,
        system: &str,
        messages: &[ChatTurn],
    ) -> Result<DeltaStream, LlmError>;

    /// Run a completion to completion and return the full text.
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError>;
}

/// OpenAI chat completions client.
pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: String,
}

impl OpenAiChat {
    pub fn new(api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self { client, api_key }
    }

    fn request_body(&self, system: &str, messages: &[ChatTurn], stream: bool) -> serde_json::Value {
        let mut all = vec![serde_json::json!({"role": "system", "content": system})];
        for turn in messages {
            all.push(serde_json::json!({"role": turn.role, "content": turn.content}));
        }
        serde_json::json!({
            "model": CHAT_MODEL,
            "temperature": TEMPERATURE,
            "max_tokens": MAX_TOKENS,
            "stream": stream,
            "messages": all,
        })
    }

    async fn send(
        &self,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, LlmError> {
        let resp = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("HTTP {}: {}", status, text)));
        }
        Ok(resp)
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn stream_completion(
        &self,
        system: &str,
        messages: &[ChatTurn],
    ) -> Result<DeltaStream, LlmError> {
        let resp = self
            .send(self.request_body(system, messages, true))
            .await?;

        // The response body is an SSE stream of `data: <json>` lines ending
        // with `data: [DONE]`. Lines can split across network chunks, so a
        // carry buffer reassembles them.
        let state = (resp.bytes_stream(), String::new(), VecDeque::<String>::new());
        let stream = futures_util::stream::unfold(
            state,
            |(mut body, mut carry, mut pending)| async move {
                loop {
                    if let Some(delta) = pending.pop_front() {
                        return Some((Ok(delta), (body, carry, pending)));
                    }
                    match body.next().await {
                        Some(Ok(bytes)) => {
                            carry.push_str(&String::from_utf8_lossy(&bytes));
                            while let Some(pos) = carry.find('\n') {
                                let line: String = carry.drain(..=pos).collect();
                                if let Some(delta) = parse_sse_line(line.trim()) {
                                    pending.push_back(delta);
                                }
                            }
                        }
                        Some(Err(e)) => {
                            return Some((
                                Err(LlmError::Connection(e.to_string())),
                                (body, carry, pending),
                            ));
                        }
                        None => return None,
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let messages = [ChatTurn {
            role: "user".to_string(),
            content: user.to_string(),
        }];
        let resp = self
            .send(self.request_body(system, &messages, false))
            .await?;

        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        value["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::Parse("completion had no content".to_string()))
    }
}

/// Extract the content delta from one SSE line, if it carries one.
fn parse_sse_line(line: &str) -> Option<String> {
    let data = line.strip_prefix("data: ")?;
    if data == "[DONE]" {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(data).ok()?;
    let content = value["choices"][0]["delta"]["content"].as_str()?;
    if content.is_empty() {
        None
    } else {
        Some(content.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sse_line_extracts_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(parse_sse_line(line), Some("Hel".to_string()));
    }

    #[test]
    fn test_parse_sse_line_ignores_done_and_noise() {
        assert_eq!(parse_sse_line("data: [DONE]"), None);
        assert_eq!(parse_sse_line(""), None);
        assert_eq!(parse_sse_line(": keepalive"), None);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{}}]}"#),
            None
        );
    }
}
