//! Video summary generation.
//!
//! Summaries are produced by the chat model from the transcript blob and
//! cached for an hour. Transcript input is truncated at 8 000 characters;
//! the API surface documents that cap.

use std::sync::Arc;

use tracing::debug;

use crate::cache::{Cache, SUMMARY_TTL};
use crate::chunker;
use crate::error::{AppError, Result};
use crate::llm::ChatModel;
use crate::models::Video;
use crate::storage::BlobStore;

/// Transcript characters fed to the model.
const SUMMARY_INPUT_CHARS: usize = 8_000;

const SUMMARY_SYSTEM_PROMPT: &str = "You summarize YouTube video transcripts. \
Write a concise summary of 3-5 sentences covering the main topics in order. \
Mention concrete claims and takeaways rather than generic descriptions.";

/// Cached or freshly generated transcript summaries.
#[derive(Clone)]
pub struct SummaryService {
    llm: Arc<dyn ChatModel>,
    blobs: BlobStore,
    cache: Cache,
}

impl SummaryService {
    pub fn new(llm: Arc<dyn ChatModel>, blobs: BlobStore, cache: Cache) -> Self {
        Self { llm, blobs, cache }
    }

    /// Summary for a processed video, from cache when fresh.
    pub async fn get_summary(&self, video: &Video) -> Result<String> {
        if !video.transcript_cached {
            return Err(AppError::Input(
                "video has no cached transcript to summarize".to_string(),
            ));
        }

        let key = Cache::key("video_summary", &[&video.external_id]);
        if let Some(cached) = self.cache.get(&key).await {
            debug!("summary cache hit for {}", video.external_id);
            return Ok(cached);
        }

        let transcript = self
            .blobs
            .read_transcript(&video.external_id)
            .await
            .map_err(|e| AppError::Internal(format!("transcript blob read failed: {}", e)))?;

        let input = chunker::truncate_chars(&transcript, SUMMARY_INPUT_CHARS);
        let prompt = format!(
            "Video title: {}\n\nTranscript:\n{}\n\nSummarize this video.",
            video.title, input
        );

        let summary = self
            .llm
            .complete(SUMMARY_SYSTEM_PROMPT, &prompt)
            .await
            .map_err(|e| AppError::UpstreamLlm(e.to_string()))?;
        let summary = summary.trim().to_string();

        self.cache.set(&key, &summary, SUMMARY_TTL).await;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::llm::{ChatTurn, DeltaStream, LlmError};
    use crate::repository::test_context;

    struct CountingModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatModel for CountingModel {
        async fn stream_completion(
            &self,
            _system: &str,
            _messages: &[ChatTurn],
        ) -> std::result::Result<DeltaStream, LlmError> {
            Err(LlmError::Api("not used".into()))
        }

        async fn complete(
            &self,
            _system: &str,
            user: &str,
        ) -> std::result::Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(user.len() < SUMMARY_INPUT_CHARS + 200);
            Ok("A tidy summary.".to_string())
        }
    }

    #[tokio::test]
    async fn test_summary_is_cached() {
        let (ctx, dir) = test_context().await;
        let blobs = BlobStore::new(dir.path().join("transcripts"));
        blobs
            .write_transcript("vid1", &format!("[00:00] {}\n", "words ".repeat(3000)))
            .await
            .unwrap();

        let video = ctx
            .videos()
            .upsert_placeholder("vid1", None, "Long Video", None)
            .await
            .unwrap();
        ctx.videos()
            .mark_processed(video.id, "vid1/transcript.txt")
            .await
            .unwrap();
        let video = ctx.videos().get(video.id).await.unwrap().unwrap();

        let model = Arc::new(CountingModel {
            calls: AtomicUsize::new(0),
        });
        let service = SummaryService::new(
            model.clone(),
            blobs,
            Cache::new(ctx.cache_entries()),
        );

        assert_eq!(service.get_summary(&video).await.unwrap(), "A tidy summary.");
        assert_eq!(service.get_summary(&video).await.unwrap(), "A tidy summary.");
        // Second request came from cache
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unprocessed_video_is_rejected() {
        let (ctx, dir) = test_context().await;
        let video = ctx
            .videos()
            .upsert_placeholder("raw", None, "Raw", None)
            .await
            .unwrap();

        let service = SummaryService::new(
            Arc::new(CountingModel {
                calls: AtomicUsize::new(0),
            }),
            BlobStore::new(dir.path().join("transcripts")),
            Cache::new(ctx.cache_entries()),
        );
        assert!(service.get_summary(&video).await.is_err());
    }
}
