//! Single-video ingestion pipeline.
//!
//! Fetch transcript -> chunk -> embed -> atomically persist, all under a
//! per-video lease. The chunk swap is the only step that mutates chunks;
//! a failure anywhere leaves the previous chunk set intact and records
//! `processing_error` on the video row.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::chunker;
use crate::embedding::EmbeddingClient;
use crate::error_sink::ErrorSink;
use crate::lock::LockManager;
use crate::models::TranscriptChunk;
use crate::repository::{ChunkRepository, VideoRepository};
use crate::storage::BlobStore;
use crate::transcript::{TranscriptError, TranscriptSource};

/// Lease TTL for one video run.
const VIDEO_LOCK_TTL: Duration = Duration::from_secs(600);

pub struct VideoPipeline {
    videos: Arc<VideoRepository>,
    chunks: Arc<ChunkRepository>,
    blobs: BlobStore,
    transcripts: Arc<dyn TranscriptSource>,
    embeddings: EmbeddingClient,
    locks: LockManager,
    errors: ErrorSink,
}

impl VideoPipeline {
    pub fn new(
        videos: VideoRepository,
        chunks: ChunkRepository,
        blobs: BlobStore,
        transcripts: Arc<dyn TranscriptSource>,
        embeddings: EmbeddingClient,
        locks: LockManager,
        errors: ErrorSink,
    ) -> Self {
        Self {
            videos: Arc::new(videos),
            chunks: Arc::new(chunks),
            blobs,
            transcripts,
            embeddings,
            locks,
            errors,
        }
    }

    /// Process one video end to end. Returns whether the video is now
    /// fully ingested. Runs under the `video-<id>` lease; returns false
    /// without side effects when another worker holds it.
    pub async fn process(&self, external_id: &str) -> bool {
        let resource = format!("video-{}", external_id);
        let Some(lease) = self.locks.acquire(&resource, VIDEO_LOCK_TTL).await else {
            warn!("video {} is locked by another worker", external_id);
            return false;
        };

        let outcome = self.run(external_id).await;
        self.locks.release(&lease).await;

        match outcome {
            Ok(chunk_count) => {
                info!("processed video {} into {} chunks", external_id, chunk_count);
                true
            }
            Err(message) => {
                warn!("video {} failed: {}", external_id, message);
                if let Ok(Some(video)) = self.videos.get_by_external_id(external_id).await {
                    if let Err(e) = self.videos.mark_failed(video.id, &message).await {
                        warn!("could not record failure for {}: {}", external_id, e);
                    }
                }
                self.errors
                    .capture(
                        "upstream_transcript",
                        &message,
                        None,
                        serde_json::json!({ "videoId": external_id }),
                    )
                    .await;
                false
            }
        }
    }

    async fn run(&self, external_id: &str) -> Result<usize, String> {
        let video = self
            .videos
            .upsert_placeholder(external_id, None, external_id, None)
            .await
            .map_err(|e| format!("store error: {}", e))?;

        // 1. Transcript
        let segments = self
            .transcripts
            .fetch(external_id)
            .await
            .map_err(classify_transcript_error)?;
        if segments.is_empty() {
            return Err("no transcript or captions for this video".to_string());
        }

        // 2-3. Chunk, then write the blob assembled from the same lines so
        // byte offsets agree with the stored text exactly.
        let drafts = chunker::chunk_segments(&segments);
        let blob = chunker::assemble_blob(&drafts);
        let blob_path = self
            .blobs
            .write_transcript(external_id, &blob)
            .await
            .map_err(|e| format!("blob write failed: {}", e))?;

        // 4. Embed. Null vectors are kept; those chunks stay eligible for
        // keyword-only retrieval.
        let texts: Vec<String> = drafts.iter().map(|d| d.text.clone()).collect();
        let vectors = self.embeddings.embed(&texts).await;
        let null_count = vectors.iter().filter(|v| v.is_none()).count();
        if null_count > 0 {
            warn!(
                "{} of {} chunks of {} got null vectors",
                null_count,
                drafts.len(),
                external_id
            );
        }

        let chunk_rows: Vec<TranscriptChunk> = drafts
            .iter()
            .zip(vectors)
            .enumerate()
            .map(|(index, (draft, vector))| TranscriptChunk {
                id: 0,
                video_id: video.id,
                chunk_index: index as i64,
                start_time: draft.start_time,
                end_time: draft.end_time,
                byte_offset: draft.byte_offset,
                byte_length: draft.byte_length,
                preview: draft.preview(),
                keywords: draft.keywords.clone(),
                embedding: vector,
            })
            .collect();

        // 5. Atomic swap of the chunk set
        self.chunks
            .replace_for_video(video.id, &chunk_rows)
            .await
            .map_err(|e| format!("chunk persist failed: {}", e))?;

        // 6. Flip the processed flags and record the blob path
        self.videos
            .mark_processed(video.id, &blob_path)
            .await
            .map_err(|e| format!("store error: {}", e))?;

        Ok(chunk_rows.len())
    }
}

/// Map transcript errors onto recorded failure strings. The channel
/// pipeline classifies outcomes by the transcript/captions substring.
fn classify_transcript_error(err: TranscriptError) -> String {
    match err {
        TranscriptError::NoTranscript => "no transcript or captions for this video".to_string(),
        other => other.to_string(),
    }
}
