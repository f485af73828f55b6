//! Channel ingestion pipeline.
//!
//! Drives the video pipeline over a channel's recent uploads while holding
//! the queue-item lease. A single video failure never aborts the run; each
//! outcome is counted and the requesting user gets one completion notice.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::email::{CompletionNotice, IngestStats, Mailer};
use crate::error_sink::ErrorSink;
use crate::lock::LockManager;
use crate::models::ChannelStatus;
use crate::pipeline::VideoPipeline;
use crate::repository::{ChannelRepository, QueueRepository, VideoRepository};
use crate::youtube::VideoDirectory;

/// Lease TTL for one queue item run.
const CHANNEL_LOCK_TTL: Duration = Duration::from_secs(3600);

/// Estimated processing time per video, for completion estimates.
const PER_VIDEO_ESTIMATE_SECS: i64 = 30;

/// Politeness pause between videos.
const BETWEEN_VIDEOS: Duration = Duration::from_secs(2);

pub struct ChannelPipeline {
    channels: Arc<ChannelRepository>,
    videos: Arc<VideoRepository>,
    queue: Arc<QueueRepository>,
    directory: Arc<dyn VideoDirectory>,
    video_pipeline: Arc<VideoPipeline>,
    mailer: Arc<dyn Mailer>,
    locks: LockManager,
    errors: ErrorSink,
    /// Maximum videos examined per run.
    video_cap: usize,
}

impl ChannelPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channels: ChannelRepository,
        videos: VideoRepository,
        queue: QueueRepository,
        directory: Arc<dyn VideoDirectory>,
        video_pipeline: Arc<VideoPipeline>,
        mailer: Arc<dyn Mailer>,
        locks: LockManager,
        errors: ErrorSink,
        video_cap: usize,
    ) -> Self {
        Self {
            channels: Arc::new(channels),
            videos: Arc::new(videos),
            queue: Arc::new(queue),
            directory,
            video_pipeline,
            mailer,
            locks,
            errors,
            video_cap,
        }
    }

    /// Process one queue item under its lease. Safe to call from multiple
    /// dispatch ticks; only one invocation per qid makes progress.
    pub async fn process_queue_item(&self, qid: i64) {
        let resource = format!("channel-queue-{}", qid);
        let Some(lease) = self.locks.acquire(&resource, CHANNEL_LOCK_TTL).await else {
            return;
        };

        if let Err(message) = self.run(qid).await {
            warn!("queue item {} failed: {}", qid, message);
            if let Err(e) = self.queue.mark_failed(qid, &message).await {
                warn!("could not mark queue item {} failed: {}", qid, e);
            }
            if let Ok(Some(item)) = self.queue.get(qid).await {
                let _ = self
                    .channels
                    .set_status(item.channel_id, ChannelStatus::Failed)
                    .await;
                self.notify(qid, "failed", IngestStats::default(), Some(message.clone()))
                    .await;
            }
            self.errors
                .capture(
                    "internal",
                    &message,
                    None,
                    serde_json::json!({ "queueId": qid }),
                )
                .await;
        }

        self.locks.release(&lease).await;
    }

    async fn run(&self, qid: i64) -> Result<(), String> {
        let item = self
            .queue
            .get(qid)
            .await
            .map_err(|e| format!("store error: {}", e))?
            .ok_or_else(|| format!("queue item {} not found", qid))?;

        let channel = self
            .channels
            .get(item.channel_id)
            .await
            .map_err(|e| format!("store error: {}", e))?
            .ok_or_else(|| format!("channel {} not found", item.channel_id))?;

        self.queue
            .mark_processing(qid)
            .await
            .map_err(|e| format!("store error: {}", e))?;
        self.channels
            .set_status(channel.id, ChannelStatus::Processing)
            .await
            .map_err(|e| format!("store error: {}", e))?;

        // Resolve handles to the canonical channel id and refresh the title
        let info = self
            .directory
            .resolve_channel(&channel.external_id)
            .await
            .map_err(|e| format!("channel resolution failed: {}", e))?;
        if info.title != channel.title {
            let _ = self.channels.set_title(channel.id, &info.title).await;
        }

        let listings = self
            .directory
            .list_videos(&info.channel_id, self.video_cap, None)
            .await
            .map_err(|e| format!("video listing failed: {}", e))?;

        let total = listings.len();
        self.queue
            .set_totals(
                qid,
                total as i64,
                Utc::now() + chrono::Duration::seconds(PER_VIDEO_ESTIMATE_SECS * total as i64),
            )
            .await
            .map_err(|e| format!("store error: {}", e))?;

        info!(
            "ingesting {} videos for channel {} (queue item {})",
            total, info.channel_id, qid
        );

        let mut stats = IngestStats {
            total: total as u32,
            ..Default::default()
        };

        for (index, listing) in listings.iter().enumerate() {
            let _ = self
                .queue
                .set_current_video(qid, index as i64, &listing.title)
                .await;

            let existing = self
                .videos
                .get_by_external_id(&listing.video_id)
                .await
                .map_err(|e| format!("store error: {}", e))?;

            if existing.as_ref().is_some_and(|v| v.is_processed()) {
                stats.existing += 1;
                stats.processed += 1;
            } else {
                let video = self
                    .videos
                    .upsert_placeholder(
                        &listing.video_id,
                        Some(channel.id),
                        &listing.title,
                        listing.published_at,
                    )
                    .await
                    .map_err(|e| format!("store error: {}", e))?;
                // Placeholders created ad hoc may predate this channel
                if video.channel_id.is_none() {
                    let _ = self.videos.set_channel(video.id, channel.id).await;
                }
                self.refresh_metadata(video.id, &listing.video_id).await;

                if self.video_pipeline.process(&listing.video_id).await {
                    stats.processed += 1;
                } else {
                    let error = self
                        .videos
                        .get_by_external_id(&listing.video_id)
                        .await
                        .ok()
                        .flatten()
                        .and_then(|v| v.processing_error)
                        .unwrap_or_default();
                    if error.contains("transcript") || error.contains("captions") {
                        stats.no_transcript += 1;
                    } else {
                        stats.failed += 1;
                    }
                }
            }

            if index + 1 < total {
                tokio::time::sleep(BETWEEN_VIDEOS).await;
            }
        }

        self.queue
            .mark_completed(qid, stats.processed as i64)
            .await
            .map_err(|e| format!("store error: {}", e))?;
        self.channels
            .mark_indexed(channel.id, stats.processed as i64)
            .await
            .map_err(|e| format!("store error: {}", e))?;

        info!(
            "queue item {} completed: {} processed, {} existing, {} without captions, {} failed",
            qid, stats.processed, stats.existing, stats.no_transcript, stats.failed
        );
        self.notify(qid, "completed", stats, None).await;

        Ok(())
    }

    /// Pull provider metadata onto the video row; failures are non-fatal.
    async fn refresh_metadata(&self, video_row_id: i64, external_id: &str) {
        match self.directory.video_details(external_id).await {
            Ok(Some(details)) => {
                if let Err(e) = self
                    .videos
                    .update_metadata(
                        video_row_id,
                        &details.title,
                        &details.description,
                        details.duration_seconds,
                        details.published_at,
                    )
                    .await
                {
                    warn!("metadata update failed for {}: {}", external_id, e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("metadata lookup failed for {}: {}", external_id, e),
        }
    }

    async fn notify(
        &self,
        qid: i64,
        status: &'static str,
        stats: IngestStats,
        error_message: Option<String>,
    ) {
        let Ok(Some(item)) = self.queue.get(qid).await else {
            return;
        };
        let Some(recipient) = item.requested_by else {
            return;
        };
        let channel_title = self
            .channels
            .get(item.channel_id)
            .await
            .ok()
            .flatten()
            .map(|c| c.title)
            .unwrap_or_else(|| "your channel".to_string());

        let notice = CompletionNotice {
            recipient,
            channel_title,
            status,
            stats,
            error_message,
        };
        if let Err(e) = self.mailer.send_completion_notice(&notice).await {
            warn!("completion notice for queue item {} failed: {}", qid, e);
            self.errors
                .capture(
                    "upstream_email",
                    &e.to_string(),
                    None,
                    serde_json::json!({ "queueId": qid }),
                )
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    use crate::email::EmailError;
    use crate::embedding::{EmbeddingBackend, EmbeddingClient, EmbeddingError};
    use crate::models::{QueuePriority, QueueStatus};
    use crate::repository::test_context;
    use crate::storage::BlobStore;
    use crate::transcript::{TranscriptError, TranscriptSegment, TranscriptSource};
    use crate::youtube::{ChannelInfo, MetadataError, VideoDetails, VideoListing};

    /// Directory listing five videos; "nocaps" has no transcript.
    struct FakeDirectory;

    #[async_trait]
    impl VideoDirectory for FakeDirectory {
        async fn resolve_channel(&self, reference: &str) -> Result<ChannelInfo, MetadataError> {
            Ok(ChannelInfo {
                channel_id: reference.trim_start_matches('@').to_string(),
                title: "Resolved Channel".to_string(),
            })
        }

        async fn list_videos(
            &self,
            _channel_id: &str,
            max_results: usize,
            _published_after: Option<chrono::DateTime<chrono::Utc>>,
        ) -> Result<Vec<VideoListing>, MetadataError> {
            Ok(["new1", "new2", "old1", "old2", "nocaps"]
                .iter()
                .take(max_results)
                .map(|id| VideoListing {
                    video_id: id.to_string(),
                    title: format!("Video {id}"),
                    published_at: None,
                })
                .collect())
        }

        async fn video_details(
            &self,
            video_id: &str,
        ) -> Result<Option<VideoDetails>, MetadataError> {
            Ok(Some(VideoDetails {
                video_id: video_id.to_string(),
                title: format!("Video {video_id}"),
                description: "about rust".to_string(),
                duration_seconds: 300,
                published_at: None,
            }))
        }
    }

    struct FakeTranscripts;

    #[async_trait]
    impl TranscriptSource for FakeTranscripts {
        async fn fetch(&self, video_id: &str) -> Result<Vec<TranscriptSegment>, TranscriptError> {
            if video_id == "nocaps" {
                Err(TranscriptError::NoTranscript)
            } else {
                Ok(vec![TranscriptSegment {
                    start_seconds: 0,
                    end_seconds: 5,
                    text: "Short transcript.".into(),
                }])
            }
        }
    }

    struct FakeEmbeddings;

    #[async_trait]
    impl EmbeddingBackend for FakeEmbeddings {
        async fn embed_one(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0, 0.0])
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    /// Mailer recording notices for assertions.
    #[derive(Default)]
    struct RecordingMailer {
        notices: StdMutex<Vec<CompletionNotice>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send_completion_notice(
            &self,
            notice: &CompletionNotice,
        ) -> Result<(), EmailError> {
            self.notices.lock().unwrap().push(notice.clone());
            Ok(())
        }
    }

    async fn build_pipeline(
        ctx: &crate::repository::DbContext,
        dir: &tempfile::TempDir,
        mailer: Arc<RecordingMailer>,
    ) -> ChannelPipeline {
        let locks = LockManager::new(ctx.locks());
        let video_pipeline = Arc::new(VideoPipeline::new(
            ctx.videos(),
            ctx.chunks(),
            BlobStore::new(dir.path().join("transcripts")),
            Arc::new(FakeTranscripts),
            EmbeddingClient::new(Arc::new(FakeEmbeddings)),
            locks.clone(),
            ErrorSink::new(ctx.error_events()),
        ));
        ChannelPipeline::new(
            ctx.channels(),
            ctx.videos(),
            ctx.queue(),
            Arc::new(FakeDirectory),
            video_pipeline,
            mailer,
            locks,
            ErrorSink::new(ctx.error_events()),
            20,
        )
    }

    #[tokio::test]
    async fn test_run_counts_outcomes_and_notifies() {
        let (ctx, dir) = test_context().await;
        let mailer = Arc::new(RecordingMailer::default());
        let pipeline = build_pipeline(&ctx, &dir, mailer.clone()).await;

        let channel = ctx.channels().get_or_create("@rustcasts", "?").await.unwrap();
        // Two videos already fully processed before the run
        for ext in ["old1", "old2"] {
            let v = ctx
                .videos()
                .upsert_placeholder(ext, Some(channel.id), ext, None)
                .await
                .unwrap();
            ctx.videos().mark_processed(v.id, "x/transcript.txt").await.unwrap();
        }
        let item = ctx
            .queue()
            .insert(channel.id, Some("user@example.com"), QueuePriority::Normal)
            .await
            .unwrap();

        pipeline.process_queue_item(item.id).await;

        let done = ctx.queue().get(item.id).await.unwrap().unwrap();
        assert_eq!(done.status, QueueStatus::Completed);
        assert_eq!(done.total_videos, 5);
        assert_eq!(done.videos_processed, 4);

        let refreshed = ctx.channels().get(channel.id).await.unwrap().unwrap();
        assert_eq!(refreshed.status, ChannelStatus::Ready);
        assert_eq!(refreshed.title, "Resolved Channel");

        let notices = mailer.notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        let notice = &notices[0];
        assert_eq!(notice.status, "completed");
        assert_eq!(notice.stats.processed, 4);
        assert_eq!(notice.stats.existing, 2);
        assert_eq!(notice.stats.no_transcript, 1);
        assert_eq!(notice.stats.failed, 0);
        assert_eq!(notice.stats.total, 5);
    }

    #[tokio::test]
    async fn test_missing_queue_item_marks_nothing() {
        let (ctx, dir) = test_context().await;
        let mailer = Arc::new(RecordingMailer::default());
        let pipeline = build_pipeline(&ctx, &dir, mailer.clone()).await;

        pipeline.process_queue_item(9999).await;
        assert!(mailer.notices.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lock_prevents_concurrent_runs() {
        let (ctx, dir) = test_context().await;
        let mailer = Arc::new(RecordingMailer::default());
        let pipeline = build_pipeline(&ctx, &dir, mailer.clone()).await;

        let channel = ctx.channels().get_or_create("@c", "?").await.unwrap();
        let item = ctx
            .queue()
            .insert(channel.id, None, QueuePriority::Normal)
            .await
            .unwrap();

        let locks = LockManager::new(ctx.locks());
        let lease = locks
            .acquire(
                &format!("channel-queue-{}", item.id),
                Duration::from_secs(3600),
            )
            .await
            .unwrap();

        pipeline.process_queue_item(item.id).await;
        // Still pending: the contending run gave up at the lock
        let untouched = ctx.queue().get(item.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, QueueStatus::Pending);
        locks.release(&lease).await;
    }
}
