//! Durable work queue and background dispatcher.
//!
//! Enqueue operations are idempotent: an active row for the same channel,
//! or an already-processed video, answers with the existing state instead
//! of new work. Dispatch ticks are safe to run on multiple instances
//! because the pipelines acquire per-resource leases before doing work.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::Cache;
use crate::error::{AppError, Result};
use crate::error_sink::ErrorSink;
use crate::lock::LockManager;
use crate::models::{QueuePriority, QueueStatus};
use crate::pipeline::{ChannelPipeline, VideoPipeline};
use crate::rate_limit::RateLimiter;
use crate::repository::{ChannelRepository, QueueRepository, VideoRepository};
use crate::youtube::VideoDirectory;

/// How many pending channel rows one tick dispatches.
const CHANNEL_DISPATCH_BATCH: i64 = 5;

/// How many queued videos one tick dispatches.
const VIDEO_DISPATCH_BATCH: i64 = 5;

/// How many failed rows one tick resets.
const RETRY_RESET_BATCH: i64 = 5;

/// Retries per queue item before it stays failed.
const MAX_RETRIES: i64 = 3;

/// Listing size when checking ready channels for new uploads.
const REFRESH_LISTING_MAX: usize = 10;

/// Completed rows are garbage-collected after this many days.
const COMPLETED_RETENTION_DAYS: i64 = 7;

/// Outcome of an enqueue request.
#[derive(Debug, Clone, Serialize)]
pub struct EnqueueOutcome {
    pub success: bool,
    pub message: String,
    #[serde(rename = "queueId", skip_serializing_if = "Option::is_none")]
    pub queue_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<QueueStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
}

/// Accepts ingestion requests and answers queue status questions.
#[derive(Clone)]
pub struct QueueService {
    channels: Arc<ChannelRepository>,
    videos: Arc<VideoRepository>,
    queue: Arc<QueueRepository>,
    channel_pipeline: Arc<ChannelPipeline>,
    video_pipeline: Arc<VideoPipeline>,
}

impl QueueService {
    pub fn new(
        channels: ChannelRepository,
        videos: VideoRepository,
        queue: QueueRepository,
        channel_pipeline: Arc<ChannelPipeline>,
        video_pipeline: Arc<VideoPipeline>,
    ) -> Self {
        Self {
            channels: Arc::new(channels),
            videos: Arc::new(videos),
            queue: Arc::new(queue),
            channel_pipeline,
            video_pipeline,
        }
    }

    /// Enqueue a channel for ingestion.
    pub async fn enqueue_channel(
        &self,
        channel_ref: &str,
        requested_by: Option<&str>,
        priority: QueuePriority,
    ) -> Result<EnqueueOutcome> {
        if channel_ref.trim().is_empty() {
            return Err(AppError::Input("channelId is required".to_string()));
        }

        let channel = self.channels.get_or_create(channel_ref, channel_ref).await?;

        if let Some(active) = self.queue.find_active_for_channel(channel.id).await? {
            let position = self.queue.position(active.id).await?;
            return Ok(EnqueueOutcome {
                success: false,
                message: "channel is already queued for processing".to_string(),
                queue_id: Some(active.id),
                status: Some(active.status),
                position,
            });
        }

        let item = self.queue.insert(channel.id, requested_by, priority).await?;
        info!(
            "enqueued channel {} as queue item {} ({})",
            channel_ref,
            item.id,
            priority.as_str()
        );

        if priority == QueuePriority::High {
            let pipeline = self.channel_pipeline.clone();
            let qid = item.id;
            tokio::spawn(async move {
                pipeline.process_queue_item(qid).await;
            });
        }

        let position = self.queue.position(item.id).await?;
        Ok(EnqueueOutcome {
            success: true,
            message: "channel queued for processing".to_string(),
            queue_id: Some(item.id),
            status: Some(item.status),
            position,
        })
    }

    /// Enqueue a single video for ingestion.
    pub async fn enqueue_video(
        &self,
        video_id: &str,
        _requested_by: Option<&str>,
        priority: QueuePriority,
    ) -> Result<EnqueueOutcome> {
        if video_id.trim().is_empty() {
            return Err(AppError::Input("videoId is required".to_string()));
        }

        if let Some(video) = self.videos.get_by_external_id(video_id).await? {
            if video.is_processed() {
                return Ok(EnqueueOutcome {
                    success: false,
                    message: "video is already processed".to_string(),
                    queue_id: None,
                    status: None,
                    position: None,
                });
            }
            if video.processing_queued {
                return Ok(EnqueueOutcome {
                    success: false,
                    message: "video is already queued".to_string(),
                    queue_id: None,
                    status: None,
                    position: None,
                });
            }
        }

        let video = self
            .videos
            .upsert_placeholder(video_id, None, video_id, None)
            .await?;
        self.videos.set_queued(video.id, true).await?;
        info!("queued video {} ({})", video_id, priority.as_str());

        if priority == QueuePriority::High {
            let pipeline = self.video_pipeline.clone();
            let external_id = video_id.to_string();
            tokio::spawn(async move {
                pipeline.process(&external_id).await;
            });
        }

        Ok(EnqueueOutcome {
            success: true,
            message: "video queued for processing".to_string(),
            queue_id: None,
            status: None,
            position: None,
        })
    }

    /// 1-based position among pending items; None when not pending.
    pub async fn position(&self, qid: i64) -> Result<Option<i64>> {
        Ok(self.queue.position(qid).await?)
    }

    /// Queue depth by status for the status endpoint.
    pub async fn status_counts(&self) -> Result<Vec<(String, i64)>> {
        Ok(self.queue.status_counts().await?)
    }
}

/// Last-run bookkeeping for one background tick.
#[derive(Debug, Clone, Serialize)]
pub struct TickStatus {
    #[serde(rename = "lastRun")]
    pub last_run: Option<DateTime<Utc>>,
    pub runs: u64,
    #[serde(rename = "intervalSecs")]
    pub interval_secs: u64,
}

/// Background tick owner. One instance runs all periodic work; every tick
/// is idempotent and lock-guarded at the callee.
pub struct Dispatcher {
    queue: Arc<QueueRepository>,
    videos: Arc<VideoRepository>,
    channels: Arc<ChannelRepository>,
    directory: Arc<dyn VideoDirectory>,
    channel_pipeline: Arc<ChannelPipeline>,
    video_pipeline: Arc<VideoPipeline>,
    locks: LockManager,
    cache: Cache,
    rate_limiter: RateLimiter,
    errors: ErrorSink,
    registry: Arc<RwLock<HashMap<&'static str, TickStatus>>>,
    shutdown: watch::Receiver<bool>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: QueueRepository,
        videos: VideoRepository,
        channels: ChannelRepository,
        directory: Arc<dyn VideoDirectory>,
        channel_pipeline: Arc<ChannelPipeline>,
        video_pipeline: Arc<VideoPipeline>,
        locks: LockManager,
        cache: Cache,
        rate_limiter: RateLimiter,
        errors: ErrorSink,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue: Arc::new(queue),
            videos: Arc::new(videos),
            channels: Arc::new(channels),
            directory,
            channel_pipeline,
            video_pipeline,
            locks,
            cache,
            rate_limiter,
            errors,
            registry: Arc::new(RwLock::new(HashMap::new())),
            shutdown,
        }
    }

    /// Tick registry snapshot for /api/cron/status.
    pub fn registry(&self) -> Arc<RwLock<HashMap<&'static str, TickStatus>>> {
        self.registry.clone()
    }

    /// Spawn every background loop. Handles finish when shutdown flips.
    pub fn spawn_all(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        vec![
            self.clone().spawn_tick("channel_dispatch", Duration::from_secs(5), |d| async move {
                d.dispatch_channels().await;
            }),
            self.clone().spawn_tick("video_dispatch", Duration::from_secs(30), |d| async move {
                d.dispatch_videos().await;
            }),
            self.clone().spawn_tick("retry_reset", Duration::from_secs(300), |d| async move {
                d.reset_failed().await;
            }),
            self.clone().spawn_tick("queue_gc", Duration::from_secs(86_400), |d| async move {
                d.garbage_collect().await;
            }),
            self.clone().spawn_tick("channel_refresh", Duration::from_secs(21_600), |d| async move {
                d.refresh_channels().await;
            }),
            self.clone().spawn_tick("lock_sweep", Duration::from_secs(60), |d| async move {
                d.locks.sweep().await;
            }),
            self.clone().spawn_tick("cache_sweep", Duration::from_secs(300), |d| async move {
                d.cache.sweep().await;
            }),
            self.clone().spawn_tick("error_flush", Duration::from_secs(30), |d| async move {
                d.errors.flush().await;
            }),
        ]
    }

    fn spawn_tick<F, Fut>(
        self: Arc<Self>,
        name: &'static str,
        interval: Duration,
        work: F,
    ) -> JoinHandle<()>
    where
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            {
                let mut registry = self.registry.write().await;
                registry.insert(
                    name,
                    TickStatus {
                        last_run: None,
                        runs: 0,
                        interval_secs: interval.as_secs(),
                    },
                );
            }

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first interval tick fires immediately; skip it so a fresh
            // deploy does not stampede every loop at once.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        work(self.clone()).await;
                        let mut registry = self.registry.write().await;
                        if let Some(status) = registry.get_mut(name) {
                            status.last_run = Some(Utc::now());
                            status.runs += 1;
                        }
                    }
                    _ = shutdown.changed() => {
                        debug!("tick {} stopping", name);
                        break;
                    }
                }
            }
        })
    }

    /// Dispatch pending channel queue rows, oldest first, in parallel.
    async fn dispatch_channels(&self) {
        let pending = match self.queue.fetch_pending(CHANNEL_DISPATCH_BATCH).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("channel dispatch query failed: {}", e);
                return;
            }
        };

        for item in pending {
            let pipeline = self.channel_pipeline.clone();
            tokio::spawn(async move {
                pipeline.process_queue_item(item.id).await;
            });
        }
    }

    /// Dispatch queued, unprocessed videos.
    async fn dispatch_videos(&self) {
        let queued = match self.videos.fetch_queued_unprocessed(VIDEO_DISPATCH_BATCH).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("video dispatch query failed: {}", e);
                return;
            }
        };

        for video in queued {
            let pipeline = self.video_pipeline.clone();
            tokio::spawn(async move {
                pipeline.process(&video.external_id).await;
            });
        }
    }

    /// Put failed rows with remaining retries back in the queue.
    async fn reset_failed(&self) {
        match self.queue.reset_failed(RETRY_RESET_BATCH, MAX_RETRIES).await {
            Ok(0) => {}
            Ok(n) => info!("reset {} failed queue items for retry", n),
            Err(e) => warn!("retry reset failed: {}", e),
        }
    }

    /// Drop old completed rows and stale rate events.
    async fn garbage_collect(&self) {
        let cutoff = Utc::now() - chrono::Duration::days(COMPLETED_RETENTION_DAYS);
        match self.queue.delete_completed_before(cutoff).await {
            Ok(0) => {}
            Ok(n) => info!("garbage-collected {} completed queue items", n),
            Err(e) => warn!("queue gc failed: {}", e),
        }
        self.rate_limiter.prune().await;
    }

    /// Look for new uploads on every ready channel and queue them.
    async fn refresh_channels(&self) {
        let ready = match self.channels.list_ready().await {
            Ok(channels) => channels,
            Err(e) => {
                warn!("channel refresh query failed: {}", e);
                return;
            }
        };

        for channel in ready {
            let newest = match self.videos.newest_published_at(channel.id).await {
                Ok(Some(ts)) => ts,
                _ => continue,
            };

            // The stored reference may be a handle; resolve before listing
            let info = match self.directory.resolve_channel(&channel.external_id).await {
                Ok(info) => info,
                Err(e) => {
                    warn!("refresh resolution failed for {}: {}", channel.external_id, e);
                    continue;
                }
            };

            let listings = match self
                .directory
                .list_videos(&info.channel_id, REFRESH_LISTING_MAX, Some(newest))
                .await
            {
                Ok(listings) => listings,
                Err(e) => {
                    warn!("refresh listing failed for {}: {}", channel.external_id, e);
                    continue;
                }
            };

            for listing in listings {
                match self
                    .videos
                    .upsert_placeholder(
                        &listing.video_id,
                        Some(channel.id),
                        &listing.title,
                        listing.published_at,
                    )
                    .await
                {
                    Ok(video) if !video.is_processed() => {
                        if let Err(e) = self.videos.set_queued(video.id, true).await {
                            warn!("could not queue new video {}: {}", listing.video_id, e);
                        } else {
                            info!(
                                "queued new upload {} from channel {}",
                                listing.video_id, channel.external_id
                            );
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!("refresh upsert failed for {}: {}", listing.video_id, e),
                }
            }
        }
    }
}
