//! Channel queue repository.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use super::{parse_datetime, parse_datetime_opt, Result};
use crate::models::{ChannelQueueItem, QueuePriority, QueueStatus};

pub struct QueueRepository {
    pool: SqlitePool,
}

fn row_to_item(row: &SqliteRow) -> std::result::Result<ChannelQueueItem, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let priority: String = row.try_get("priority")?;
    Ok(ChannelQueueItem {
        id: row.try_get("id")?,
        channel_id: row.try_get("channel_id")?,
        requested_by: row.try_get("requested_by")?,
        status: QueueStatus::parse(&status).unwrap_or(QueueStatus::Pending),
        priority: QueuePriority::parse(&priority).unwrap_or(QueuePriority::Normal),
        retry_count: row.try_get("retry_count")?,
        total_videos: row.try_get("total_videos")?,
        videos_processed: row.try_get("videos_processed")?,
        current_video_index: row.try_get("current_video_index")?,
        current_video_title: row.try_get("current_video_title")?,
        started_at: parse_datetime_opt(row.try_get("started_at")?),
        completed_at: parse_datetime_opt(row.try_get("completed_at")?),
        error_message: row.try_get("error_message")?,
        estimated_completion_at: parse_datetime_opt(row.try_get("estimated_completion_at")?),
        created_at: parse_datetime(&row.try_get::<String, _>("created_at")?),
    })
}

impl QueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, qid: i64) -> Result<Option<ChannelQueueItem>> {
        let row = sqlx::query("SELECT * FROM channel_queue WHERE id = ?")
            .bind(qid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_item).transpose()?)
    }

    /// Create a new pending queue row.
    pub async fn insert(
        &self,
        channel_id: i64,
        requested_by: Option<&str>,
        priority: QueuePriority,
    ) -> Result<ChannelQueueItem> {
        let created_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO channel_queue (channel_id, requested_by, status, priority, created_at)
            VALUES (?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(channel_id)
        .bind(requested_by)
        .bind(priority.as_str())
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let qid = result.last_insert_rowid();
        self.get(qid)
            .await?
            .ok_or_else(|| super::StoreError::Other(format!("queue row {qid} missing after insert")))
    }

    /// Newest pending/processing row for a channel, if any.
    pub async fn find_active_for_channel(
        &self,
        channel_id: i64,
    ) -> Result<Option<ChannelQueueItem>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM channel_queue
            WHERE channel_id = ? AND status IN ('pending', 'processing')
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_item).transpose()?)
    }

    /// Newest row of any status for a channel (for status endpoints).
    pub async fn latest_for_channel(&self, channel_id: i64) -> Result<Option<ChannelQueueItem>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM channel_queue
            WHERE channel_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_item).transpose()?)
    }

    /// Pending rows in dispatch order.
    pub async fn fetch_pending(&self, limit: i64) -> Result<Vec<ChannelQueueItem>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM channel_queue
            WHERE status = 'pending'
            ORDER BY created_at ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(row_to_item)
            .collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// 1-based position among pending rows; None when the row is not pending.
    pub async fn position(&self, qid: i64) -> Result<Option<i64>> {
        let item = match self.get(qid).await? {
            Some(item) if item.status == QueueStatus::Pending => item,
            _ => return Ok(None),
        };

        let earlier: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM channel_queue
            WHERE status = 'pending'
              AND (created_at < ?1 OR (created_at = ?1 AND id < ?2))
            "#,
        )
        .bind(item.created_at.to_rfc3339())
        .bind(item.id)
        .fetch_one(&self.pool)
        .await?;

        Ok(Some(earlier + 1))
    }

    /// Transition pending -> processing and stamp started_at.
    pub async fn mark_processing(&self, qid: i64) -> Result<()> {
        sqlx::query(
            "UPDATE channel_queue SET status = 'processing', started_at = ? WHERE id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(qid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record total and estimated completion once the listing is known.
    pub async fn set_totals(
        &self,
        qid: i64,
        total_videos: i64,
        estimated_completion_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE channel_queue SET total_videos = ?, estimated_completion_at = ? WHERE id = ?",
        )
        .bind(total_videos)
        .bind(estimated_completion_at.to_rfc3339())
        .bind(qid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Per-video progress while the pipeline holds the lease.
    pub async fn set_current_video(&self, qid: i64, index: i64, title: &str) -> Result<()> {
        sqlx::query(
            "UPDATE channel_queue SET current_video_index = ?, current_video_title = ? WHERE id = ?",
        )
        .bind(index)
        .bind(title)
        .bind(qid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_completed(&self, qid: i64, videos_processed: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE channel_queue
            SET status = 'completed', videos_processed = ?, completed_at = ?, error_message = NULL
            WHERE id = ?
            "#,
        )
        .bind(videos_processed)
        .bind(Utc::now().to_rfc3339())
        .bind(qid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, qid: i64, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE channel_queue SET status = 'failed', completed_at = ?, error_message = ? WHERE id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(error)
        .bind(qid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Reset failed rows with remaining retries back to pending.
    /// Returns the number of rows reset.
    pub async fn reset_failed(&self, limit: i64, max_retries: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE channel_queue
            SET status = 'pending', retry_count = retry_count + 1, error_message = NULL
            WHERE id IN (
                SELECT id FROM channel_queue
                WHERE status = 'failed' AND retry_count < ?
                ORDER BY created_at ASC
                LIMIT ?
            )
            "#,
        )
        .bind(max_retries)
        .bind(limit)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Garbage-collect completed rows older than the cutoff.
    pub async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM channel_queue WHERE status = 'completed' AND completed_at < ?",
        )
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Row counts by status.
    pub async fn status_counts(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM channel_queue GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| {
                Ok::<_, sqlx::Error>((row.try_get::<String, _>("status")?, row.try_get::<i64, _>("n")?))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?)
    }
}
