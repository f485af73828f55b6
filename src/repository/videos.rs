//! Video repository.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use super::{parse_datetime, parse_datetime_opt, Result};
use crate::models::Video;

pub struct VideoRepository {
    pool: SqlitePool,
}

fn row_to_video(row: &SqliteRow) -> std::result::Result<Video, sqlx::Error> {
    Ok(Video {
        id: row.try_get("id")?,
        external_id: row.try_get("external_id")?,
        channel_id: row.try_get("channel_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        duration_seconds: row.try_get("duration_seconds")?,
        transcript_cached: row.try_get::<i64, _>("transcript_cached")? != 0,
        chunks_processed: row.try_get::<i64, _>("chunks_processed")? != 0,
        processing_queued: row.try_get::<i64, _>("processing_queued")? != 0,
        processing_error: row.try_get("processing_error")?,
        transcript_blob_path: row.try_get("transcript_blob_path")?,
        published_at: parse_datetime_opt(row.try_get("published_at")?),
        created_at: parse_datetime(&row.try_get::<String, _>("created_at")?),
    })
}

impl VideoRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: i64) -> Result<Option<Video>> {
        let row = sqlx::query("SELECT * FROM videos WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_video).transpose()?)
    }

    pub async fn get_by_external_id(&self, external_id: &str) -> Result<Option<Video>> {
        let row = sqlx::query("SELECT * FROM videos WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_video).transpose()?)
    }

    /// Insert a new row and return it with its assigned id.
    pub async fn insert(&self, video: &Video) -> Result<Video> {
        let result = sqlx::query(
            r#"
            INSERT INTO videos (
                external_id, channel_id, title, description, duration_seconds,
                transcript_cached, chunks_processed, processing_queued,
                processing_error, transcript_blob_path, published_at, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&video.external_id)
        .bind(video.channel_id)
        .bind(&video.title)
        .bind(&video.description)
        .bind(video.duration_seconds)
        .bind(video.transcript_cached as i64)
        .bind(video.chunks_processed as i64)
        .bind(video.processing_queued as i64)
        .bind(&video.processing_error)
        .bind(&video.transcript_blob_path)
        .bind(video.published_at.map(|dt| dt.to_rfc3339()))
        .bind(video.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let mut saved = video.clone();
        saved.id = result.last_insert_rowid();
        Ok(saved)
    }

    /// Get an existing row or insert a placeholder for an unprocessed video.
    pub async fn upsert_placeholder(
        &self,
        external_id: &str,
        channel_id: Option<i64>,
        title: &str,
        published_at: Option<DateTime<Utc>>,
    ) -> Result<Video> {
        if let Some(existing) = self.get_by_external_id(external_id).await? {
            return Ok(existing);
        }
        let mut placeholder =
            Video::placeholder(external_id.to_string(), channel_id, title.to_string());
        placeholder.published_at = published_at;
        self.insert(&placeholder).await
    }

    /// Update provider metadata after a successful lookup.
    pub async fn update_metadata(
        &self,
        id: i64,
        title: &str,
        description: &str,
        duration_seconds: i64,
        published_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE videos
            SET title = ?, description = ?, duration_seconds = ?, published_at = ?
            WHERE id = ?
            "#,
        )
        .bind(title)
        .bind(description)
        .bind(duration_seconds)
        .bind(published_at.map(|dt| dt.to_rfc3339()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a completed pipeline run for a video.
    pub async fn mark_processed(&self, id: i64, blob_path: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE videos
            SET transcript_cached = 1, chunks_processed = 1, processing_queued = 0,
                processing_error = NULL, transcript_blob_path = ?
            WHERE id = ?
            "#,
        )
        .bind(blob_path)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a pipeline failure for a video.
    pub async fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE videos
            SET transcript_cached = 0, processing_queued = 0, processing_error = ?
            WHERE id = ?
            "#,
        )
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Attach a previously ad-hoc video to a channel.
    pub async fn set_channel(&self, id: i64, channel_id: i64) -> Result<()> {
        sqlx::query("UPDATE videos SET channel_id = ? WHERE id = ?")
            .bind(channel_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Flag a video for pickup by the video dispatch tick.
    pub async fn set_queued(&self, id: i64, queued: bool) -> Result<()> {
        sqlx::query("UPDATE videos SET processing_queued = ? WHERE id = ?")
            .bind(queued as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Videos flagged for processing that have no transcript yet, oldest first.
    pub async fn fetch_queued_unprocessed(&self, limit: i64) -> Result<Vec<Video>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM videos
            WHERE processing_queued = 1 AND transcript_cached = 0
            ORDER BY created_at ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(row_to_video)
            .collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub async fn list_by_channel(&self, channel_id: i64) -> Result<Vec<Video>> {
        let rows = sqlx::query("SELECT * FROM videos WHERE channel_id = ? ORDER BY id")
            .bind(channel_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(row_to_video)
            .collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Publish date of the channel's newest known video.
    pub async fn newest_published_at(&self, channel_id: i64) -> Result<Option<DateTime<Utc>>> {
        let newest: Option<String> = sqlx::query_scalar(
            r#"
            SELECT published_at FROM videos
            WHERE channel_id = ? AND published_at IS NOT NULL
            ORDER BY published_at DESC
            LIMIT 1
            "#,
        )
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(super::parse_datetime_opt(newest))
    }

    pub async fn count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM videos")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn count_processed(&self) -> Result<i64> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM videos WHERE chunks_processed = 1")
                .fetch_one(&self.pool)
                .await?,
        )
    }
}
