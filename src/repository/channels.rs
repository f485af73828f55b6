//! Channel repository.

use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use super::{parse_datetime, parse_datetime_opt, Result};
use crate::models::{Channel, ChannelStatus};

pub struct ChannelRepository {
    pool: SqlitePool,
}

fn row_to_channel(row: &SqliteRow) -> std::result::Result<Channel, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(Channel {
        id: row.try_get("id")?,
        external_id: row.try_get("external_id")?,
        title: row.try_get("title")?,
        status: ChannelStatus::parse(&status).unwrap_or(ChannelStatus::Pending),
        video_count: row.try_get("video_count")?,
        last_indexed_at: parse_datetime_opt(row.try_get("last_indexed_at")?),
        created_at: parse_datetime(&row.try_get::<String, _>("created_at")?),
    })
}

impl ChannelRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Look up a channel by provider id.
    pub async fn get_by_external_id(&self, external_id: &str) -> Result<Option<Channel>> {
        let row = sqlx::query("SELECT * FROM channels WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_channel).transpose()?)
    }

    pub async fn get(&self, id: i64) -> Result<Option<Channel>> {
        let row = sqlx::query("SELECT * FROM channels WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_channel).transpose()?)
    }

    /// Insert a new channel row and return it with its assigned id.
    pub async fn insert(&self, channel: &Channel) -> Result<Channel> {
        let result = sqlx::query(
            r#"
            INSERT INTO channels (external_id, title, status, video_count, last_indexed_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&channel.external_id)
        .bind(&channel.title)
        .bind(channel.status.as_str())
        .bind(channel.video_count)
        .bind(channel.last_indexed_at.map(|dt| dt.to_rfc3339()))
        .bind(channel.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let mut saved = channel.clone();
        saved.id = result.last_insert_rowid();
        Ok(saved)
    }

    /// Get an existing channel or create a pending one.
    pub async fn get_or_create(&self, external_id: &str, title: &str) -> Result<Channel> {
        if let Some(existing) = self.get_by_external_id(external_id).await? {
            return Ok(existing);
        }
        self.insert(&Channel::new(external_id.to_string(), title.to_string()))
            .await
    }

    pub async fn set_status(&self, id: i64, status: ChannelStatus) -> Result<()> {
        sqlx::query("UPDATE channels SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_title(&self, id: i64, title: &str) -> Result<()> {
        sqlx::query("UPDATE channels SET title = ? WHERE id = ?")
            .bind(title)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a completed index run.
    pub async fn mark_indexed(&self, id: i64, video_count: i64) -> Result<()> {
        sqlx::query(
            "UPDATE channels SET status = 'ready', video_count = ?, last_indexed_at = ? WHERE id = ?",
        )
        .bind(video_count)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Channels that have completed indexing (for the refresh tick).
    pub async fn list_ready(&self) -> Result<Vec<Channel>> {
        let rows = sqlx::query("SELECT * FROM channels WHERE status = 'ready' ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(row_to_channel)
            .collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub async fn count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM channels")
            .fetch_one(&self.pool)
            .await?)
    }
}
