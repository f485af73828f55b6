//! Database context for managing the connection pool and repository access.
//!
//! Provides a unified entry point for database operations. Create one
//! context at startup, then use it to access all repositories.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use super::{
    CacheEntryRepository, ChannelRepository, ChatRepository, ChunkRepository,
    ErrorEventRepository, LockRepository, QueueRepository, RateEventRepository, Result,
    VideoRepository,
};

/// Database context that manages the connection pool and provides
/// repository access.
#[derive(Clone)]
pub struct DbContext {
    pool: SqlitePool,
}

impl DbContext {
    /// Create a new database context from a database URL.
    ///
    /// Supports SQLite URLs like `sqlite:path/to/db.sqlite` or
    /// `sqlite::memory:`. The database file is created if missing and the
    /// schema is initialized.
    pub async fn from_url(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(sqlx::Error::from)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let ctx = Self { pool };
        ctx.init_schema().await?;
        Ok(ctx)
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn channels(&self) -> ChannelRepository {
        ChannelRepository::new(self.pool.clone())
    }

    pub fn videos(&self) -> VideoRepository {
        VideoRepository::new(self.pool.clone())
    }

    pub fn chunks(&self) -> ChunkRepository {
        ChunkRepository::new(self.pool.clone())
    }

    pub fn queue(&self) -> QueueRepository {
        QueueRepository::new(self.pool.clone())
    }

    pub fn locks(&self) -> LockRepository {
        LockRepository::new(self.pool.clone())
    }

    pub fn rate_events(&self) -> RateEventRepository {
        RateEventRepository::new(self.pool.clone())
    }

    pub fn cache_entries(&self) -> CacheEntryRepository {
        CacheEntryRepository::new(self.pool.clone())
    }

    pub fn chat(&self) -> ChatRepository {
        ChatRepository::new(self.pool.clone())
    }

    pub fn error_events(&self) -> ErrorEventRepository {
        ErrorEventRepository::new(self.pool.clone())
    }

    /// Initialize all database schemas.
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS channels (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                external_id TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                video_count INTEGER NOT NULL DEFAULT 0,
                last_indexed_at TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS videos (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                external_id TEXT NOT NULL UNIQUE,
                channel_id INTEGER,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                duration_seconds INTEGER NOT NULL DEFAULT 0,
                transcript_cached INTEGER NOT NULL DEFAULT 0,
                chunks_processed INTEGER NOT NULL DEFAULT 0,
                processing_queued INTEGER NOT NULL DEFAULT 0,
                processing_error TEXT,
                transcript_blob_path TEXT,
                published_at TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (channel_id) REFERENCES channels(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transcript_chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                video_id INTEGER NOT NULL,
                chunk_index INTEGER NOT NULL,
                start_time INTEGER NOT NULL,
                end_time INTEGER NOT NULL,
                byte_offset INTEGER NOT NULL,
                byte_length INTEGER NOT NULL,
                preview TEXT NOT NULL DEFAULT '',
                keywords TEXT NOT NULL DEFAULT '[]',
                embedding BLOB,
                UNIQUE(video_id, chunk_index),
                FOREIGN KEY (video_id) REFERENCES videos(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS channel_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                channel_id INTEGER NOT NULL,
                requested_by TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                priority TEXT NOT NULL DEFAULT 'normal',
                retry_count INTEGER NOT NULL DEFAULT 0,
                total_videos INTEGER NOT NULL DEFAULT 0,
                videos_processed INTEGER NOT NULL DEFAULT 0,
                current_video_index INTEGER NOT NULL DEFAULT 0,
                current_video_title TEXT,
                started_at TEXT,
                completed_at TEXT,
                error_message TEXT,
                estimated_completion_at TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (channel_id) REFERENCES channels(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS locks (
                resource_id TEXT PRIMARY KEY,
                lock_id TEXT NOT NULL,
                expires_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rate_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                identifier TEXT NOT NULL,
                action TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT,
                video_id INTEGER,
                channel_id INTEGER,
                title TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                last_activity TEXT NOT NULL,
                message_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                citations TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES chat_sessions(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS error_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message TEXT NOT NULL,
                error_type TEXT NOT NULL,
                stack TEXT,
                context TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Indexes for the hot query paths
        for stmt in [
            "CREATE INDEX IF NOT EXISTS idx_videos_channel ON videos(channel_id)",
            "CREATE INDEX IF NOT EXISTS idx_chunks_video ON transcript_chunks(video_id)",
            "CREATE INDEX IF NOT EXISTS idx_queue_status_created ON channel_queue(status, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_rate_events_window ON rate_events(identifier, action, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_chat_messages_session ON chat_messages(session_id, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_error_events_created ON error_events(created_at)",
        ] {
            sqlx::query(stmt).execute(&self.pool).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::repository::test_context;

    #[tokio::test]
    async fn test_init_schema() {
        let (ctx, _dir) = test_context().await;
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(ctx.pool())
        .await
        .unwrap();

        for expected in [
            "cache_entries",
            "channel_queue",
            "channels",
            "chat_messages",
            "chat_sessions",
            "error_events",
            "locks",
            "rate_events",
            "transcript_chunks",
            "videos",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
    }
}
