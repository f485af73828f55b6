//! Rate event repository: append-only action log for sliding windows.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;

use super::Result;

pub struct RateEventRepository {
    pool: SqlitePool,
}

impl RateEventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append one event for an identifier/action pair.
    pub async fn record(&self, identifier: &str, action: &str) -> Result<()> {
        sqlx::query("INSERT INTO rate_events (identifier, action, created_at) VALUES (?, ?, ?)")
            .bind(identifier)
            .bind(action)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Count events inside the sliding window `[since, now]`.
    pub async fn count_since(
        &self,
        identifier: &str,
        action: &str,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        Ok(sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM rate_events
            WHERE identifier = ? AND action = ? AND created_at >= ?
            "#,
        )
        .bind(identifier)
        .bind(action)
        .bind(since.to_rfc3339())
        .fetch_one(&self.pool)
        .await?)
    }

    /// Oldest event timestamp inside a window, used to compute reset times.
    pub async fn oldest_since(
        &self,
        identifier: &str,
        action: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let oldest: Option<String> = sqlx::query_scalar(
            r#"
            SELECT MIN(created_at) FROM rate_events
            WHERE identifier = ? AND action = ? AND created_at >= ?
            "#,
        )
        .bind(identifier)
        .bind(action)
        .bind(since.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;
        Ok(super::parse_datetime_opt(oldest))
    }

    /// Prune events older than the cutoff.
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM rate_events WHERE created_at < ?")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::repository::test_context;

    #[tokio::test]
    async fn test_count_scoped_to_identifier_and_action() {
        let (ctx, _dir) = test_context().await;
        let repo = ctx.rate_events();
        let since = Utc::now() - Duration::hours(1);

        repo.record("user:1", "chat").await.unwrap();
        repo.record("user:1", "chat").await.unwrap();
        repo.record("user:1", "video_upload").await.unwrap();
        repo.record("user:2", "chat").await.unwrap();

        assert_eq!(repo.count_since("user:1", "chat", since).await.unwrap(), 2);
        assert_eq!(
            repo.count_since("user:1", "video_upload", since)
                .await
                .unwrap(),
            1
        );
        assert_eq!(repo.count_since("user:3", "chat", since).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_prune_before() {
        let (ctx, _dir) = test_context().await;
        let repo = ctx.rate_events();

        repo.record("user:1", "chat").await.unwrap();
        // Nothing is older than an hour ago
        assert_eq!(
            repo.prune_before(Utc::now() - Duration::hours(1))
                .await
                .unwrap(),
            0
        );
        // Everything is older than a future cutoff
        assert_eq!(
            repo.prune_before(Utc::now() + Duration::seconds(1))
                .await
                .unwrap(),
            1
        );
    }
}
