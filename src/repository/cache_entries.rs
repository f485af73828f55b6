//! Backing-store tier of the two-tier cache.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use super::{parse_datetime, Result};

pub struct CacheEntryRepository {
    pool: SqlitePool,
}

impl CacheEntryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch a non-expired entry.
    pub async fn get(&self, key: &str) -> Result<Option<(String, DateTime<Utc>)>> {
        let row = sqlx::query("SELECT value, expires_at FROM cache_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else { return Ok(None) };
        let value: String = row.try_get("value")?;
        let expires_at = parse_datetime(&row.try_get::<String, _>("expires_at")?);
        if expires_at <= Utc::now() {
            return Ok(None);
        }
        Ok(Some((value, expires_at)))
    }

    /// Insert or replace an entry.
    pub async fn set(&self, key: &str, value: &str, expires_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO cache_entries (key, value, expires_at) VALUES (?, ?, ?)",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove expired entries.
    pub async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= ?")
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries")
            .fetch_one(&self.pool)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::repository::test_context;

    #[tokio::test]
    async fn test_set_get_and_expiry() {
        let (ctx, _dir) = test_context().await;
        let repo = ctx.cache_entries();

        repo.set("k1", "v1", Utc::now() + Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(repo.get("k1").await.unwrap().unwrap().0, "v1");

        // An already-expired entry reads as a miss
        repo.set("k2", "v2", Utc::now() - Duration::seconds(1))
            .await
            .unwrap();
        assert!(repo.get("k2").await.unwrap().is_none());

        assert_eq!(repo.delete_expired(Utc::now()).await.unwrap(), 1);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_set_replaces_value() {
        let (ctx, _dir) = test_context().await;
        let repo = ctx.cache_entries();
        let expires = Utc::now() + Duration::minutes(5);

        repo.set("k", "old", expires).await.unwrap();
        repo.set("k", "new", expires).await.unwrap();
        assert_eq!(repo.get("k").await.unwrap().unwrap().0, "new");
    }
}
