//! Lock row repository.
//!
//! The locks table provides the unique-row primitive the lock manager
//! builds its lease semantics on. At most one live row exists per
//! resource_id; the `lock_id` token makes release fencing possible.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use super::{parse_datetime, Result};

/// A lock row as stored.
#[derive(Debug, Clone)]
pub struct LockRow {
    pub resource_id: String,
    pub lock_id: String,
    pub expires_at: DateTime<Utc>,
}

fn row_to_lock(row: &SqliteRow) -> std::result::Result<LockRow, sqlx::Error> {
    Ok(LockRow {
        resource_id: row.try_get("resource_id")?,
        lock_id: row.try_get("lock_id")?,
        expires_at: parse_datetime(&row.try_get::<String, _>("expires_at")?),
    })
}

pub struct LockRepository {
    pool: SqlitePool,
}

impl LockRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Attempt to create the lock row. Returns false on a key collision.
    pub async fn try_insert(
        &self,
        resource_id: &str,
        lock_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO locks (resource_id, lock_id, expires_at) VALUES (?, ?, ?)",
        )
        .bind(resource_id)
        .bind(lock_id)
        .bind(expires_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, resource_id: &str) -> Result<Option<LockRow>> {
        let row = sqlx::query("SELECT * FROM locks WHERE resource_id = ?")
            .bind(resource_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_lock).transpose()?)
    }

    /// Delete only the exact (resource_id, lock_id) row. Returns whether a
    /// row was removed, so callers can detect a lost lease.
    pub async fn delete_exact(&self, resource_id: &str, lock_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM locks WHERE resource_id = ? AND lock_id = ?")
            .bind(resource_id)
            .bind(lock_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete all expired rows. Returns the number removed.
    pub async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM locks WHERE expires_at < ?")
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM locks")
            .fetch_one(&self.pool)
            .await?)
    }
}
