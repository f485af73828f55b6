//! Error event repository, the durable side of the error sink.

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use super::Result;

/// An error record ready for persistence.
#[derive(Debug, Clone)]
pub struct StoredErrorEvent {
    pub message: String,
    pub error_type: String,
    pub stack: Option<String>,
    /// Structured context, already redacted by the sink.
    pub context: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

pub struct ErrorEventRepository {
    pool: SqlitePool,
}

impl ErrorEventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a flushed buffer of events in one transaction.
    pub async fn insert_batch(&self, events: &[StoredErrorEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for event in events {
            sqlx::query(
                r#"
                INSERT INTO error_events (message, error_type, stack, context, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&event.message)
            .bind(&event.error_type)
            .bind(&event.stack)
            .bind(event.context.to_string())
            .bind(event.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM error_events")
            .fetch_one(&self.pool)
            .await?)
    }

    /// Occurrence counts by type over the last 24 hours.
    pub async fn recent_type_counts(&self) -> Result<Vec<(String, i64)>> {
        let since = (Utc::now() - Duration::hours(24)).to_rfc3339();
        let rows = sqlx::query(
            r#"
            SELECT error_type, COUNT(*) AS n FROM error_events
            WHERE created_at >= ?
            GROUP BY error_type
            ORDER BY n DESC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| {
                Ok::<_, sqlx::Error>((
                    row.try_get::<String, _>("error_type")?,
                    row.try_get::<i64, _>("n")?,
                ))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?)
    }
}
