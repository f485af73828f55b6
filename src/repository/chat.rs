//! Chat session and message repository.

use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use super::{parse_datetime, Result};
use crate::models::{ChatMessage, ChatSession, Citation, MessageRole};

pub struct ChatRepository {
    pool: SqlitePool,
}

fn row_to_session(row: &SqliteRow) -> std::result::Result<ChatSession, sqlx::Error> {
    Ok(ChatSession {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        video_id: row.try_get("video_id")?,
        channel_id: row.try_get("channel_id")?,
        title: row.try_get("title")?,
        created_at: parse_datetime(&row.try_get::<String, _>("created_at")?),
        last_activity: parse_datetime(&row.try_get::<String, _>("last_activity")?),
        message_count: row.try_get("message_count")?,
    })
}

fn row_to_message(row: &SqliteRow) -> std::result::Result<ChatMessage, sqlx::Error> {
    let role: String = row.try_get("role")?;
    let citations: String = row.try_get("citations")?;
    Ok(ChatMessage {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        role: MessageRole::parse(&role).unwrap_or(MessageRole::User),
        content: row.try_get("content")?,
        citations: serde_json::from_str(&citations).unwrap_or_default(),
        created_at: parse_datetime(&row.try_get::<String, _>("created_at")?),
    })
}

impl ChatRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert_session(&self, session: &ChatSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chat_sessions (
                id, user_id, video_id, channel_id, title,
                created_at, last_activity, message_count
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(session.video_id)
        .bind(session.channel_id)
        .bind(&session.title)
        .bind(session.created_at.to_rfc3339())
        .bind(session.last_activity.to_rfc3339())
        .bind(session.message_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<ChatSession>> {
        let row = sqlx::query("SELECT * FROM chat_sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_session).transpose()?)
    }

    /// Append a message to a session.
    pub async fn insert_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
        citations: &[Citation],
    ) -> Result<ChatMessage> {
        let created_at = Utc::now();
        let citations_json = serde_json::to_string(citations).unwrap_or_else(|_| "[]".into());
        let result = sqlx::query(
            r#"
            INSERT INTO chat_messages (session_id, role, content, citations, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(session_id)
        .bind(role.as_str())
        .bind(content)
        .bind(&citations_json)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(ChatMessage {
            id: result.last_insert_rowid(),
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            citations: citations.to_vec(),
            created_at,
        })
    }

    /// Bump activity time and message count after a completed turn.
    pub async fn bump_session(&self, session_id: &str, added_messages: i64) -> Result<()> {
        sqlx::query(
            "UPDATE chat_sessions SET last_activity = ?, message_count = message_count + ? WHERE id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(added_messages)
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Messages for a session ordered by creation time, row id as tiebreak.
    pub async fn get_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            "SELECT * FROM chat_messages WHERE session_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(row_to_message)
            .collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use crate::models::{ChatSession, Citation, MessageRole};
    use crate::repository::test_context;

    #[tokio::test]
    async fn test_session_and_message_round_trip() {
        let (ctx, _dir) = test_context().await;
        let repo = ctx.chat();

        let session = ChatSession::for_video(Some("u-1".into()), 7, "About the intro".into());
        repo.insert_session(&session).await.unwrap();

        repo.insert_message(&session.id, MessageRole::User, "what is covered?", &[])
            .await
            .unwrap();
        let citations = vec![Citation::Extracted {
            timestamp: "2:15".into(),
            seconds: 135,
            text: "[2:15]".into(),
        }];
        repo.insert_message(
            &session.id,
            MessageRole::Assistant,
            "The intro covers setup [2:15].",
            &citations,
        )
        .await
        .unwrap();
        repo.bump_session(&session.id, 2).await.unwrap();

        let messages = repo.get_messages(&session.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].citations, citations);

        let refreshed = repo.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(refreshed.message_count, 2);
        assert!(refreshed.last_activity >= session.last_activity);
    }
}
