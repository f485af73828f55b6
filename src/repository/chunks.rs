//! Transcript chunk repository.

use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use super::Result;
use crate::models::TranscriptChunk;

pub struct ChunkRepository {
    pool: SqlitePool,
}

fn row_to_chunk(row: &SqliteRow) -> std::result::Result<TranscriptChunk, sqlx::Error> {
    let keywords: String = row.try_get("keywords")?;
    let embedding: Option<Vec<u8>> = row.try_get("embedding")?;
    Ok(TranscriptChunk {
        id: row.try_get("id")?,
        video_id: row.try_get("video_id")?,
        chunk_index: row.try_get("chunk_index")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        byte_offset: row.try_get("byte_offset")?,
        byte_length: row.try_get("byte_length")?,
        preview: row.try_get("preview")?,
        keywords: serde_json::from_str(&keywords).unwrap_or_default(),
        embedding: embedding
            .as_deref()
            .and_then(TranscriptChunk::embedding_from_blob),
    })
}

impl ChunkRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Atomically replace a video's chunk set.
    ///
    /// Readers see either the old set or the new set, never a mixture.
    pub async fn replace_for_video(
        &self,
        video_id: i64,
        chunks: &[TranscriptChunk],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM transcript_chunks WHERE video_id = ?")
            .bind(video_id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO transcript_chunks (
                    video_id, chunk_index, start_time, end_time,
                    byte_offset, byte_length, preview, keywords, embedding
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(video_id)
            .bind(chunk.chunk_index)
            .bind(chunk.start_time)
            .bind(chunk.end_time)
            .bind(chunk.byte_offset)
            .bind(chunk.byte_length)
            .bind(&chunk.preview)
            .bind(serde_json::to_string(&chunk.keywords).unwrap_or_else(|_| "[]".into()))
            .bind(
                chunk
                    .embedding
                    .as_deref()
                    .map(TranscriptChunk::embedding_to_blob),
            )
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// All chunks for one video, in chunk order.
    pub async fn get_by_video(&self, video_id: i64) -> Result<Vec<TranscriptChunk>> {
        let rows = sqlx::query(
            "SELECT * FROM transcript_chunks WHERE video_id = ? ORDER BY chunk_index ASC",
        )
        .bind(video_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(row_to_chunk)
            .collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// All chunks for every video of a channel, in (video, chunk) order.
    pub async fn get_by_channel(&self, channel_id: i64) -> Result<Vec<TranscriptChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.* FROM transcript_chunks c
            JOIN videos v ON v.id = c.video_id
            WHERE v.channel_id = ?
            ORDER BY c.video_id ASC, c.chunk_index ASC
            "#,
        )
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(row_to_chunk)
            .collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub async fn count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM transcript_chunks")
            .fetch_one(&self.pool)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use crate::models::TranscriptChunk;
    use crate::repository::test_context;

    fn chunk(video_id: i64, index: i64, offset: i64, length: i64) -> TranscriptChunk {
        TranscriptChunk {
            id: 0,
            video_id,
            chunk_index: index,
            start_time: index * 60,
            end_time: (index + 1) * 60,
            byte_offset: offset,
            byte_length: length,
            preview: format!("chunk {index}"),
            keywords: vec!["keyword".into()],
            embedding: Some(vec![0.1, 0.2, 0.3]),
        }
    }

    #[tokio::test]
    async fn test_replace_for_video_round_trip() {
        let (ctx, _dir) = test_context().await;
        let video = ctx
            .videos()
            .upsert_placeholder("v1", None, "V", None)
            .await
            .unwrap();
        let repo = ctx.chunks();

        repo.replace_for_video(video.id, &[chunk(video.id, 0, 0, 100), chunk(video.id, 1, 100, 80)])
            .await
            .unwrap();

        let loaded = repo.get_by_video(video.id).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].chunk_index, 0);
        assert_eq!(loaded[1].byte_offset, 100);
        assert_eq!(loaded[0].embedding.as_deref(), Some(&[0.1_f32, 0.2, 0.3][..]));
        assert_eq!(loaded[0].keywords, vec!["keyword".to_string()]);
    }

    #[tokio::test]
    async fn test_replace_overwrites_previous_set() {
        let (ctx, _dir) = test_context().await;
        let video = ctx
            .videos()
            .upsert_placeholder("v2", None, "V", None)
            .await
            .unwrap();
        let repo = ctx.chunks();

        repo.replace_for_video(
            video.id,
            &[
                chunk(video.id, 0, 0, 10),
                chunk(video.id, 1, 10, 10),
                chunk(video.id, 2, 20, 10),
            ],
        )
        .await
        .unwrap();
        repo.replace_for_video(video.id, &[chunk(video.id, 0, 0, 30)])
            .await
            .unwrap();

        let loaded = repo.get_by_video(video.id).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].byte_length, 30);
    }

    #[tokio::test]
    async fn test_null_embedding_survives_round_trip() {
        let (ctx, _dir) = test_context().await;
        let video = ctx
            .videos()
            .upsert_placeholder("v3", None, "V", None)
            .await
            .unwrap();
        let repo = ctx.chunks();

        let mut c = chunk(video.id, 0, 0, 10);
        c.embedding = None;
        repo.replace_for_video(video.id, &[c]).await.unwrap();

        let loaded = repo.get_by_video(video.id).await.unwrap();
        assert!(loaded[0].embedding.is_none());
    }
}
