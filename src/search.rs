//! Hybrid retrieval over transcript chunks.
//!
//! Semantic cosine scores and symbolic keyword matches are merged with
//! additive boosts; channel search additionally diversifies across videos
//! before the final cut. Chunk text is hydrated from the transcript blob
//! by timestamp range.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::chunker;
use crate::embedding::EmbeddingClient;
use crate::error::Result;
use crate::models::{Channel, TranscriptChunk, Video};
use crate::repository::{ChunkRepository, VideoRepository};
use crate::storage::BlobStore;

/// Boost for a keyword match on a chunk already in the semantic top set.
const KEYWORD_TOPSET_BOOST: f32 = 0.3;

/// Base score for a keyword-only match outside the semantic top set.
const KEYWORD_BASE_SCORE: f32 = 0.5;

/// Per-hit boost for query keywords found in the chunk preview (video
/// search only).
const PREVIEW_HIT_BOOST: f32 = 0.1;

/// Most videos allowed to dominate a diversified channel result.
const DIVERSITY_VIDEO_FLOOR: usize = 3;

/// One ranked retrieval hit with hydrated text.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: i64,
    pub video_id: i64,
    pub video_external_id: String,
    pub video_title: String,
    pub chunk_index: i64,
    pub start_time: i64,
    pub end_time: i64,
    pub score: f32,
    pub text: String,
}

/// Hybrid retrieval engine over per-video and per-channel corpora.
#[derive(Clone)]
pub struct RetrievalEngine {
    chunks: Arc<ChunkRepository>,
    videos: Arc<VideoRepository>,
    embeddings: EmbeddingClient,
    blobs: BlobStore,
}

impl RetrievalEngine {
    pub fn new(
        chunks: ChunkRepository,
        videos: VideoRepository,
        embeddings: EmbeddingClient,
        blobs: BlobStore,
    ) -> Self {
        Self {
            chunks: Arc::new(chunks),
            videos: Arc::new(videos),
            embeddings,
            blobs,
        }
    }

    /// Search the chunks of one video.
    pub async fn video_search(&self, video: &Video, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let chunks = self.chunks.get_by_video(video.id).await?;
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored = self.score(&chunks, query, k, true).await;
        scored.truncate(k);

        let videos = HashMap::from([(video.id, video.clone())]);
        Ok(self.hydrate(scored, &videos).await)
    }

    /// Search every chunk of a channel's videos, diversified across videos.
    pub async fn channel_search(
        &self,
        channel: &Channel,
        query: &str,
        k: usize,
    ) -> Result<Vec<SearchHit>> {
        let chunks = self.chunks.get_by_channel(channel.id).await?;
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let scored = self.score(&chunks, query, k, false).await;

        // Diversification: cap chunks per video before the final cut
        let distinct_videos = {
            let mut ids: Vec<i64> = scored.iter().map(|(c, _)| c.video_id).collect();
            ids.sort_unstable();
            ids.dedup();
            ids.len()
        };
        let per_video_cap = k.div_ceil(distinct_videos.min(DIVERSITY_VIDEO_FLOOR).max(1));

        let mut taken_per_video: HashMap<i64, usize> = HashMap::new();
        let mut selected = Vec::with_capacity(k);
        for (chunk, score) in scored {
            let taken = taken_per_video.entry(chunk.video_id).or_insert(0);
            if *taken >= per_video_cap {
                continue;
            }
            *taken += 1;
            selected.push((chunk, score));
            if selected.len() >= k {
                break;
            }
        }

        let video_rows = self.videos.list_by_channel(channel.id).await?;
        let videos: HashMap<i64, Video> = video_rows.into_iter().map(|v| (v.id, v)).collect();
        Ok(self.hydrate(selected, &videos).await)
    }

    /// Score chunks against the query and return them sorted descending.
    async fn score(
        &self,
        chunks: &[TranscriptChunk],
        query: &str,
        k: usize,
        preview_boost: bool,
    ) -> Vec<(TranscriptChunk, f32)> {
        let query_vector = self.embeddings.embed_query(query).await;
        let query_keywords = chunker::extract_query_keywords(query);

        // Semantic pass; null-vector chunks score zero but stay eligible
        // for keyword-only matches.
        let semantic: Vec<f32> = chunks
            .iter()
            .map(|chunk| match (&query_vector, &chunk.embedding) {
                (Some(q), Some(v)) => cosine_similarity(q, v),
                _ => 0.0,
            })
            .collect();

        // The semantic top set: the k best chunks by cosine alone. Chunks
        // without a vector can never be in it.
        let mut by_semantic: Vec<usize> = (0..chunks.len())
            .filter(|&i| query_vector.is_some() && chunks[i].embedding.is_some())
            .collect();
        by_semantic.sort_by(|&a, &b| {
            semantic[b]
                .partial_cmp(&semantic[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let top_set: std::collections::HashSet<usize> =
            by_semantic.into_iter().take(k).collect();

        let mut scored: Vec<(TranscriptChunk, f32)> = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                let keyword_match = query_keywords.iter().any(|qk| {
                    chunk
                        .keywords
                        .iter()
                        .any(|ck| ck.contains(qk.as_str()) || qk.contains(ck.as_str()))
                });

                let mut score = if keyword_match {
                    if top_set.contains(&i) {
                        semantic[i] + KEYWORD_TOPSET_BOOST
                    } else {
                        KEYWORD_BASE_SCORE
                    }
                } else {
                    semantic[i]
                };

                if preview_boost && keyword_match {
                    let preview = chunk.preview.to_lowercase();
                    let hits = query_keywords
                        .iter()
                        .filter(|qk| preview.contains(qk.as_str()))
                        .count();
                    score += PREVIEW_HIT_BOOST * hits as f32;
                }

                (chunk.clone(), score)
            })
            .collect();

        // Ties break toward earlier chunks, then lower video row ids
        scored.sort_by(|(a, sa), (b, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_index.cmp(&b.chunk_index))
                .then_with(|| a.video_id.cmp(&b.video_id))
        });

        debug!(
            "scored {} chunks for query ({} keywords)",
            scored.len(),
            query_keywords.len()
        );
        scored
    }

    /// Materialize full chunk text from the transcript blobs.
    async fn hydrate(
        &self,
        selected: Vec<(TranscriptChunk, f32)>,
        videos: &HashMap<i64, Video>,
    ) -> Vec<SearchHit> {
        let mut blob_cache: HashMap<i64, Option<String>> = HashMap::new();
        let mut hits = Vec::with_capacity(selected.len());

        for (chunk, score) in selected {
            let Some(video) = videos.get(&chunk.video_id) else {
                continue;
            };

            let blob = match blob_cache.get(&chunk.video_id) {
                Some(cached) => cached.clone(),
                None => {
                    let loaded = match self.blobs.read_transcript(&video.external_id).await {
                        Ok(text) => Some(text),
                        Err(e) => {
                            warn!("blob read failed for {}: {}", video.external_id, e);
                            None
                        }
                    };
                    blob_cache.insert(chunk.video_id, loaded.clone());
                    loaded
                }
            };

            let text = match blob {
                Some(blob) => lines_in_range(&blob, chunk.start_time, chunk.end_time),
                None => chunk.preview.clone(),
            };

            hits.push(SearchHit {
                chunk_id: chunk.id,
                video_id: chunk.video_id,
                video_external_id: video.external_id.clone(),
                video_title: video.title.clone(),
                chunk_index: chunk.chunk_index,
                start_time: chunk.start_time,
                end_time: chunk.end_time,
                score,
                text,
            });
        }

        hits
    }
}

/// Cosine similarity; zero for mismatched or zero-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Collect transcript lines whose timestamps fall inside the range.
fn lines_in_range(blob: &str, start_time: i64, end_time: i64) -> String {
    blob.lines()
        .filter(|line| {
            chunker::parse_line_timestamp(line)
                .map(|ts| ts >= start_time && ts <= end_time)
                .unwrap_or(false)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::embedding::{EmbeddingBackend, EmbeddingError};
    use crate::models::TranscriptChunk;
    use crate::repository::test_context;

    /// Maps known strings to fixed unit vectors so cosine scores are exact.
    struct VectorTable;

    #[async_trait]
    impl EmbeddingBackend for VectorTable {
        async fn embed_one(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            Ok(match text {
                q if q.contains("ownership") => vec![1.0, 0.0, 0.0],
                _ => vec![0.0, 1.0, 0.0],
            })
        }

        fn dimension(&self) -> usize {
            3
        }
    }

    #[test]
    fn test_cosine_similarity_basics() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[1.0, 0.0]) - 0.7071).abs() < 1e-3);
        // Mismatched and zero vectors are defined as zero
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_lines_in_range() {
        let blob = "[00:00] intro\n[00:30] middle\n[01:10] late\n";
        assert_eq!(lines_in_range(blob, 0, 40), "[00:00] intro\n[00:30] middle");
        assert_eq!(lines_in_range(blob, 60, 80), "[01:10] late");
        assert_eq!(lines_in_range(blob, 200, 300), "");
    }

    fn chunk(video_id: i64, index: i64, keywords: &[&str], embedding: Option<Vec<f32>>, preview: &str) -> TranscriptChunk {
        TranscriptChunk {
            id: 0,
            video_id,
            chunk_index: index,
            start_time: index * 60,
            end_time: (index + 1) * 60,
            byte_offset: 0,
            byte_length: 0,
            preview: preview.to_string(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            embedding,
        }
    }

    async fn engine_with_video(
        chunks: Vec<TranscriptChunk>,
    ) -> (RetrievalEngine, Video, tempfile::TempDir, crate::repository::DbContext) {
        let (ctx, dir) = test_context().await;
        let video = ctx
            .videos()
            .upsert_placeholder("vid1", None, "Ownership Talk", None)
            .await
            .unwrap();
        let rows: Vec<TranscriptChunk> = chunks
            .into_iter()
            .map(|mut c| {
                c.video_id = video.id;
                c
            })
            .collect();
        ctx.chunks().replace_for_video(video.id, &rows).await.unwrap();

        let engine = RetrievalEngine::new(
            ctx.chunks(),
            ctx.videos(),
            EmbeddingClient::new(Arc::new(VectorTable)),
            BlobStore::new(dir.path().join("transcripts")),
        );
        let video = ctx.videos().get(video.id).await.unwrap().unwrap();
        (engine, video, dir, ctx)
    }

    #[tokio::test]
    async fn test_keyword_boost_reorders_results() {
        // A: strong semantic, no keyword overlap.
        // B: weaker semantic, keyword match with preview hits.
        let a = chunk(0, 0, &["lifetime"], Some(vec![1.0, 0.0, 0.0]), "lifetimes");
        let b = chunk(
            0,
            1,
            &["borrow", "checker"],
            Some(vec![0.8, 0.6, 0.0]),
            "the borrow checker explained",
        );
        let (engine, video, _dir, _ctx) = engine_with_video(vec![a, b]).await;

        let hits = engine
            .video_search(&video, "ownership borrow checker", 10)
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        // B: cosine 0.8 + 0.3 topset + 2 preview hits * 0.1 = 1.3 beats A's 1.0
        assert_eq!(hits[0].chunk_index, 1);
        assert!(hits[0].score > hits[1].score);
        assert!((hits[0].score - 1.3).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_null_vector_chunk_matches_by_keyword_only() {
        let silent = chunk(0, 0, &["borrow"], None, "borrow rules");
        let (engine, video, _dir, _ctx) = engine_with_video(vec![silent]).await;

        let hits = engine.video_search(&video, "borrow semantics", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score >= KEYWORD_BASE_SCORE);
    }

    #[tokio::test]
    async fn test_video_search_respects_k_and_ordering() {
        let chunks: Vec<TranscriptChunk> = (0..8)
            .map(|i| chunk(0, i, &["topic"], Some(vec![0.5, 0.5, 0.0]), "p"))
            .collect();
        let (engine, video, _dir, _ctx) = engine_with_video(chunks).await;

        let hits = engine.video_search(&video, "topic overview", 3).await.unwrap();
        assert_eq!(hits.len(), 3);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
            // Equal scores fall back to chunk order
            if (pair[0].score - pair[1].score).abs() < f32::EPSILON {
                assert!(pair[0].chunk_index < pair[1].chunk_index);
            }
        }
    }

    #[tokio::test]
    async fn test_channel_search_diversifies_across_videos() {
        let (ctx, dir) = test_context().await;
        let channel = ctx.channels().get_or_create("UC1", "C").await.unwrap();

        // Video 1 dominates on raw score with 7 hits; videos 2 and 3 have 3 each
        for (ext, count, weight) in [("v1", 7, 0.9f32), ("v2", 3, 0.5), ("v3", 3, 0.4)] {
            let video = ctx
                .videos()
                .upsert_placeholder(ext, Some(channel.id), ext, None)
                .await
                .unwrap();
            let rows: Vec<TranscriptChunk> = (0..count)
                .map(|i| chunk(video.id, i, &["topic"], Some(vec![weight, 1.0 - weight, 0.0]), "p"))
                .collect();
            ctx.chunks().replace_for_video(video.id, &rows).await.unwrap();
        }

        let engine = RetrievalEngine::new(
            ctx.chunks(),
            ctx.videos(),
            EmbeddingClient::new(Arc::new(VectorTable)),
            BlobStore::new(dir.path().join("transcripts")),
        );

        let hits = engine.channel_search(&channel, "topic overview", 9).await.unwrap();
        assert_eq!(hits.len(), 9);

        let mut per_video: HashMap<i64, usize> = HashMap::new();
        for hit in &hits {
            *per_video.entry(hit.video_id).or_insert(0) += 1;
        }
        // ceil(9 / min(3 videos, 3)) = 3 chunks per video
        assert_eq!(per_video.len(), 3);
        assert!(per_video.values().all(|&n| n == 3));

        // No duplicate chunk ids, strictly non-increasing scores
        let mut ids: Vec<i64> = hits.iter().map(|h| h.chunk_id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 9);
    }

    #[tokio::test]
    async fn test_hydration_reads_blob_lines() {
        let c = chunk(0, 0, &["intro"], Some(vec![1.0, 0.0, 0.0]), "preview only");
        let (engine, video, dir, _ctx) = engine_with_video(vec![c]).await;

        BlobStore::new(dir.path().join("transcripts"))
            .write_transcript("vid1", "[00:00] welcome everyone\n[00:30] intro ends\n[02:00] later\n")
            .await
            .unwrap();

        let hits = engine.video_search(&video, "ownership intro", 5).await.unwrap();
        assert_eq!(hits[0].text, "[00:00] welcome everyone\n[00:30] intro ends");
    }

    #[tokio::test]
    async fn test_missing_blob_falls_back_to_preview() {
        let c = chunk(0, 0, &["intro"], Some(vec![1.0, 0.0, 0.0]), "preview only");
        let (engine, video, _dir, _ctx) = engine_with_video(vec![c]).await;

        let hits = engine.video_search(&video, "ownership intro", 5).await.unwrap();
        assert_eq!(hits[0].text, "preview only");
    }
}
