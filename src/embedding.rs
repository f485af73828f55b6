//! Batched, rate-limit-aware text vectorization.
//!
//! The provider is called one text at a time, ten calls in parallel per
//! batch, with a pause between batches to stay inside provider rate limits.
//! A failed call yields a null vector for that input; the batch continues
//! and callers keep the affected chunk out of similarity scoring.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Embedding vector dimension.
pub const EMBEDDING_DIM: usize = 1536;

/// Texts embedded per batch.
const BATCH_SIZE: usize = 10;

/// Pause between batches.
const BATCH_PAUSE: Duration = Duration::from_millis(1000);

/// Single-text result cache capacity; oldest-inserted entries are evicted.
const CACHE_CAP: usize = 1000;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("api error: {0}")]
    Api(String),
    #[error("parse error: {0}")]
    Parse(String),
}

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;
}

/// OpenAI embeddings API backend.
pub struct OpenAiEmbeddings {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingsDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsDatum {
    embedding: Vec<f32>,
}

impl OpenAiEmbeddings {
    pub fn new(api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            model: "text-embedding-3-small".to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiEmbeddings {
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let resp = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "input": text,
            }))
            .send()
            .await
            .map_err(|e| EmbeddingError::Connection(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(EmbeddingError::Api(format!("HTTP {}: {}", status, body)));
        }

        let parsed: EmbeddingsResponse = resp
            .json()
            .await
            .map_err(|e| EmbeddingError::Parse(e.to_string()))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbeddingError::Parse("empty embeddings response".to_string()))
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Bounded single-text vector cache, evicting oldest-inserted on overflow.
struct VectorCache {
    entries: HashMap<String, Vec<f32>>,
    order: VecDeque<String>,
}

impl VectorCache {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, text: &str) -> Option<Vec<f32>> {
        self.entries.get(text).cloned()
    }

    fn insert(&mut self, text: String, vector: Vec<f32>) {
        if !self.entries.contains_key(&text) {
            while self.entries.len() >= CACHE_CAP {
                match self.order.pop_front() {
                    Some(oldest) => {
                        self.entries.remove(&oldest);
                    }
                    None => break,
                }
            }
            self.order.push_back(text.clone());
        }
        self.entries.insert(text, vector);
    }
}

/// Batched embedding client over a backend.
#[derive(Clone)]
pub struct EmbeddingClient {
    backend: Arc<dyn EmbeddingBackend>,
    cache: Arc<Mutex<VectorCache>>,
}

impl EmbeddingClient {
    pub fn new(backend: Arc<dyn EmbeddingBackend>) -> Self {
        Self {
            backend,
            cache: Arc::new(Mutex::new(VectorCache::new())),
        }
    }

    /// Embed a list of texts. Position k of the result corresponds to
    /// texts[k]; None marks a failed call.
    pub async fn embed(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());

        for (batch_index, batch) in texts.chunks(BATCH_SIZE).enumerate() {
            if batch_index > 0 {
                tokio::time::sleep(BATCH_PAUSE).await;
            }

            let calls = batch.iter().map(|text| self.embed_cached(text));
            results.extend(join_all(calls).await);
            debug!(
                "embedded batch {} ({} texts)",
                batch_index + 1,
                batch.len()
            );
        }

        results
    }

    /// Embed a single text, consulting the cache.
    pub async fn embed_query(&self, text: &str) -> Option<Vec<f32>> {
        self.embed_cached(text).await
    }

    async fn embed_cached(&self, text: &str) -> Option<Vec<f32>> {
        if let Some(hit) = self.cache.lock().await.get(text) {
            return Some(hit);
        }

        match self.backend.embed_one(text).await {
            Ok(vector) => {
                if vector.len() != self.backend.dimension() {
                    warn!(
                        "embedding dimension mismatch: got {}, expected {}",
                        vector.len(),
                        self.backend.dimension()
                    );
                    return None;
                }
                self.cache
                    .lock()
                    .await
                    .insert(text.to_string(), vector.clone());
                Some(vector)
            }
            Err(e) => {
                warn!("embedding call failed: {}", e);
                None
            }
        }
    }
}
