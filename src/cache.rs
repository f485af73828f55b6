//! Two-tier (memory + store) keyed cache with TTL.
//!
//! Reads probe the memory tier first, then the store; store hits warm the
//! memory tier. Writes populate both. There is no cross-instance
//! consistency guarantee - instances converge via TTL.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::repository::CacheEntryRepository;

/// Default TTL for cached values.
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

/// TTL for video summaries, which are expensive to regenerate.
pub const SUMMARY_TTL: Duration = Duration::from_secs(60 * 60);

/// Memory tier entry cap. The original design had no cap; bounding it keeps
/// a long-lived process from growing without limit.
const MEMORY_CAP: usize = 10_000;

struct MemoryEntry {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Insertion-order bounded map for the memory tier.
struct MemoryTier {
    entries: HashMap<String, MemoryEntry>,
    order: VecDeque<String>,
}

impl MemoryTier {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).and_then(|entry| {
            if entry.expires_at > Utc::now() {
                Some(entry.value.clone())
            } else {
                None
            }
        })
    }

    fn insert(&mut self, key: String, value: String, expires_at: DateTime<Utc>) {
        if !self.entries.contains_key(&key) {
            while self.entries.len() >= MEMORY_CAP {
                match self.order.pop_front() {
                    Some(oldest) => {
                        self.entries.remove(&oldest);
                    }
                    None => break,
                }
            }
            self.order.push_back(key.clone());
        }
        self.entries.insert(key, MemoryEntry { value, expires_at });
    }

    fn prune_expired(&mut self) {
        let now = Utc::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
        self.order.retain(|key| self.entries.contains_key(key));
    }
}

/// Two-tier keyed cache.
#[derive(Clone)]
pub struct Cache {
    memory: Arc<Mutex<MemoryTier>>,
    store: Arc<CacheEntryRepository>,
}

impl Cache {
    pub fn new(store: CacheEntryRepository) -> Self {
        Self {
            memory: Arc::new(Mutex::new(MemoryTier::new())),
            store: Arc::new(store),
        }
    }

    /// Build a cache key: `<prefix>:<md5(params joined with ":")>`.
    pub fn key(prefix: &str, params: &[&str]) -> String {
        let mut hasher = Md5::new();
        hasher.update(params.join(":").as_bytes());
        format!("{}:{}", prefix, hex::encode(hasher.finalize()))
    }

    /// Get a cached value, warming the memory tier on a store hit.
    pub async fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.memory.lock().await.get(key) {
            return Some(value);
        }

        match self.store.get(key).await {
            Ok(Some((value, expires_at))) => {
                self.memory
                    .lock()
                    .await
                    .insert(key.to_string(), value.clone(), expires_at);
                Some(value)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("cache store read failed for {}: {}", key, e);
                None
            }
        }
    }

    /// Set a value in both tiers.
    pub async fn set(&self, key: &str, value: &str, ttl: Duration) {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(15));

        self.memory
            .lock()
            .await
            .insert(key.to_string(), value.to_string(), expires_at);

        if let Err(e) = self.store.set(key, value, expires_at).await {
            warn!("cache store write failed for {}: {}", key, e);
        }
    }

    /// Prune expired entries from both tiers.
    pub async fn sweep(&self) {
        self.memory.lock().await.prune_expired();
        match self.store.delete_expired(Utc::now()).await {
            Ok(0) => {}
            Ok(n) => debug!("swept {} expired cache entries", n),
            Err(e) => warn!("cache sweep failed: {}", e),
        }
    }

    /// Number of live memory-tier entries (for monitor stats).
    pub async fn memory_len(&self) -> usize {
        self.memory.lock().await.entries.len()
    }
}
