//! Best-effort distributed lock manager.
//!
//! Leases are unique rows in the shared store, expired by TTL. The lock is
//! advisory: mutual exclusion holds only for callers that go through
//! acquire/release. Acquisition is fail-closed - a store error reads as
//! "somebody else has it".

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::repository::LockRepository;

/// Released this long before expiry so a slow delete cannot outlive the row.
const SAFETY_MARGIN: Duration = Duration::from_secs(10);

/// A held lease on a named resource.
#[derive(Debug, Clone)]
pub struct Lease {
    pub resource_id: String,
    pub lock_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Manager for store-backed leases.
#[derive(Clone)]
pub struct LockManager {
    repo: Arc<LockRepository>,
    /// Leases held by this process: resource_id -> lock_id.
    held: Arc<Mutex<HashMap<String, String>>>,
}

impl LockManager {
    pub fn new(repo: LockRepository) -> Self {
        Self {
            repo: Arc::new(repo),
            held: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Try to acquire an exclusive lease on `resource_id` for `ttl`.
    ///
    /// Returns None when the resource is held elsewhere or the store is
    /// unreachable. On success a timer is scheduled to proactively release
    /// the lease `SAFETY_MARGIN` before it would expire.
    pub async fn acquire(&self, resource_id: &str, ttl: Duration) -> Option<Lease> {
        let lock_id = Uuid::new_v4().to_string();
        let expires_at = Utc::now() + chrono::Duration::from_std(ttl).ok()?;

        let inserted = match self.repo.try_insert(resource_id, &lock_id, expires_at).await {
            Ok(inserted) => inserted,
            Err(e) => {
                warn!("lock acquire failed for {}: {}", resource_id, e);
                return None;
            }
        };

        if !inserted {
            // Inspect the holder; a stale row can be cleared and retried once.
            let existing = match self.repo.get(resource_id).await {
                Ok(row) => row,
                Err(e) => {
                    warn!("lock inspect failed for {}: {}", resource_id, e);
                    return None;
                }
            };
            match existing {
                Some(row) if row.expires_at < Utc::now() => {
                    debug!("clearing expired lock on {}", resource_id);
                    if self
                        .repo
                        .delete_exact(resource_id, &row.lock_id)
                        .await
                        .is_err()
                    {
                        return None;
                    }
                    match self.repo.try_insert(resource_id, &lock_id, expires_at).await {
                        Ok(true) => {}
                        _ => return None,
                    }
                }
                _ => return None,
            }
        }

        self.held
            .lock()
            .await
            .insert(resource_id.to_string(), lock_id.clone());

        let lease = Lease {
            resource_id: resource_id.to_string(),
            lock_id,
            expires_at,
        };
        self.schedule_release(lease.clone(), ttl);
        Some(lease)
    }

    /// Release a lease. Deletes only the row carrying this lease's token,
    /// so a newer lease acquired after expiry is never revoked.
    pub async fn release(&self, lease: &Lease) {
        {
            let mut held = self.held.lock().await;
            if held.get(&lease.resource_id) == Some(&lease.lock_id) {
                held.remove(&lease.resource_id);
            }
        }
        match self
            .repo
            .delete_exact(&lease.resource_id, &lease.lock_id)
            .await
        {
            Ok(true) => debug!("released lock on {}", lease.resource_id),
            Ok(false) => debug!("lock on {} already superseded", lease.resource_id),
            // The row still expires on its own; nothing else to do.
            Err(e) => warn!("lock release failed for {}: {}", lease.resource_id, e),
        }
    }

    /// Whether a live lease exists for the resource.
    pub async fn is_locked(&self, resource_id: &str) -> bool {
        match self.repo.get(resource_id).await {
            Ok(Some(row)) => row.expires_at >= Utc::now(),
            _ => false,
        }
    }

    /// Delete all expired lock rows.
    pub async fn sweep(&self) {
        match self.repo.delete_expired(Utc::now()).await {
            Ok(0) => {}
            Ok(n) => debug!("swept {} expired locks", n),
            Err(e) => warn!("lock sweep failed: {}", e),
        }
    }

    /// Release every lease held by this process (shutdown path).
    pub async fn release_all(&self) {
        let held: Vec<(String, String)> = self
            .held
            .lock()
            .await
            .drain()
            .collect();
        for (resource_id, lock_id) in held {
            if let Err(e) = self.repo.delete_exact(&resource_id, &lock_id).await {
                warn!("shutdown release failed for {}: {}", resource_id, e);
            }
        }
    }

    /// Proactive release shortly before the row expires. A lease released
    /// by its owner earlier is a no-op here thanks to fencing.
    fn schedule_release(&self, lease: Lease, ttl: Duration) {
        let manager = self.clone();
        let delay = ttl.saturating_sub(SAFETY_MARGIN);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let still_held = manager
                .held
                .lock()
                .await
                .get(&lease.resource_id)
                .map(|id| id == &lease.lock_id)
                .unwrap_or(false);
            if still_held {
                debug!("proactively releasing lock on {}", lease.resource_id);
                manager.release(&lease).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_context;

    #[tokio::test]
    async fn test_mutual_exclusion() {
        let (ctx, _dir) = test_context().await;
        let manager = LockManager::new(ctx.locks());

        let lease = manager
            .acquire("video-x", Duration::from_secs(600))
            .await
            .unwrap();
        assert!(manager
            .acquire("video-x", Duration::from_secs(600))
            .await
            .is_none());
        assert!(manager.is_locked("video-x").await);

        manager.release(&lease).await;
        assert!(!manager.is_locked("video-x").await);
        assert!(manager
            .acquire("video-x", Duration::from_secs(600))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_stolen() {
        let (ctx, _dir) = test_context().await;
        let repo = ctx.locks();
        // Simulate a crashed holder: a row already past its expiry
        repo.try_insert("channel-queue-1", "dead", Utc::now() - chrono::Duration::seconds(5))
            .await
            .unwrap();

        let manager = LockManager::new(ctx.locks());
        let lease = manager
            .acquire("channel-queue-1", Duration::from_secs(60))
            .await;
        assert!(lease.is_some());
    }

    #[tokio::test]
    async fn test_release_is_fenced_against_newer_lease() {
        let (ctx, _dir) = test_context().await;
        let manager_a = LockManager::new(ctx.locks());
        let manager_b = LockManager::new(ctx.locks());

        let stale = manager_a
            .acquire("video-y", Duration::from_secs(60))
            .await
            .unwrap();
        // Holder A's row goes away (as if it expired and was swept)
        ctx.locks().delete_exact("video-y", &stale.lock_id).await.unwrap();
        let fresh = manager_b
            .acquire("video-y", Duration::from_secs(60))
            .await
            .unwrap();

        // A's late release must not revoke B's lease
        manager_a.release(&stale).await;
        assert!(manager_b.is_locked("video-y").await);
        manager_b.release(&fresh).await;
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_rows() {
        let (ctx, _dir) = test_context().await;
        ctx.locks()
            .try_insert("stale", "x", Utc::now() - chrono::Duration::seconds(1))
            .await
            .unwrap();

        let manager = LockManager::new(ctx.locks());
        manager.sweep().await;
        assert_eq!(ctx.locks().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_release_all_clears_held_leases() {
        let (ctx, _dir) = test_context().await;
        let manager = LockManager::new(ctx.locks());

        manager.acquire("a", Duration::from_secs(60)).await.unwrap();
        manager.acquire("b", Duration::from_secs(60)).await.unwrap();
        manager.release_all().await;
        assert_eq!(ctx.locks().count().await.unwrap(), 0);
    }
}
