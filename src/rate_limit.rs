//! Sliding-window rate limiter over durable rate events.
//!
//! Limits are configured per user class and action, with independent hourly
//! and daily windows. Counts come from the rate_events table; a short
//! memoization tier cuts store round trips. On store failure the limiter
//! fails open - a broken store must not block traffic.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::warn;

use crate::models::UserClass;
use crate::repository::RateEventRepository;

/// Memoized counts are trusted for this long.
const MEMO_TTL_SECS: i64 = 60;

/// Actions subject to rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateAction {
    Chat,
    VideoUpload,
    ChannelProcess,
}

impl RateAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::VideoUpload => "video_upload",
            Self::ChannelProcess => "channel_process",
        }
    }
}

/// Caps for one class/action pair. None disables that window.
#[derive(Debug, Clone, Copy)]
pub struct ActionLimits {
    pub hourly: Option<u32>,
    pub daily: Option<u32>,
}

/// The configured limits table.
pub fn limits_for(class: UserClass, action: RateAction) -> ActionLimits {
    use RateAction::*;
    use UserClass::*;
    let (hourly, daily) = match (class, action) {
        (Anonymous, Chat) => (Some(3), Some(10)),
        (Anonymous, VideoUpload) => (Some(1), Some(2)),
        (Anonymous, ChannelProcess) => (Some(1), Some(1)),
        (User, Chat) => (Some(5), Some(50)),
        (User, VideoUpload) => (Some(10), Some(30)),
        (User, ChannelProcess) => (Some(3), Some(10)),
        (Premium, Chat) => (Some(30), Some(300)),
        (Premium, VideoUpload) => (Some(30), Some(100)),
        (Premium, ChannelProcess) => (Some(10), Some(30)),
    };
    ActionLimits { hourly, daily }
}

/// Outcome of a rate check, shaped for the HTTP envelope.
#[derive(Debug, Clone)]
pub struct RateDecision {
    pub allowed: bool,
    /// Cap of the most restrictive active window.
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    /// Window label of the most restrictive window ("hour" or "day").
    pub window: &'static str,
}

struct MemoEntry {
    count: i64,
    cached_at: DateTime<Utc>,
}

/// Sliding-window limiter backed by the rate_events table.
#[derive(Clone)]
pub struct RateLimiter {
    events: Arc<RateEventRepository>,
    /// (identifier, action, window) -> memoized count.
    memo: Arc<RwLock<HashMap<(String, &'static str, &'static str), MemoEntry>>>,
}

impl RateLimiter {
    pub fn new(events: RateEventRepository) -> Self {
        Self {
            events: Arc::new(events),
            memo: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Check whether `identifier` may perform `action`, returning the most
    /// restrictive of the active windows.
    pub async fn check(
        &self,
        identifier: &str,
        action: RateAction,
        class: UserClass,
    ) -> RateDecision {
        let limits = limits_for(class, action);
        let now = Utc::now();

        let windows: Vec<(&'static str, Duration, u32)> = [
            ("hour", Duration::hours(1), limits.hourly),
            ("day", Duration::days(1), limits.daily),
        ]
        .into_iter()
        .filter_map(|(label, span, cap)| cap.map(|c| (label, span, c)))
        .collect();

        if windows.is_empty() {
            return RateDecision {
                allowed: true,
                limit: u32::MAX,
                remaining: u32::MAX,
                reset_at: now,
                window: "none",
            };
        }

        let mut most_restrictive: Option<RateDecision> = None;
        for (label, span, cap) in windows {
            let since = now - span;
            let count = match self.window_count(identifier, action, label, since).await {
                Some(count) => count,
                None => {
                    // Fail open on store errors
                    warn!(
                        "rate check failed open for {} {}",
                        identifier,
                        action.as_str()
                    );
                    return RateDecision {
                        allowed: true,
                        limit: cap,
                        remaining: cap,
                        reset_at: now + span,
                        window: label,
                    };
                }
            };

            let remaining = (cap as i64 - count).max(0) as u32;
            let reset_at = match self.events.oldest_since(identifier, action.as_str(), since).await
            {
                Ok(Some(oldest)) => oldest + span,
                _ => now + span,
            };

            let decision = RateDecision {
                allowed: count < cap as i64,
                limit: cap,
                remaining,
                reset_at,
                window: label,
            };

            let tighter = match &most_restrictive {
                None => true,
                Some(current) => {
                    decision.remaining < current.remaining
                        || (!decision.allowed && current.allowed)
                }
            };
            if tighter {
                most_restrictive = Some(decision);
            }
        }

        most_restrictive.unwrap_or(RateDecision {
            allowed: true,
            limit: u32::MAX,
            remaining: u32::MAX,
            reset_at: now,
            window: "none",
        })
    }

    /// Record an occurrence of `action` and invalidate memoized counts.
    pub async fn record(&self, identifier: &str, action: RateAction) {
        if let Err(e) = self.events.record(identifier, action.as_str()).await {
            warn!(
                "rate record failed for {} {}: {}",
                identifier,
                action.as_str(),
                e
            );
            return;
        }

        let mut memo = self.memo.write().await;
        memo.remove(&(identifier.to_string(), action.as_str(), "hour"));
        memo.remove(&(identifier.to_string(), action.as_str(), "day"));
    }

    /// Prune events outside every window (2-day retention).
    pub async fn prune(&self) {
        if let Err(e) = self
            .events
            .prune_before(Utc::now() - Duration::days(2))
            .await
        {
            warn!("rate event prune failed: {}", e);
        }
    }

    async fn window_count(
        &self,
        identifier: &str,
        action: RateAction,
        window: &'static str,
        since: DateTime<Utc>,
    ) -> Option<i64> {
        let memo_key = (identifier.to_string(), action.as_str(), window);
        {
            let memo = self.memo.read().await;
            if let Some(entry) = memo.get(&memo_key) {
                if (Utc::now() - entry.cached_at).num_seconds() < MEMO_TTL_SECS {
                    return Some(entry.count);
                }
            }
        }

        match self
            .events
            .count_since(identifier, action.as_str(), since)
            .await
        {
            Ok(count) => {
                self.memo.write().await.insert(
                    memo_key,
                    MemoEntry {
                        count,
                        cached_at: Utc::now(),
                    },
                );
                Some(count)
            }
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_context;

    #[tokio::test]
    async fn test_remaining_decreases_until_blocked() {
        let (ctx, _dir) = test_context().await;
        let limiter = RateLimiter::new(ctx.rate_events());

        // User class allows 5 chat calls per hour
        let mut last_remaining = u32::MAX;
        for _ in 0..5 {
            let decision = limiter.check("user:1", RateAction::Chat, UserClass::User).await;
            assert!(decision.allowed);
            assert!(decision.remaining < last_remaining);
            last_remaining = decision.remaining;
            limiter.record("user:1", RateAction::Chat).await;
        }

        let blocked = limiter.check("user:1", RateAction::Chat, UserClass::User).await;
        assert!(!blocked.allowed);
        assert_eq!(blocked.remaining, 0);
        assert_eq!(blocked.limit, 5);
        assert!(blocked.reset_at > Utc::now());
        assert!(blocked.reset_at <= Utc::now() + Duration::hours(1));
    }

    #[tokio::test]
    async fn test_identifiers_are_isolated() {
        let (ctx, _dir) = test_context().await;
        let limiter = RateLimiter::new(ctx.rate_events());

        for _ in 0..5 {
            limiter.record("user:1", RateAction::Chat).await;
        }
        let other = limiter.check("user:2", RateAction::Chat, UserClass::User).await;
        assert!(other.allowed);
        assert_eq!(other.remaining, 5);
    }

    #[tokio::test]
    async fn test_record_invalidates_memoized_count() {
        let (ctx, _dir) = test_context().await;
        let limiter = RateLimiter::new(ctx.rate_events());

        // Prime the memo with a zero count
        let first = limiter.check("user:3", RateAction::Chat, UserClass::User).await;
        assert_eq!(first.remaining, 5);

        limiter.record("user:3", RateAction::Chat).await;
        let second = limiter.check("user:3", RateAction::Chat, UserClass::User).await;
        assert_eq!(second.remaining, 4);
    }

    #[tokio::test]
    async fn test_premium_has_higher_caps() {
        let limits = limits_for(UserClass::Premium, RateAction::Chat);
        assert!(limits.hourly.unwrap() > limits_for(UserClass::User, RateAction::Chat).hourly.unwrap());
    }
}
