//! Per-client fixed-window rate limiting.
//!
//! Each client key owns one window record. The record is read and updated
//! while its map shard is write-locked, so concurrent callers for the same key
//! are serialized and can never both take the last slot.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

/// Admission policy: at most `max_requests` per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    /// Limits below 1 request or 1ms are raised to those minimums.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window: window.max(Duration::from_millis(1)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    started: Instant,
    length: Duration,
}

impl Window {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started) >= self.length
    }
}

/// In-memory fixed-window limiter keyed by client identity.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit or reject one request from `key`. Never fails.
    pub fn admit(&self, key: &str, max_requests: u32, window: Duration) -> bool {
        self.admit_at(key, RateLimitPolicy::new(max_requests, window), Instant::now())
    }

    /// [`admit`](Self::admit) with a prepared policy.
    pub fn check(&self, key: &str, policy: RateLimitPolicy) -> bool {
        self.admit_at(key, policy, Instant::now())
    }

    fn admit_at(&self, key: &str, policy: RateLimitPolicy, now: Instant) -> bool {
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            started: now,
            length: policy.window,
        });
        let window = entry.value_mut();

        if window.count == 0 || window.is_expired(now) {
            *window = Window {
                count: 1,
                started: now,
                length: policy.window,
            };
            return true;
        }

        // Count saturates at the limit.
        if window.count < policy.max_requests {
            window.count += 1;
            true
        } else {
            false
        }
    }

    /// Drop records whose window has elapsed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    fn purge_expired_at(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| !window.is_expired(now));
        before.saturating_sub(self.windows.len())
    }

    /// Number of tracked client keys.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// Spawn a periodic sweep of expired windows. Returns its handle for shutdown.
pub fn spawn_sweep_task(
    limiter: Arc<RateLimiter>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every.max(Duration::from_secs(1)));
        loop {
            interval.tick().await;
            let purged = limiter.purge_expired();
            if purged > 0 {
                debug!(purged, remaining = limiter.len(), "Purged expired rate-limit windows");
            }
        }
    })
}
