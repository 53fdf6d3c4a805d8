use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::auth::Identity;
use crate::clock::Clock;
use crate::counter_store::CounterStore;
use crate::rate_limit::{RateLimitDecision, RateLimitHeaders, REQUESTS_PER_WINDOW, WINDOW_SECS};

/// Counter key for one identity within one absolute window.
///
/// `bucket` is `floor(unix_secs / WINDOW_SECS)`, so every caller's window
/// starts and ends on the same minute boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    pub identity: String,
    pub bucket: u64,
}

/// Fixed-window rate limiter.
///
/// Windows are absolute and reset hard at each boundary: a caller can spend a
/// full quota just before a boundary and another full quota just after it.
/// Rejected requests never consume quota.
pub struct FixedWindowRateLimiter {
    store: Arc<dyn CounterStore<WindowKey>>,
    clock: Arc<dyn Clock>,
}

impl FixedWindowRateLimiter {
    pub fn new(store: Arc<dyn CounterStore<WindowKey>>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    fn bucket_for(unix_secs: u64) -> u64 {
        unix_secs / WINDOW_SECS
    }

    /// Admit or reject one request for `identity`, consuming quota on admit.
    pub fn check(&self, identity: &Identity) -> RateLimitDecision {
        let now = self.clock.now_unix_secs();
        let bucket = Self::bucket_for(now);
        let reset = (bucket + 1) * WINDOW_SECS;
        let key = WindowKey {
            identity: identity.key().to_string(),
            bucket,
        };

        match self.store.increment_if_below(key, REQUESTS_PER_WINDOW) {
            Ok(count) => {
                debug!(user = %identity, bucket, count, "Admitted request");
                RateLimitDecision::Allow(RateLimitHeaders {
                    limit: REQUESTS_PER_WINDOW,
                    remaining: REQUESTS_PER_WINDOW.saturating_sub(count),
                    reset,
                    retry_after: None,
                })
            }
            Err(count) => {
                debug!(user = %identity, bucket, count, "Window quota exhausted");
                let retry_after = u32::try_from(reset.saturating_sub(now))
                    .unwrap_or(u32::MAX)
                    .max(1);
                RateLimitDecision::Deny(RateLimitHeaders {
                    limit: REQUESTS_PER_WINDOW,
                    remaining: 0,
                    reset,
                    retry_after: Some(retry_after),
                })
            }
        }
    }

    /// Requests already admitted for `identity` in the current window
    pub fn current_count(&self, identity: &Identity) -> u32 {
        let key = WindowKey {
            identity: identity.key().to_string(),
            bucket: Self::bucket_for(self.clock.now_unix_secs()),
        };
        self.store.get(&key)
    }

    /// Number of (identity, window) entries currently held
    pub fn tracked_windows(&self) -> usize {
        self.store.len()
    }

    /// Drop every window older than the current one.
    ///
    /// Past windows can never be read again by `check`, so removing them does
    /// not change any decision.
    pub fn evict_stale_windows(&self) -> usize {
        let current = Self::bucket_for(self.clock.now_unix_secs());
        self.store.retain(&|key: &WindowKey| key.bucket >= current)
    }

    /// Periodically evict stale windows until the returned handle is aborted
    pub fn start_stale_window_sweep(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        info!(
            interval_secs = every.as_secs(),
            "Starting stale rate limit window sweep"
        );
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = self.evict_stale_windows();
                if removed > 0 {
                    debug!(removed, "Evicted stale rate limit windows");
                }
            }
        })
    }
}
