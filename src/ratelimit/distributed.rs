//! Distributed rate limiter backed by a shared sliding-window store.
//!
//! Instead of continuous refill this limiter counts timestamped requests in
//! a trailing 60 second window, because trimming, counting and adding to a
//! sorted set are primitives the shared store already executes atomically.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::clock::{Clock, SystemClock};
use super::decision::{Decision, Quota};
use super::store::WindowStore;
use crate::error::Result;

/// Length of the counting window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// A rate limiter whose state lives in a store shared by every instance.
///
/// The configured burst size has no effect here: the window admits up to
/// `requests_per_minute` requests in any 60 second span.
pub struct DistributedRateLimiter {
    store: Arc<dyn WindowStore>,
    /// Requests admitted per window
    requests_per_minute: u32,
    /// Master switch
    enabled: bool,
    clock: Arc<dyn Clock>,
}

impl DistributedRateLimiter {
    /// Create a distributed rate limiter on the system clock.
    pub fn new(store: Arc<dyn WindowStore>, requests_per_minute: u32, enabled: bool) -> Self {
        Self::with_clock(store, requests_per_minute, enabled, Arc::new(SystemClock))
    }

    /// Create a distributed rate limiter reading time from `clock`.
    pub fn with_clock(
        store: Arc<dyn WindowStore>,
        requests_per_minute: u32,
        enabled: bool,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            requests_per_minute,
            enabled,
            clock,
        }
    }

    /// Check and record one request for `key`.
    ///
    /// Store failures are returned as errors and never turned into a
    /// decision.
    pub async fn check_rate_limit(&self, key: &str) -> Result<Decision> {
        if !self.enabled {
            return Ok(Decision::bypass());
        }

        let now = self.clock.epoch_secs();
        let limit = u64::from(self.requests_per_minute);

        let count = self
            .store
            .record(key, now, WINDOW, limit)
            .await
            .map_err(|e| {
                warn!(error = %e, "Sliding window store failed");
                e
            })?;

        let allowed = count < limit;
        let remaining = limit.saturating_sub(count + 1);
        let window_secs = WINDOW.as_secs();

        trace!(key = %key, count, limit, "Checked distributed rate limit");
        if !allowed {
            debug!(key = %key, count, limit, "Distributed rate limit exceeded");
        }

        Ok(Decision {
            allowed,
            quota: Some(Quota {
                limit,
                remaining,
                reset: (now + window_secs as f64) as u64,
                retry_after: (!allowed).then_some(window_secs),
            }),
        })
    }

    /// Forget the window for `key`, or every window when `key` is `None`.
    pub async fn reset(&self, key: Option<&str>) -> Result<()> {
        match key {
            Some(key) => self.store.remove(key).await,
            None => self.store.remove_all().await,
        }
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}
