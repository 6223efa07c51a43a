//! In-process token bucket rate limiter.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::bucket::TokenBucket;
use super::clock::{Clock, SystemClock};
use super::decision::{Decision, Quota, NEVER_REFILLS_FALLBACK_SECS};
use crate::config::RateLimitConfig;

/// Per-key token bucket rate limiter.
///
/// Buckets are created lazily the first time a key is seen and live until
/// [`RateLimiter::reset`] drops them. Each bucket sits behind its own mutex,
/// so the refill-then-consume sequence for one key is a critical section
/// while checks for different keys proceed independently.
pub struct RateLimiter {
    /// Configured sustained rate
    requests_per_minute: u32,
    /// Capacity of every bucket
    burst_size: u32,
    /// Tokens per second, `requests_per_minute / 60`
    refill_rate: f64,
    /// Master switch
    enabled: bool,
    /// Buckets indexed by client key
    buckets: DashMap<String, Arc<Mutex<TokenBucket>>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a rate limiter on the system clock.
    ///
    /// `burst_size` defaults to `requests_per_minute`.
    pub fn new(requests_per_minute: u32, burst_size: Option<u32>, enabled: bool) -> Self {
        Self::with_clock(requests_per_minute, burst_size, enabled, Arc::new(SystemClock))
    }

    /// Create a rate limiter reading time from `clock`.
    pub fn with_clock(
        requests_per_minute: u32,
        burst_size: Option<u32>,
        enabled: bool,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            requests_per_minute,
            burst_size: burst_size.unwrap_or(requests_per_minute),
            refill_rate: f64::from(requests_per_minute) / 60.0,
            enabled,
            buckets: DashMap::new(),
            clock,
        }
    }

    /// Create a rate limiter from configuration.
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests_per_minute, config.burst_size, config.enabled)
    }

    /// Check and consume one token for `key`.
    ///
    /// When disabled this admits without touching any bucket and returns no
    /// quota. Otherwise the returned quota always carries limit, remaining
    /// and reset; `retry_after` is set only on rejection.
    pub fn check_rate_limit(&self, key: &str) -> Decision {
        if !self.enabled {
            return Decision::bypass();
        }

        let handle = self.bucket(key);
        let (allowed, remaining, wait) = {
            let mut bucket = handle.lock();
            let now = self.clock.now();
            let allowed = bucket.consume(1, now);
            let remaining = bucket.tokens(now).max(0.0).floor() as u64;
            let wait = bucket.time_until_tokens(1, now);
            (allowed, remaining, wait)
        };

        let epoch = self.clock.epoch_secs();
        let (reset, retry_after) = if wait.is_finite() {
            ((epoch + wait) as u64, wait.ceil() as u64 + 1)
        } else {
            (
                (epoch + NEVER_REFILLS_FALLBACK_SECS as f64) as u64,
                NEVER_REFILLS_FALLBACK_SECS,
            )
        };

        trace!(key = %key, allowed, remaining, "Checked rate limit");
        if !allowed {
            debug!(key = %key, retry_after, "Rate limit exceeded");
        }

        Decision {
            allowed,
            quota: Some(Quota {
                limit: u64::from(self.requests_per_minute),
                remaining,
                reset,
                retry_after: (!allowed).then_some(retry_after),
            }),
        }
    }

    /// Drop the bucket for `key`, or every bucket when `key` is `None`.
    ///
    /// The next check for a dropped key starts from a full bucket. A check
    /// already holding the old bucket finishes against it.
    pub fn reset(&self, key: Option<&str>) {
        match key {
            Some(key) => {
                self.buckets.remove(key);
                debug!(key = %key, "Reset rate limit bucket");
            }
            None => {
                self.buckets.clear();
                debug!("Reset all rate limit buckets");
            }
        }
    }

    /// Current token level for `key`, if it has a bucket.
    #[cfg(test)]
    pub(crate) fn tokens(&self, key: &str) -> Option<f64> {
        let handle = self.buckets.get(key).map(|b| Arc::clone(b.value()))?;
        let mut bucket = handle.lock();
        Some(bucket.tokens(self.clock.now()))
    }

    /// Get the number of live buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }

    pub fn burst_size(&self) -> u32 {
        self.burst_size
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Get or create the bucket for `key`.
    ///
    /// The map shard lock is released before the bucket mutex is taken.
    fn bucket(&self, key: &str) -> Arc<Mutex<TokenBucket>> {
        if let Some(bucket) = self.buckets.get(key) {
            return Arc::clone(bucket.value());
        }

        let entry = self.buckets.entry(key.to_string()).or_insert_with(|| {
            debug!(
                key = %key,
                capacity = self.burst_size,
                refill_rate = self.refill_rate,
                "Creating new token bucket"
            );
            Arc::new(Mutex::new(TokenBucket::new(
                self.burst_size,
                self.refill_rate,
                self.clock.now(),
            )))
        });
        Arc::clone(entry.value())
    }
}
