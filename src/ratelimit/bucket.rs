//! Token bucket implementation.

use std::time::Instant;

/// A token bucket for a single client key.
///
/// The bucket holds up to `capacity` tokens and refills continuously at
/// `refill_rate` tokens per second. Every operation first refills up to the
/// supplied instant, so the bucket itself never reads a clock; the owning
/// limiter passes in a monotonic `now`.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Maximum number of tokens (burst size)
    capacity: u32,
    /// Tokens added per second
    refill_rate: f64,
    /// Current level, always within `0.0..=capacity`
    tokens: f64,
    /// Instant of the last refill
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: u32, refill_rate: f64, now: Instant) -> Self {
        Self {
            capacity,
            refill_rate: refill_rate.max(0.0),
            tokens: f64::from(capacity),
            last_refill: now,
        }
    }

    /// Get the capacity of this bucket.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Get the refill rate in tokens per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Try to take `n` tokens.
    ///
    /// Returns `true` and subtracts `n` if at least `n` tokens are available,
    /// otherwise returns `false` and leaves the level untouched. A request for
    /// zero tokens always succeeds without changing state.
    pub fn consume(&mut self, n: u32, now: Instant) -> bool {
        self.refill(now);

        let n = f64::from(n);
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Get the current level after refilling.
    pub fn tokens(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }

    /// Seconds until at least `n` tokens are available.
    ///
    /// Returns `0.0` if they already are, and `f64::INFINITY` if the bucket
    /// never refills. Callers must check for the infinite case before doing
    /// arithmetic on the result.
    pub fn time_until_tokens(&mut self, n: u32, now: Instant) -> f64 {
        self.refill(now);

        let n = f64::from(n);
        if self.tokens >= n {
            return 0.0;
        }
        if self.refill_rate == 0.0 {
            return f64::INFINITY;
        }

        (n - self.tokens) / self.refill_rate
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_rate).min(f64::from(self.capacity));
            self.last_refill = now;
        }
    }
}
