//! Time sources used by the limiters.

use std::time::Instant;

/// A source of monotonic and wall-clock time.
///
/// Refill arithmetic only ever uses [`Clock::now`]; the epoch reading is
/// used for the absolute `X-RateLimit-Reset` value and the shared-store
/// window scores.
pub trait Clock: Send + Sync {
    /// Monotonic instant.
    fn now(&self) -> Instant;

    /// Seconds since the Unix epoch.
    fn epoch_secs(&self) -> f64;
}

/// The process clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn epoch_secs(&self) -> f64 {
        chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }
}
