//! Rate limiting logic and state management.

mod backend;
mod bucket;
mod clock;
mod decision;
mod distributed;
mod limiter;
mod store;

pub use backend::{build_backend, RateLimiterBackend};
pub use bucket::TokenBucket;
pub use clock::{Clock, SystemClock};
pub use decision::{
    Decision, Quota, LIMIT_HEADER, NEVER_REFILLS_FALLBACK_SECS, REMAINING_HEADER, RESET_HEADER,
    RETRY_AFTER_HEADER,
};
pub use distributed::{DistributedRateLimiter, WINDOW};
pub use limiter::RateLimiter;
pub use store::{RedisWindowStore, WindowStore, KEY_PREFIX};

#[cfg(test)]
pub(crate) use clock::manual::ManualClock;
#[cfg(test)]
pub(crate) use store::memory::MemoryWindowStore;
