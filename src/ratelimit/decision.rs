//! Admission decisions and the rate limit headers they carry.

use std::collections::BTreeMap;

use serde::Serialize;

/// Maximum requests per minute for the caller.
pub const LIMIT_HEADER: &str = "X-RateLimit-Limit";
/// Whole tokens left after this request.
pub const REMAINING_HEADER: &str = "X-RateLimit-Remaining";
/// Epoch second at which the next token is available.
pub const RESET_HEADER: &str = "X-RateLimit-Reset";
/// Seconds to wait before retrying a rejected request.
pub const RETRY_AFTER_HEADER: &str = "Retry-After";

/// Stand-in wait, in seconds, when a bucket never refills.
pub const NEVER_REFILLS_FALLBACK_SECS: u64 = 86_400;

/// Quota state reported alongside an admission decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quota {
    /// Configured requests per minute
    pub limit: u64,
    /// Whole tokens (or window slots) left
    pub remaining: u64,
    /// Absolute epoch seconds of the next available token
    pub reset: u64,
    /// Seconds to wait, only set on rejection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// The outcome of a single rate limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Quota state, `None` when rate limiting is disabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota: Option<Quota>,
}

impl Decision {
    /// A decision made with rate limiting switched off.
    pub fn bypass() -> Self {
        Self {
            allowed: true,
            quota: None,
        }
    }

    /// Seconds the caller should wait, if the request was rejected.
    pub fn retry_after(&self) -> Option<u64> {
        self.quota.as_ref().and_then(|q| q.retry_after)
    }

    /// The response headers for this decision.
    ///
    /// Empty when rate limiting is disabled; `Retry-After` only appears on
    /// rejection.
    pub fn headers(&self) -> BTreeMap<&'static str, String> {
        let mut headers = BTreeMap::new();
        if let Some(quota) = &self.quota {
            headers.insert(LIMIT_HEADER, quota.limit.to_string());
            headers.insert(REMAINING_HEADER, quota.remaining.to_string());
            headers.insert(RESET_HEADER, quota.reset.to_string());
            if let Some(retry_after) = quota.retry_after {
                headers.insert(RETRY_AFTER_HEADER, retry_after.to_string());
            }
        }
        headers
    }

    /// The human-readable rejection message.
    pub fn rejection_message(&self) -> String {
        match self.retry_after() {
            Some(secs) => format!("Rate limit exceeded. Try again in {} seconds.", secs),
            None => "Rate limit exceeded. Try again in a few seconds.".to_string(),
        }
    }
}
