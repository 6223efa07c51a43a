//! Shared handler state.

use std::sync::Arc;

use crate::auth::ApiKeyAuth;
use crate::config::FailurePolicy;
use crate::ratelimit::RateLimiterBackend;

/// State shared by every handler and middleware.
///
/// Built once at startup and cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<dyn RateLimiterBackend>,
    pub auth: Arc<ApiKeyAuth>,
    /// What to do when the limiter's store fails
    pub on_store_error: FailurePolicy,
}

impl AppState {
    pub fn new(
        limiter: Arc<dyn RateLimiterBackend>,
        auth: ApiKeyAuth,
        on_store_error: FailurePolicy,
    ) -> Self {
        Self {
            limiter,
            auth: Arc::new(auth),
            on_store_error,
        }
    }
}
