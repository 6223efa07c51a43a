//! Rate limiter trait for abstracting local and distributed implementations.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::decision::Decision;
use super::distributed::DistributedRateLimiter;
use super::limiter::RateLimiter;
use super::store::RedisWindowStore;
use crate::config::{Backend, RateLimitConfig};
use crate::error::{GateError, Result};

/// Trait for rate limiter implementations.
///
/// This trait abstracts over both the local `RateLimiter` and the
/// `DistributedRateLimiter` so the HTTP gate can work with either.
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Check and consume quota for a client key.
    async fn check_rate_limit(&self, key: &str) -> Result<Decision>;

    /// Reset one key, or every key when `key` is `None`.
    async fn reset(&self, key: Option<&str>) -> Result<()>;

    /// Short name of the implementation.
    fn name(&self) -> &'static str;

    /// Whether limiting is switched on.
    fn is_enabled(&self) -> bool;
}

#[async_trait]
impl RateLimiterBackend for RateLimiter {
    async fn check_rate_limit(&self, key: &str) -> Result<Decision> {
        Ok(RateLimiter::check_rate_limit(self, key))
    }

    async fn reset(&self, key: Option<&str>) -> Result<()> {
        RateLimiter::reset(self, key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }

    fn is_enabled(&self) -> bool {
        RateLimiter::is_enabled(self)
    }
}

#[async_trait]
impl RateLimiterBackend for DistributedRateLimiter {
    async fn check_rate_limit(&self, key: &str) -> Result<Decision> {
        DistributedRateLimiter::check_rate_limit(self, key).await
    }

    async fn reset(&self, key: Option<&str>) -> Result<()> {
        DistributedRateLimiter::reset(self, key).await
    }

    fn name(&self) -> &'static str {
        "redis"
    }

    fn is_enabled(&self) -> bool {
        DistributedRateLimiter::is_enabled(self)
    }
}

/// Build the backend selected by configuration.
///
/// Selecting Redis without a URL is a configuration error, not a silent
/// fallback to the in-process limiter.
pub async fn build_backend(config: &RateLimitConfig) -> Result<Arc<dyn RateLimiterBackend>> {
    let backend: Arc<dyn RateLimiterBackend> = match config.backend {
        Backend::Memory => Arc::new(RateLimiter::from_config(config)),
        Backend::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .filter(|url| !url.is_empty())
                .ok_or_else(|| GateError::Config("the redis backend requires REDIS_URL".to_string()))?;
            let store = RedisWindowStore::connect(url, config.store_timeout()).await?;
            Arc::new(DistributedRateLimiter::new(
                Arc::new(store),
                config.requests_per_minute,
                config.enabled,
            ))
        }
    };

    info!(
        backend = backend.name(),
        enabled = backend.is_enabled(),
        requests_per_minute = config.requests_per_minute,
        burst_size = config.burst(),
        "Rate limiter initialized"
    );
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_memory_backend() {
        let config = RateLimitConfig {
            requests_per_minute: 60,
            burst_size: Some(2),
            ..RateLimitConfig::default()
        };

        let backend = build_backend(&config).await.unwrap();
        assert_eq!(backend.name(), "memory");
        assert!(backend.is_enabled());

        assert!(backend.check_rate_limit("k").await.unwrap().allowed);
        assert!(backend.check_rate_limit("k").await.unwrap().allowed);
        assert!(!backend.check_rate_limit("k").await.unwrap().allowed);

        backend.reset(Some("k")).await.unwrap();
        assert!(backend.check_rate_limit("k").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_redis_backend_without_url_is_config_error() {
        let config = RateLimitConfig {
            backend: Backend::Redis,
            redis_url: None,
            ..RateLimitConfig::default()
        };

        let result = build_backend(&config).await;
        assert!(matches!(result, Err(GateError::Config(_))));
    }
}
