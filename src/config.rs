//! Configuration management for the gate.
//!
//! Values are layered with the `config` crate: built-in defaults, then an
//! optional YAML file, then the environment variables the service has
//! always read (`RATE_LIMIT_RPM`, `REDIS_URL`, ...).
//!
//! The boolean switches `RATE_LIMIT_ENABLED` and `AUTH_ENABLED` are true only
//! when set to `true` (any case); every other value reads as false.

use config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{GateError, Result};

/// Environment variables and the configuration keys they override.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("HTTP_ADDR", "server.addr"),
    ("RATE_LIMIT_RPM", "rate_limiting.requests_per_minute"),
    ("RATE_LIMIT_BURST", "rate_limiting.burst_size"),
    ("RATE_LIMIT_BACKEND", "rate_limiting.backend"),
    ("REDIS_URL", "rate_limiting.redis_url"),
];

/// Boolean switches and the configuration keys they override.
const ENV_SWITCHES: &[(&str, &str)] = &[
    ("RATE_LIMIT_ENABLED", "rate_limiting.enabled"),
    ("AUTH_ENABLED", "auth.enabled"),
];

/// Comma-separated lists of accepted client and admin API keys.
const KEY_LISTS: &[(&str, &str)] = &[
    ("API_KEYS", "auth.api_keys"),
    ("ADMIN_API_KEYS", "auth.admin_api_keys"),
];

/// Main configuration for the gate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitConfig,

    /// API key authentication
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_addr")]
    pub addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
        }
    }
}

fn default_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8000))
}

/// Which limiter implementation backs the gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process token buckets
    #[default]
    Memory,
    /// Sliding window kept in Redis, shared by every instance
    Redis,
}

/// What the gate does when the shared store cannot answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Admit the request and log a warning
    Open,
    /// Answer 503
    #[default]
    Closed,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Master switch
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Sustained requests per minute per client
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// Burst size, defaults to `requests_per_minute`
    #[serde(default)]
    pub burst_size: Option<u32>,

    /// Limiter implementation
    #[serde(default)]
    pub backend: Backend,

    /// Connection string for the Redis backend
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Round-trip budget for the Redis backend in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Behaviour when the Redis backend fails
    #[serde(default)]
    pub on_store_error: FailurePolicy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            requests_per_minute: default_requests_per_minute(),
            burst_size: None,
            backend: Backend::default(),
            redis_url: None,
            store_timeout_ms: default_store_timeout_ms(),
            on_store_error: FailurePolicy::default(),
        }
    }
}

impl RateLimitConfig {
    /// The effective burst size.
    pub fn burst(&self) -> u32 {
        self.burst_size.unwrap_or(self.requests_per_minute)
    }

    /// The store round-trip budget.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

fn default_enabled() -> bool {
    true
}

fn default_requests_per_minute() -> u32 {
    60
}

fn default_store_timeout_ms() -> u64 {
    500
}

/// API key authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Whether a valid `X-API-Key` is required
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Accepted keys
    #[serde(default)]
    pub api_keys: Vec<String>,

    /// Keys allowed to reset rate limits; the admin routes are only
    /// mounted when this is non-empty
    #[serde(default)]
    pub admin_api_keys: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            api_keys: Vec::new(),
            admin_api_keys: Vec::new(),
        }
    }
}

impl GateConfig {
    /// Load configuration from an optional YAML file and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, |name| std::env::var(name).ok())
    }

    /// Load configuration, reading environment variables through `env`.
    pub fn load_with<F>(path: Option<&Path>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
        }

        for (var, key) in ENV_OVERRIDES {
            builder = builder.set_override_option(*key, env(*var))?;
        }

        for (var, key) in ENV_SWITCHES {
            let switch = env(*var).map(|v| v.trim().eq_ignore_ascii_case("true"));
            builder = builder.set_override_option(*key, switch)?;
        }

        for (var, key) in KEY_LISTS {
            if let Some(keys) = env(*var) {
                let keys: Vec<String> = keys
                    .split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(String::from)
                    .collect();
                builder = builder.set_override(*key, keys)?;
            }
        }

        let config: GateConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that cannot be served.
    ///
    /// Zero requests per minute is valid: it blocks all traffic.
    pub fn validate(&self) -> Result<()> {
        let rl = &self.rate_limiting;

        if rl.burst_size == Some(0) && rl.requests_per_minute > 0 {
            return Err(GateError::Config(
                "burst_size must be positive when requests_per_minute is set".to_string(),
            ));
        }

        if rl.backend == Backend::Redis && rl.redis_url.as_deref().map_or(true, str::is_empty) {
            return Err(GateError::Config(
                "the redis backend requires REDIS_URL".to_string(),
            ));
        }

        if rl.store_timeout_ms == 0 {
            return Err(GateError::Config(
                "store_timeout_ms must be positive".to_string(),
            ));
        }

        if self.auth.enabled && self.auth.api_keys.is_empty() {
            return Err(GateError::Config(
                "No API keys configured. Set API_KEYS or disable AUTH_ENABLED".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = GateConfig::load_with(None, env(&[("API_KEYS", "pk_test")])).unwrap();

        assert_eq!(config.server.addr, "127.0.0.1:8000".parse().unwrap());
        assert!(config.rate_limiting.enabled);
        assert_eq!(config.rate_limiting.requests_per_minute, 60);
        assert_eq!(config.rate_limiting.burst(), 60);
        assert_eq!(config.rate_limiting.backend, Backend::Memory);
        assert_eq!(config.rate_limiting.on_store_error, FailurePolicy::Closed);
        assert_eq!(config.auth.api_keys, vec!["pk_test".to_string()]);
    }

    #[test]
    fn test_environment_overrides() {
        let config = GateConfig::load_with(
            None,
            env(&[
                ("HTTP_ADDR", "0.0.0.0:9000"),
                ("RATE_LIMIT_ENABLED", "false"),
                ("RATE_LIMIT_RPM", "120"),
                ("RATE_LIMIT_BURST", "10"),
                ("AUTH_ENABLED", "false"),
            ]),
        )
        .unwrap();

        assert_eq!(config.server.addr.port(), 9000);
        assert!(!config.rate_limiting.enabled);
        assert_eq!(config.rate_limiting.requests_per_minute, 120);
        assert_eq!(config.rate_limiting.burst(), 10);
        assert!(!config.auth.enabled);
    }

    #[test]
    fn test_switches_are_true_only_for_true() {
        let config = GateConfig::load_with(
            None,
            env(&[("RATE_LIMIT_ENABLED", "disabled"), ("AUTH_ENABLED", "0")]),
        )
        .unwrap();
        assert!(!config.rate_limiting.enabled);
        assert!(!config.auth.enabled);

        let config = GateConfig::load_with(
            None,
            env(&[
                ("RATE_LIMIT_ENABLED", "TRUE"),
                ("AUTH_ENABLED", " True "),
                ("API_KEYS", "pk_test"),
            ]),
        )
        .unwrap();
        assert!(config.rate_limiting.enabled);
        assert!(config.auth.enabled);
    }

    #[test]
    fn test_api_keys_are_split_and_trimmed() {
        let config =
            GateConfig::load_with(None, env(&[("API_KEYS", " pk_a , pk_b,,")])).unwrap();
        assert_eq!(config.auth.api_keys, vec!["pk_a".to_string(), "pk_b".to_string()]);
        assert!(config.auth.admin_api_keys.is_empty());
    }

    #[test]
    fn test_admin_keys_are_separate() {
        let config = GateConfig::load_with(
            None,
            env(&[("API_KEYS", "pk_client"), ("ADMIN_API_KEYS", "ak_ops, ak_oncall")]),
        )
        .unwrap();
        assert_eq!(config.auth.api_keys, vec!["pk_client".to_string()]);
        assert_eq!(
            config.auth.admin_api_keys,
            vec!["ak_ops".to_string(), "ak_oncall".to_string()]
        );
    }

    #[test]
    fn test_redis_backend_requires_url() {
        let result = GateConfig::load_with(
            None,
            env(&[("RATE_LIMIT_BACKEND", "redis"), ("AUTH_ENABLED", "false")]),
        );
        assert!(matches!(result, Err(GateError::Config(_))));

        let config = GateConfig::load_with(
            None,
            env(&[
                ("RATE_LIMIT_BACKEND", "redis"),
                ("REDIS_URL", "redis://localhost:6379"),
                ("AUTH_ENABLED", "false"),
            ]),
        )
        .unwrap();
        assert_eq!(config.rate_limiting.backend, Backend::Redis);
    }

    #[test]
    fn test_zero_rpm_is_valid() {
        let config = GateConfig::load_with(
            None,
            env(&[("RATE_LIMIT_RPM", "0"), ("AUTH_ENABLED", "false")]),
        )
        .unwrap();
        assert_eq!(config.rate_limiting.burst(), 0);
    }

    #[test]
    fn test_zero_burst_is_rejected() {
        let result = GateConfig::load_with(
            None,
            env(&[("RATE_LIMIT_BURST", "0"), ("AUTH_ENABLED", "false")]),
        );
        assert!(matches!(result, Err(GateError::Config(_))));
    }

    #[test]
    fn test_auth_without_keys_is_rejected() {
        let result = GateConfig::load_with(None, env(&[]));
        assert!(matches!(result, Err(GateError::Config(_))));
    }

    #[test]
    fn test_load_from_yaml_file() {
        let path = std::env::temp_dir().join(format!("gate-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            r#"
rate_limiting:
  requests_per_minute: 30
  burst_size: 5
  on_store_error: open
auth:
  enabled: false
"#,
        )
        .unwrap();

        let config = GateConfig::load_with(Some(&path), env(&[("RATE_LIMIT_RPM", "45")]));
        std::fs::remove_file(&path).unwrap();
        let config = config.unwrap();

        // environment wins over the file
        assert_eq!(config.rate_limiting.requests_per_minute, 45);
        assert_eq!(config.rate_limiting.burst(), 5);
        assert_eq!(config.rate_limiting.on_store_error, FailurePolicy::Open);
        assert!(!config.auth.enabled);
    }
}
