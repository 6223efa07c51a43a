//! API key authentication.
//!
//! Only the part the admission gate needs: validate the `X-API-Key` header
//! and hand the authenticated key on as the caller's identity. Admin keys
//! form a separate set; client keys never pass the admin check.

use std::collections::HashSet;
use std::fmt;

use crate::config::AuthConfig;
use crate::error::{GateError, Result};

/// Header carrying the caller's API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// An API key that passed validation.
///
/// Stored in request extensions; the admission gate prefers it over the
/// peer address as the rate limit key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The key with all but its tail hidden.
    pub fn masked(&self) -> String {
        mask_api_key(&self.0)
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ApiKey").field(&self.masked()).finish()
    }
}

/// Why a request failed authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    Missing,
    Invalid,
    /// A key was presented but it is not an admin key
    Forbidden,
}

impl AuthRejection {
    pub fn message(&self) -> &'static str {
        match self {
            AuthRejection::Missing => "Missing API key. Provide X-API-Key header.",
            AuthRejection::Invalid => "Invalid API key",
            AuthRejection::Forbidden => "Admin API key required",
        }
    }
}

/// Validates presented API keys against a fixed set.
#[derive(Debug, Clone)]
pub struct ApiKeyAuth {
    keys: HashSet<String>,
    admin_keys: HashSet<String>,
    required: bool,
}

impl ApiKeyAuth {
    /// Create an authenticator.
    ///
    /// Requiring authentication with no keys configured is an error.
    pub fn new<I>(keys: I, required: bool) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let keys: HashSet<String> = keys.into_iter().filter(|k| !k.is_empty()).collect();
        if required && keys.is_empty() {
            return Err(GateError::Config(
                "No API keys configured. Set API_KEYS or disable AUTH_ENABLED".to_string(),
            ));
        }
        Ok(Self {
            keys,
            admin_keys: HashSet::new(),
            required,
        })
    }

    /// Accept `keys` on the admin routes.
    pub fn with_admin_keys<I>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        self.admin_keys = keys.into_iter().filter(|k| !k.is_empty()).collect();
        self
    }

    /// Create an authenticator from configuration.
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        Ok(Self::new(config.api_keys.iter().cloned(), config.enabled)?
            .with_admin_keys(config.admin_api_keys.iter().cloned()))
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Whether any admin key is configured.
    pub fn has_admin_keys(&self) -> bool {
        !self.admin_keys.is_empty()
    }

    /// Whether `key` would be accepted.
    pub fn validate(&self, key: Option<&str>) -> bool {
        if !self.required {
            return true;
        }
        key.is_some_and(|k| self.keys.contains(k))
    }

    /// Authenticate the presented header value.
    ///
    /// Returns the identity to attach to the request. When authentication is
    /// not required nothing is attached, so the gate keys on the peer address.
    pub fn authenticate(&self, presented: Option<&str>) -> std::result::Result<Option<ApiKey>, AuthRejection> {
        if !self.required {
            return Ok(None);
        }

        match presented {
            None => Err(AuthRejection::Missing),
            Some(key) if self.keys.contains(key) => Ok(Some(ApiKey(key.to_string()))),
            Some(_) => Err(AuthRejection::Invalid),
        }
    }

    /// Check the presented header value against the admin keys.
    ///
    /// Applies whether or not client authentication is required.
    pub fn authorize_admin(&self, presented: Option<&str>) -> std::result::Result<(), AuthRejection> {
        match presented {
            None => Err(AuthRejection::Missing),
            Some(key) if self.admin_keys.contains(key) => Ok(()),
            Some(_) => Err(AuthRejection::Forbidden),
        }
    }
}

/// Mask an API key for logging, keeping a `prefix_` and the last four characters.
pub fn mask_api_key(key: &str) -> String {
    const VISIBLE: usize = 4;

    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= VISIBLE {
        return "***".to_string();
    }

    let tail = |s: &str| -> String {
        let chars: Vec<char> = s.chars().collect();
        chars[chars.len().saturating_sub(VISIBLE)..].iter().collect()
    };

    match key.split_once('_') {
        Some((prefix, rest)) => format!("{}_***{}", prefix, tail(rest)),
        None => format!("***{}", tail(key)),
    }
}
