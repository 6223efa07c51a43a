//! Error types for the admission gate.

use std::time::Duration;

use thiserror::Error;

/// Main error type for gate operations.
///
/// Rate limit rejections are not errors; they are reported through
/// [`crate::ratelimit::Decision::allowed`].
#[derive(Error, Debug)]
pub enum GateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The shared window store failed to answer
    #[error("Rate limit store error: {0}")]
    Store(#[from] redis::RedisError),

    /// The shared window store did not answer in time
    #[error("Rate limit store timed out after {0:?}")]
    StoreTimeout(Duration),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GateError {
    /// Whether this error came from the shared store rather than local setup.
    pub fn is_store_fault(&self) -> bool {
        matches!(self, GateError::Store(_) | GateError::StoreTimeout(_))
    }
}

impl From<config::ConfigError> for GateError {
    fn from(err: config::ConfigError) -> Self {
        GateError::Config(err.to_string())
    }
}

/// Result type alias for gate operations.
pub type Result<T> = std::result::Result<T, GateError>;
