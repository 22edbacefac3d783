//! Error types for cache operations.

use thiserror::Error;

use crate::config::TagMode;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific errors.
///
/// Transport failures are passed through unchanged; this layer never retries.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Redis command or transport error
    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    /// Connection checkout or pool error
    #[error(transparent)]
    Connection(#[from] tagcache_redis::RedisError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown tag mode name
    #[error("Invalid tag mode '{0}', expected 'all' or 'any'")]
    InvalidTagMode(String),

    /// Operation not available in the active tag mode
    #[error("{operation} is not supported in {mode} tag mode")]
    Unsupported {
        /// Operation name
        operation: &'static str,
        /// Active mode
        mode: TagMode,
    },
}

impl CacheError {
    /// Whether the error came from the connection layer or the transport.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Redis(err) => err.is_io_error(),
            _ => false,
        }
    }
}
