//! Connection-layer error types.

use thiserror::Error;

/// Result type for connection-layer operations.
pub type Result<T> = std::result::Result<T, RedisError>;

/// Errors raised while configuring or checking out Redis connections.
#[derive(Debug, Error)]
pub enum RedisError {
    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Pool error (exhausted, timed out, or broken).
    #[error("Pool error: {0}")]
    Pool(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cluster error.
    #[error("Cluster error: {0}")]
    Cluster(String),

    /// Underlying Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl RedisError {
    /// Check if this error is retryable.
    ///
    /// This layer never retries by itself; callers decide.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Pool(_) | Self::Cluster(_))
    }
}

impl<E> From<bb8::RunError<E>> for RedisError
where
    E: std::error::Error + 'static,
{
    fn from(err: bb8::RunError<E>) -> Self {
        Self::Pool(err.to_string())
    }
}

impl From<serde_json::Error> for RedisError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}
