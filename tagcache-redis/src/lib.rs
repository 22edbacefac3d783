//! # Tagcache Redis
//!
//! Connection layer for the tagged cache engine.
//!
//! ## Features
//!
//! - **Connection Pooling**: standalone Redis behind a bb8 pool
//! - **Cluster Support**: Redis Cluster with keyspace scans on every primary
//! - **Single Checkout**: every cache operation borrows exactly one connection
//! - **In-Process Redis**: [`MemoryRedis`] for tests and local tooling
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tagcache_redis::{connect, RedisConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RedisConfig::builder()
//!         .url("redis://localhost:6379")
//!         .pool_size(10)
//!         .build();
//!
//!     let provider = connect(config).await?;
//!
//!     let mut conn = provider.checkout().await?;
//!     redis::cmd("SET")
//!         .arg("key")
//!         .arg("value")
//!         .query_async::<()>(&mut conn)
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod memory;
mod pattern;
mod pool;
mod provider;
mod service;
mod topology;

pub use config::{RedisConfig, RedisConfigBuilder};
pub use error::{RedisError, Result};
pub use memory::{MemoryConnection, MemoryRedis};
pub use pattern::{GlobPattern, glob_match};
pub use pool::{RedisConnection, RedisPool, RedisPoolBuilder};
pub use provider::{ConnectionProvider, TagConnection};
pub use service::{ClusterService, PoolStats, RedisService, connect};
pub use topology::{ClusterNode, parse_primaries};

// Re-export redis crate for convenience
pub use redis;
pub use redis::{RedisResult, Value};

/// Prelude for common imports.
///
/// ```
/// use tagcache_redis::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{RedisConfig, RedisConfigBuilder};
    pub use crate::error::{RedisError, Result};
    pub use crate::memory::MemoryRedis;
    pub use crate::provider::{ConnectionProvider, TagConnection};
    pub use crate::service::{ClusterService, RedisService, connect};
}
