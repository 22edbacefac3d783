// tagcache - Redis cache store with tag-based invalidation
//
// This library ties the connection layer and the tagging engine together
// behind one crate.

//! Redis cache store with tag-based invalidation.
//!
//! Items are written under one or more tags and invalidated by tag later.
//! Two strategies are available:
//!
//! - **All** (default): a tag set is one namespace. Flushing any of its tags
//!   drops the items written under that exact combination.
//! - **Any**: every tag indexes its items independently. Flushing one tag
//!   drops every item that carried it.
//!
//! Tag bookkeeping is repaired out of band by [`RedisStore::prune`], either on
//! demand or through a [`PruneScheduler`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tagcache::prelude::*;
//!
//! # async fn example() -> Result<(), CacheError> {
//! let store = RedisStore::connect(
//!     CacheConfig::redis("redis://localhost:6379")
//!         .with_prefix("app")
//!         .with_tag_mode(TagMode::Any),
//! )
//! .await?;
//!
//! let users = store.tags(["users", "team:7"]);
//! users.put("user:1", "Ada", 3600).await?;
//! users.flush().await?;
//!
//! let _scheduler = PruneScheduler::spawn(Arc::new(store), Duration::from_secs(300));
//! # Ok(())
//! # }
//! ```

// Re-export member crates
pub use tagcache_redis;
pub use tagcache_store;

pub use tagcache_redis::{MemoryRedis, RedisConfig, RedisConfigBuilder, RedisError};
pub use tagcache_store::*;

/// Everything needed to configure, open and use a store.
///
/// ```
/// use tagcache::prelude::*;
/// ```
pub mod prelude {
    pub use tagcache_redis::{ConnectionProvider, MemoryRedis, RedisConfig, RedisConfigBuilder};
    pub use tagcache_store::{
        CacheConfig, CacheError, CacheResult, PruneReport, PruneScheduler, RedisStore, TagMode,
        TagSet, TaggedCache,
    };
}
