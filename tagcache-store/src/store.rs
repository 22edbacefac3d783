//! The store facade.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tagcache_redis::ConnectionProvider;
use tracing::{debug, info};

use crate::all_tag::AllTagOperations;
use crate::any_tag::AnyTagOperations;
use crate::config::{CacheConfig, TagMode};
use crate::context::StoreContext;
use crate::error::CacheResult;
use crate::prune::PruneReport;
use crate::reply;
use crate::serialization::serialize;
use crate::tagged::{TagSet, TaggedCache};
use crate::write::{self, DataWrite};

/// The operation set selected by the tag mode.
#[derive(Debug, Clone)]
pub enum TagStrategy {
    All(AllTagOperations),
    Any(AnyTagOperations),
}

impl TagStrategy {
    fn for_context(ctx: &StoreContext) -> Self {
        match ctx.mode() {
            TagMode::All => TagStrategy::All(AllTagOperations::new(ctx.clone())),
            TagMode::Any => TagStrategy::Any(AnyTagOperations::new(ctx.clone())),
        }
    }
}

/// Redis-backed cache store with tag-based invalidation.
///
/// # Examples
///
/// ```rust,ignore
/// use tagcache_store::{CacheConfig, RedisStore, TagMode};
///
/// let store = RedisStore::connect(
///     CacheConfig::redis("redis://localhost:6379")
///         .with_prefix("app")
///         .with_tag_mode(TagMode::Any),
/// )
/// .await?;
///
/// store.tags(["users"]).put("user:1", &user, 3600).await?;
/// store.tags(["users"]).flush().await?;
/// ```
#[derive(Debug, Clone)]
pub struct RedisStore {
    ctx: StoreContext,
    strategy: TagStrategy,
}

impl RedisStore {
    /// Connect to the Redis deployment described by `config`.
    pub async fn connect(config: CacheConfig) -> CacheResult<Self> {
        config.validate()?;
        let provider = tagcache_redis::connect(config.redis.clone()).await?;
        info!(
            prefix = %config.normalized_prefix(),
            mode = %config.tag_mode,
            cluster = provider.is_cluster(),
            "Redis cache store ready"
        );
        Ok(Self::new(provider, &config))
    }

    /// Build a store over an existing connection provider.
    pub fn new(provider: Arc<dyn ConnectionProvider>, config: &CacheConfig) -> Self {
        Self::from_context(StoreContext::new(provider, config))
    }

    fn from_context(ctx: StoreContext) -> Self {
        let strategy = TagStrategy::for_context(&ctx);
        Self { ctx, strategy }
    }

    pub fn context(&self) -> &StoreContext {
        &self.ctx
    }

    pub fn strategy(&self) -> &TagStrategy {
        &self.strategy
    }

    pub fn tag_mode(&self) -> TagMode {
        self.ctx.mode()
    }

    /// Switch the tag mode in place.
    ///
    /// Data written in the other mode is invisible to this one; switch
    /// against a clean keyspace.
    pub fn set_tag_mode(&mut self, mode: TagMode) {
        if mode != self.ctx.mode() {
            debug!(from = %self.ctx.mode(), to = %mode, "Switching tag mode");
            *self = Self::from_context(self.ctx.with_mode(mode));
        }
    }

    /// A store over the same connections running in `mode`.
    pub fn with_tag_mode(&self, mode: TagMode) -> Self {
        Self::from_context(self.ctx.with_mode(mode))
    }

    /// Operations scoped to the given tags.
    pub fn tags<I, S>(&self, names: I) -> TaggedCache<'_>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TaggedCache::new(self, TagSet::new(names))
    }

    /// Read an untagged value.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let mut conn = self.ctx.connection().await?;
        write::fetch(&mut conn, &self.ctx.prefixed(key)).await
    }

    /// Store an untagged value for `ttl` seconds (floored to 1).
    pub async fn put<T>(&self, key: &str, value: &T, ttl: i64) -> CacheResult<bool>
    where
        T: Serialize + ?Sized,
    {
        let data = DataWrite::put(serialize(value)?, ttl);
        self.write(key, &data).await
    }

    /// Store an untagged value without expiry.
    pub async fn forever<T>(&self, key: &str, value: &T) -> CacheResult<bool>
    where
        T: Serialize + ?Sized,
    {
        let data = DataWrite::Forever {
            payload: serialize(value)?,
        };
        self.write(key, &data).await
    }

    async fn write(&self, key: &str, data: &DataWrite) -> CacheResult<bool> {
        let mut conn = self.ctx.connection().await?;
        let reply: redis::Value = data.command(&self.ctx.prefixed(key)).query_async(&mut conn).await?;
        Ok(write::stored(&reply))
    }

    /// Delete a value. Tag references to it are left for prune.
    pub async fn forget(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.ctx.connection().await?;
        let reply: redis::Value = redis::cmd("DEL")
            .arg(self.ctx.prefixed(key))
            .query_async(&mut conn)
            .await?;
        Ok(reply::int(&reply).unwrap_or(0) > 0)
    }

    /// Garbage-collect the tag structures of the active mode.
    pub async fn prune(&self) -> CacheResult<PruneReport> {
        match &self.strategy {
            TagStrategy::All(ops) => ops.prune().await.map(PruneReport::All),
            TagStrategy::Any(ops) => ops.prune().await.map(PruneReport::Any),
        }
    }
}
