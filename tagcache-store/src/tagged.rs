//! Tag-scoped view of a store.

use futures::stream::BoxStream;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::future::Future;

use crate::config::TagMode;
use crate::context::tag_id;
use crate::error::{CacheError, CacheResult};
use crate::store::{RedisStore, TagStrategy};

/// An ordered list of tag names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagSet {
    names: Vec<String>,
}

impl TagSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// All-mode tag ids (`tag:<name>`), in order.
    pub fn tag_ids(&self) -> Vec<String> {
        self.names.iter().map(|name| tag_id(name)).collect()
    }

    /// Namespace of this exact tag combination: the SHA-256 hex digest of
    /// the tag ids joined with `|`. Order matters.
    pub fn namespace(&self) -> String {
        let joined = self.tag_ids().join("|");
        hex::encode(Sha256::digest(joined.as_bytes()))
    }
}

/// Cache operations scoped to a [`TagSet`], obtained from
/// [`RedisStore::tags`].
///
/// In All-mode items are stored under `<namespace>:<key>`, so an item is only
/// reachable through the same tag combination it was written with. In
/// Any-mode items keep their plain key and can be flushed through any one of
/// their tags.
///
/// # Examples
///
/// ```rust,ignore
/// let posts = store.tags(["posts", "user:42"]);
///
/// posts.put("latest", &latest, 600).await?;
/// let (feed, hit) = posts
///     .remember("feed", 600, || async { load_feed().await })
///     .await?;
///
/// posts.flush().await?;
/// ```
#[derive(Debug, Clone)]
pub struct TaggedCache<'s> {
    store: &'s RedisStore,
    tags: TagSet,
    tag_ids: Vec<String>,
    namespace: String,
}

impl<'s> TaggedCache<'s> {
    pub(crate) fn new(store: &'s RedisStore, tags: TagSet) -> Self {
        let tag_ids = tags.tag_ids();
        let namespace = tags.namespace();
        Self {
            store,
            tags,
            tag_ids,
            namespace,
        }
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    /// The cache key (without store prefix) `key` is stored under.
    pub fn item_key(&self, key: &str) -> String {
        match self.store.tag_mode() {
            TagMode::All => format!("{}:{}", self.namespace, key),
            TagMode::Any => key.to_string(),
        }
    }

    fn unsupported(&self, operation: &'static str) -> CacheError {
        CacheError::Unsupported {
            operation,
            mode: self.store.tag_mode(),
        }
    }

    /// Read an item.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        self.store.get(&self.item_key(key)).await
    }

    /// Store an item for `ttl` seconds (floored to 1).
    pub async fn put<T>(&self, key: &str, value: &T, ttl: i64) -> CacheResult<bool>
    where
        T: Serialize + ?Sized,
    {
        let key = self.item_key(key);
        match self.store.strategy() {
            TagStrategy::All(ops) => ops.put(&key, value, ttl, &self.tag_ids).await,
            TagStrategy::Any(ops) => ops.put(&key, value, ttl, self.tags.names()).await,
        }
    }

    /// Store several items in one batch.
    pub async fn put_many<K, T>(&self, items: &[(K, T)], ttl: i64) -> CacheResult<bool>
    where
        K: AsRef<str>,
        T: Serialize,
    {
        let items: Vec<(String, &T)> = items
            .iter()
            .map(|(key, value)| (self.item_key(key.as_ref()), value))
            .collect();
        match self.store.strategy() {
            TagStrategy::All(ops) => ops.put_many(&items, ttl, &self.tag_ids).await,
            TagStrategy::Any(ops) => ops.put_many(&items, ttl, self.tags.names()).await,
        }
    }

    /// Store an item only if absent. Tags are recorded either way.
    pub async fn add<T>(&self, key: &str, value: &T, ttl: i64) -> CacheResult<bool>
    where
        T: Serialize + ?Sized,
    {
        let key = self.item_key(key);
        match self.store.strategy() {
            TagStrategy::All(ops) => ops.add(&key, value, ttl, &self.tag_ids).await,
            TagStrategy::Any(ops) => ops.add(&key, value, ttl, self.tags.names()).await,
        }
    }

    /// Store an item without expiry.
    pub async fn forever<T>(&self, key: &str, value: &T) -> CacheResult<bool>
    where
        T: Serialize + ?Sized,
    {
        let key = self.item_key(key);
        match self.store.strategy() {
            TagStrategy::All(ops) => ops.forever(&key, value, &self.tag_ids).await,
            TagStrategy::Any(ops) => ops.forever(&key, value, self.tags.names()).await,
        }
    }

    pub async fn increment(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let key = self.item_key(key);
        match self.store.strategy() {
            TagStrategy::All(ops) => ops.increment(&key, delta, &self.tag_ids).await,
            TagStrategy::Any(ops) => ops.increment(&key, delta, self.tags.names()).await,
        }
    }

    pub async fn decrement(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let key = self.item_key(key);
        match self.store.strategy() {
            TagStrategy::All(ops) => ops.decrement(&key, delta, &self.tag_ids).await,
            TagStrategy::Any(ops) => ops.decrement(&key, delta, self.tags.names()).await,
        }
    }

    /// Cached value or the producer's, stored for `ttl` seconds. The flag is
    /// `true` on a cache hit.
    pub async fn remember<T, F, Fut>(&self, key: &str, ttl: i64, producer: F) -> CacheResult<(T, bool)>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        let key = self.item_key(key);
        match self.store.strategy() {
            TagStrategy::All(ops) => ops.remember(&key, ttl, &self.tag_ids, producer).await,
            TagStrategy::Any(ops) => ops.remember(&key, ttl, self.tags.names(), producer).await,
        }
    }

    /// Cached value or the producer's, stored without expiry.
    pub async fn remember_forever<T, F, Fut>(&self, key: &str, producer: F) -> CacheResult<(T, bool)>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        let key = self.item_key(key);
        match self.store.strategy() {
            TagStrategy::All(ops) => ops.remember_forever(&key, &self.tag_ids, producer).await,
            TagStrategy::Any(ops) => ops.remember_forever(&key, self.tags.names(), producer).await,
        }
    }

    /// Invalidate every item recorded under these tags.
    pub async fn flush(&self) -> CacheResult<u64> {
        match self.store.strategy() {
            TagStrategy::All(ops) => ops.flush(&self.tag_ids).await,
            TagStrategy::Any(ops) => ops.flush(self.tags.names()).await,
        }
    }

    /// Drop expired tag entries. All-mode only; Any-mode relies on prune.
    pub async fn flush_stale(&self) -> CacheResult<u64> {
        match self.store.strategy() {
            TagStrategy::All(ops) => ops.flush_stale(&self.tag_ids).await,
            TagStrategy::Any(_) => Err(self.unsupported("flush_stale")),
        }
    }

    /// Lazily stream the cache keys recorded under these tags.
    pub async fn entries(&self) -> CacheResult<BoxStream<'s, CacheResult<String>>> {
        match self.store.strategy() {
            TagStrategy::All(ops) => ops.get_entries(&self.tag_ids).await,
            TagStrategy::Any(ops) => ops.get_tagged_keys(self.tags.names()).await,
        }
    }

    /// Lazily stream `(key, value)` of live items. Any-mode only.
    pub async fn items<T>(&self) -> CacheResult<BoxStream<'s, CacheResult<(String, T)>>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        match self.store.strategy() {
            TagStrategy::All(_) => Err(self.unsupported("items")),
            TagStrategy::Any(ops) => ops.get_tag_items(self.tags.names()).await,
        }
    }
}
