//! Any-mode (union) tagging.
//!
//! Every tag is a hash `<prefix>_any:tag:<name>:entries` mapping bare cache
//! keys to their absolute expiry (`-1` for entries that never expire). A
//! registry sorted set `<prefix>_any:tag:registry` lists tag names scored by
//! the latest expiry ever written under the tag (`+inf` once a forever entry
//! or counter joins it), so expired tags can be found without a keyspace scan.
//!
//! Writes follow the same single-checkout, single-batch discipline as
//! All-mode.

mod keys;

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use tagcache_redis::TagConnection;
use tracing::trace;

use crate::batch::CommandBatch;
use crate::context::StoreContext;
use crate::error::CacheResult;
use crate::serialization::serialize;
use crate::write::{self, DataWrite, FOREVER_SCORE};

const REGISTRY_FOREVER: &str = "+inf";

/// Any-mode operation set.
#[derive(Debug, Clone)]
pub struct AnyTagOperations {
    ctx: StoreContext,
}

impl AnyTagOperations {
    pub fn new(ctx: StoreContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &StoreContext {
        &self.ctx
    }

    /// Store `value` for `ttl` seconds and record it under every tag.
    pub async fn put<T>(&self, key: &str, value: &T, ttl: i64, tags: &[String]) -> CacheResult<bool>
    where
        T: Serialize + ?Sized,
    {
        let data = DataWrite::put(serialize(value)?, ttl);
        let mut conn = self.ctx.connection().await?;
        let reply = self.write(&mut conn, key, &data, tags).await?;
        Ok(write::stored(&reply))
    }

    /// Store several values in one batch.
    pub async fn put_many<K, T>(&self, items: &[(K, T)], ttl: i64, tags: &[String]) -> CacheResult<bool>
    where
        K: AsRef<str>,
        T: Serialize,
    {
        if items.is_empty() {
            return Ok(true);
        }

        let now = write::now();
        let mut conn = self.ctx.connection().await?;
        let mut batch = CommandBatch::for_connection(&conn);
        let mut data_slots = Vec::with_capacity(items.len());
        for (key, value) in items {
            let data = DataWrite::put(serialize(value)?, ttl);
            self.queue(&mut batch, key.as_ref(), &data, now, tags);
            data_slots.push(batch.len() - 1);
        }

        let outcomes = batch.execute_each(&mut conn).await?;
        let replies = write::data_replies(outcomes, &data_slots)?;
        Ok(replies.iter().all(write::stored))
    }

    /// Store `value` only if `key` is absent.
    ///
    /// Tag entries are written whether or not the value was stored.
    pub async fn add<T>(&self, key: &str, value: &T, ttl: i64, tags: &[String]) -> CacheResult<bool>
    where
        T: Serialize + ?Sized,
    {
        let data = DataWrite::add(serialize(value)?, ttl);
        let mut conn = self.ctx.connection().await?;
        let reply = self.write(&mut conn, key, &data, tags).await?;
        Ok(write::stored(&reply))
    }

    /// Store `value` without expiry.
    pub async fn forever<T>(&self, key: &str, value: &T, tags: &[String]) -> CacheResult<bool>
    where
        T: Serialize + ?Sized,
    {
        let data = DataWrite::Forever {
            payload: serialize(value)?,
        };
        let mut conn = self.ctx.connection().await?;
        let reply = self.write(&mut conn, key, &data, tags).await?;
        Ok(write::stored(&reply))
    }

    /// Add `delta` to the counter at `key`, returning the new value.
    pub async fn increment(&self, key: &str, delta: i64, tags: &[String]) -> CacheResult<i64> {
        let mut conn = self.ctx.connection().await?;
        let reply = self
            .write(&mut conn, key, &DataWrite::Increment(delta), tags)
            .await?;
        write::counter(&reply)
    }

    /// Subtract `delta` from the counter at `key`, returning the new value.
    pub async fn decrement(&self, key: &str, delta: i64, tags: &[String]) -> CacheResult<i64> {
        let mut conn = self.ctx.connection().await?;
        let reply = self
            .write(&mut conn, key, &DataWrite::Decrement(delta), tags)
            .await?;
        write::counter(&reply)
    }

    /// Return the cached value, or produce, store and return it.
    ///
    /// One connection checkout covers the lookup and the write. The flag is
    /// `true` for a hit.
    pub async fn remember<T, F, Fut>(
        &self,
        key: &str,
        ttl: i64,
        tags: &[String],
        producer: F,
    ) -> CacheResult<(T, bool)>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        let mut conn = self.ctx.connection().await?;
        if let Some(value) = write::fetch(&mut conn, &self.ctx.prefixed(key)).await? {
            return Ok((value, true));
        }

        let value = producer().await?;
        let data = DataWrite::put(serialize(&value)?, ttl);
        self.write(&mut conn, key, &data, tags).await?;
        Ok((value, false))
    }

    /// [`remember`](Self::remember) without expiry.
    pub async fn remember_forever<T, F, Fut>(
        &self,
        key: &str,
        tags: &[String],
        producer: F,
    ) -> CacheResult<(T, bool)>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        let mut conn = self.ctx.connection().await?;
        if let Some(value) = write::fetch(&mut conn, &self.ctx.prefixed(key)).await? {
            return Ok((value, true));
        }

        let value = producer().await?;
        let data = DataWrite::Forever {
            payload: serialize(&value)?,
        };
        self.write(&mut conn, key, &data, tags).await?;
        Ok((value, false))
    }

    async fn write(
        &self,
        conn: &mut TagConnection<'_>,
        key: &str,
        data: &DataWrite,
        tags: &[String],
    ) -> CacheResult<redis::Value> {
        trace!(key, tags = tags.len(), "Any-mode tagged write");

        let mut batch = CommandBatch::for_connection(conn);
        self.queue(&mut batch, key, data, write::now(), tags);
        write::last_reply(batch, conn).await
    }

    fn queue(&self, batch: &mut CommandBatch, key: &str, data: &DataWrite, now: i64, tags: &[String]) {
        let expires_at = data.expires_at(now);
        let field_value = expires_at.unwrap_or(FOREVER_SCORE);
        let registry_key = self.ctx.registry_key();

        for tag in tags {
            let hash_key = self.ctx.any_tag_key(tag);

            // Counters keep an existing expiry marker.
            let mut hset = redis::cmd(if data.is_counter() { "HSETNX" } else { "HSET" });
            hset.arg(&hash_key).arg(key).arg(field_value);
            batch.push(hset);

            let mut zadd = redis::cmd("ZADD");
            zadd.arg(&registry_key).arg("GT");
            match expires_at {
                Some(at) => zadd.arg(at),
                None => zadd.arg(REGISTRY_FOREVER),
            };
            zadd.arg(tag);
            batch.push(zadd);
        }

        batch.push(data.command(&self.ctx.prefixed(key)));
    }
}
