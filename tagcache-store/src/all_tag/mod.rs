//! All-mode (intersection) tagging.
//!
//! Every tag is a sorted set `<prefix>tag:<name>:entries` whose members are
//! bare cache keys scored by their absolute expiry, or [`FOREVER_SCORE`] for
//! entries that never expire.
//!
//! Each write checks out one connection and sends one batch: a `ZADD` per tag
//! followed by the data write.

mod entries;

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

/// All-mode operation set.
#[derive(Debug, Clone)]
pub struct AllTagOperations {
    ctx: StoreContext,
}

impl AllTagOperations {
    pub fn new(ctx: StoreContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &StoreContext {
        &self.ctx
    }

    /// Store `value` for `ttl` seconds and record it under every tag.
    pub async fn put<T>(&self, key: &str, value: &T, ttl: i64, tag_ids: &[String]) -> CacheResult<bool>
    where
        T: Serialize + ?Sized,
    {
        let data = DataWrite::put(serialize(value)?, ttl);
        let mut conn = self.ctx.connection().await?;
        let reply = self.write(&mut conn, key, &data, tag_ids).await?;
        Ok(write::stored(&reply))
    }

    /// Store several values in one batch.
    pub async fn put_many<K, T>(&self, items: &[(K, T)], ttl: i64, tag_ids: &[String]) -> CacheResult<bool>
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
            self.queue(&mut batch, key.as_ref(), &data, now, tag_ids);
            data_slots.push(batch.len() - 1);
        }

        let outcomes = batch.execute_each(&mut conn).await?;
        let replies = write::data_replies(outcomes, &data_slots)?;
        Ok(replies.iter().all(write::stored))
    }

    /// Store `value` only if `key` is absent.
    ///
    /// Tag entries are written whether or not the value was stored.
    pub async fn add<T>(&self, key: &str, value: &T, ttl: i64, tag_ids: &[String]) -> CacheResult<bool>
    where
        T: Serialize + ?Sized,
    {
        let data = DataWrite::add(serialize(value)?, ttl);
        let mut conn = self.ctx.connection().await?;
        let reply = self.write(&mut conn, key, &data, tag_ids).await?;
        Ok(write::stored(&reply))
    }

    /// Store `value` without expiry.
    pub async fn forever<T>(&self, key: &str, value: &T, tag_ids: &[String]) -> CacheResult<bool>
    where
        T: Serialize + ?Sized,
    {
        let data = DataWrite::Forever {
            payload: serialize(value)?,
        };
        let mut conn = self.ctx.connection().await?;
        let reply = self.write(&mut conn, key, &data, tag_ids).await?;
        Ok(write::stored(&reply))
    }

    /// Add `delta` to the counter at `key`, returning the new value.
    pub async fn increment(&self, key: &str, delta: i64, tag_ids: &[String]) -> CacheResult<i64> {
        let mut conn = self.ctx.connection().await?;
        let reply = self
            .write(&mut conn, key, &DataWrite::Increment(delta), tag_ids)
            .await?;
        write::counter(&reply)
    }

    /// Subtract `delta` from the counter at `key`, returning the new value.
    pub async fn decrement(&self, key: &str, delta: i64, tag_ids: &[String]) -> CacheResult<i64> {
        let mut conn = self.ctx.connection().await?;
        let reply = self
            .write(&mut conn, key, &DataWrite::Decrement(delta), tag_ids)
            .await?;
        write::counter(&reply)
    }

    /// Record `key` under every tag without touching its value.
    ///
    /// `ttl` of `None` records the forever score. With `only_new`, existing
    /// tag entries keep their score (`ZADD NX`).
    pub async fn add_entry(
        &self,
        key: &str,
        ttl: Option<i64>,
        tag_ids: &[String],
        only_new: bool,
    ) -> CacheResult<()> {
        let score = ttl.map_or(FOREVER_SCORE, |ttl| write::expires_in(write::now(), ttl));
        let mut conn = self.ctx.connection().await?;
        let mut batch = CommandBatch::for_connection(&conn);
        self.queue_entries(&mut batch, key, score, tag_ids, only_new);
        batch.execute(&mut conn).await?;
        Ok(())
    }

    /// Return the cached value, or produce, store and return it.
    ///
    /// The lookup and the write share one connection checkout. On a hit the
    /// producer is not called and nothing is written. The flag is `true` for
    /// a hit.
    pub async fn remember<T, F, Fut>(
        &self,
        key: &str,
        ttl: i64,
        tag_ids: &[String],
        producer: F,
    ) -> CacheResult<(T, bool)>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        let mut conn = self.ctx.connection().await?;
        if let Some(value) = write::fetch(&mut conn, &self.ctx.prefixed(key)).await? {
            trace!(key, "Tagged remember hit");
            return Ok((value, true));
        }

        let value = producer().await?;
        let data = DataWrite::put(serialize(&value)?, ttl);
        self.write(&mut conn, key, &data, tag_ids).await?;
        Ok((value, false))
    }

    /// [`remember`](Self::remember) without expiry.
    pub async fn remember_forever<T, F, Fut>(
        &self,
        key: &str,
        tag_ids: &[String],
        producer: F,
    ) -> CacheResult<(T, bool)>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        let mut conn = self.ctx.connection().await?;
        if let Some(value) = write::fetch(&mut conn, &self.ctx.prefixed(key)).await? {
            trace!(key, "Tagged remember hit");
            return Ok((value, true));
        }

        let value = producer().await?;
        let data = DataWrite::Forever {
            payload: serialize(&value)?,
        };
        self.write(&mut conn, key, &data, tag_ids).await?;
        Ok((value, false))
    }

    async fn write(
        &self,
        conn: &mut TagConnection<'_>,
        key: &str,
        data: &DataWrite,
        tag_ids: &[String],
    ) -> CacheResult<redis::Value> {
        trace!(key, tags = tag_ids.len(), "All-mode tagged write");

        let mut batch = CommandBatch::for_connection(conn);
        self.queue(&mut batch, key, data, write::now(), tag_ids);
        write::last_reply(batch, conn).await
    }

    fn queue(&self, batch: &mut CommandBatch, key: &str, data: &DataWrite, now: i64, tag_ids: &[String]) {
        let score = data.expires_at(now).unwrap_or(FOREVER_SCORE);
        self.queue_entries(batch, key, score, tag_ids, data.is_counter());
        batch.push(data.command(&self.ctx.prefixed(key)));
    }

    fn queue_entries(&self, batch: &mut CommandBatch, key: &str, score: i64, tag_ids: &[String], only_new: bool) {
        for tag_id in tag_ids {
            let mut zadd = redis::cmd("ZADD");
            zadd.arg(self.ctx.all_tag_key(tag_id));
            if only_new {
                zadd.arg("NX");
            }
            zadd.arg(score).arg(key);
            batch.push(zadd);
        }
    }
}
