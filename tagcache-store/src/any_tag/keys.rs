use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use tagcache_redis::TagConnection;
use tracing::debug;

use super::AnyTagOperations;
use crate::batch::{CommandBatch, delete_keys};
use crate::error::{CacheError, CacheResult};
use crate::reply;
use crate::scan::{Dedup, ScanCursor, TagMembers};
use crate::serialization::unserialize;

impl AnyTagOperations {
    fn members(&self, tags: &[String]) -> TagMembers {
        let cursors = tags
            .iter()
            .map(|tag| ScanCursor::hash(self.ctx.any_tag_key(tag), self.ctx.scan_count()));
        TagMembers::new(cursors, Dedup::Global)
    }

    /// Lazily stream every key reachable from any of the given tags.
    ///
    /// Keys are reported once even when several tags reference them.
    pub async fn get_tagged_keys(&self, tags: &[String]) -> CacheResult<BoxStream<'_, CacheResult<String>>> {
        let conn = self.ctx.connection().await?;
        Ok(self.members(tags).into_stream(conn))
    }

    /// Lazily stream `(key, value)` for every live key reachable from any of
    /// the given tags. Keys that no longer exist are skipped.
    pub async fn get_tag_items<T>(&self, tags: &[String]) -> CacheResult<BoxStream<'_, CacheResult<(String, T)>>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let conn = self.ctx.connection().await?;
        let state = (self.members(tags), conn);

        let items = stream::try_unfold(state, move |(mut members, mut conn)| async move {
            let Some(keys) = members.next_batch(&mut conn).await? else {
                return Ok::<_, CacheError>(None);
            };
            let page = self.load(&mut conn, keys).await?;
            Ok(Some((stream::iter(page.into_iter().map(Ok::<_, CacheError>)), (members, conn))))
        });

        Ok(items.try_flatten().boxed())
    }

    async fn load<T: DeserializeOwned>(
        &self,
        conn: &mut TagConnection<'_>,
        keys: Vec<String>,
    ) -> CacheResult<Vec<(String, T)>> {
        let mut batch = CommandBatch::for_connection(conn);
        for key in &keys {
            let mut get = redis::cmd("GET");
            get.arg(self.ctx.prefixed(key));
            batch.push(get);
        }

        let replies = batch.execute(conn).await?;
        let mut items = Vec::with_capacity(keys.len());
        for (key, raw) in keys.into_iter().zip(replies) {
            if let Some(bytes) = reply::bytes(raw) {
                items.push((key, unserialize(&bytes)?));
            }
        }
        Ok(items)
    }

    /// Delete every cache key referenced by the given tags, the tag hashes
    /// and their registry entries. Returns the number of cache keys deleted.
    pub async fn flush(&self, tags: &[String]) -> CacheResult<u64> {
        if tags.is_empty() {
            return Ok(0);
        }

        let mut conn = self.ctx.connection().await?;
        let mut members = self.members(tags);
        let mut deleted = 0i64;

        while let Some(batch) = members.next_batch(&mut conn).await? {
            let keys: Vec<String> = batch.iter().map(|key| self.ctx.prefixed(key)).collect();
            for chunk in keys.chunks(self.ctx.chunk_size()) {
                deleted += delete_keys(&mut conn, chunk).await?;
            }
        }

        let hashes: Vec<String> = tags.iter().map(|tag| self.ctx.any_tag_key(tag)).collect();
        delete_keys(&mut conn, &hashes).await?;

        let mut zrem = redis::cmd("ZREM");
        zrem.arg(self.ctx.registry_key()).arg(tags);
        let _: redis::Value = zrem.query_async(&mut conn).await?;

        debug!(tags = tags.len(), deleted, "Flushed any-mode tags");
        Ok(deleted.max(0) as u64)
    }
}
