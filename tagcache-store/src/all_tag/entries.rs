use futures::stream::BoxStream;
use tracing::debug;

use super::AllTagOperations;
use crate::batch::{CommandBatch, delete_keys};
use crate::error::CacheResult;
use crate::reply;
use crate::scan::{Dedup, ScanCursor, TagMembers};
use crate::write;

impl AllTagOperations {
    fn members(&self, tag_ids: &[String]) -> TagMembers {
        let cursors = tag_ids
            .iter()
            .map(|tag_id| ScanCursor::sorted_set(self.ctx.all_tag_key(tag_id), self.ctx.scan_count()));
        TagMembers::new(cursors, Dedup::PerTag)
    }

    /// Lazily stream the member keys of the given tags.
    ///
    /// Tags are walked in order with `ZSCAN`; a key tagged with several of
    /// them is reported once per tag. The stream holds its own connection
    /// until dropped.
    pub async fn get_entries(&self, tag_ids: &[String]) -> CacheResult<BoxStream<'_, CacheResult<String>>> {
        let conn = self.ctx.connection().await?;
        Ok(self.members(tag_ids).into_stream(conn))
    }

    /// Remove time-expired members (score in `[0, now]`) from the given tags.
    ///
    /// Forever members (score -1) are below the range and survive.
    pub async fn flush_stale(&self, tag_ids: &[String]) -> CacheResult<u64> {
        if tag_ids.is_empty() {
            return Ok(0);
        }

        let now = write::now();
        let mut conn = self.ctx.connection().await?;
        let mut batch = CommandBatch::for_connection(&conn);
        for tag_id in tag_ids {
            let mut zrem = redis::cmd("ZREMRANGEBYSCORE");
            zrem.arg(self.ctx.all_tag_key(tag_id)).arg(0).arg(now);
            batch.push(zrem);
        }

        let removed: i64 = batch
            .execute(&mut conn)
            .await?
            .iter()
            .filter_map(reply::int)
            .sum();

        debug!(tags = tag_ids.len(), removed, "Flushed stale tag entries");
        Ok(removed.max(0) as u64)
    }

    /// Delete every cache key referenced by the given tags, then the tag sets.
    ///
    /// Not atomic: a key tagged concurrently with the flush may survive it.
    /// Returns the number of cache keys deleted.
    pub async fn flush(&self, tag_ids: &[String]) -> CacheResult<u64> {
        let mut conn = self.ctx.connection().await?;
        let mut members = self.members(tag_ids);
        let mut deleted = 0i64;

        while let Some(batch) = members.next_batch(&mut conn).await? {
            let keys: Vec<String> = batch.iter().map(|key| self.ctx.prefixed(key)).collect();
            for chunk in keys.chunks(self.ctx.chunk_size()) {
                deleted += delete_keys(&mut conn, chunk).await?;
            }
        }

        let tag_keys: Vec<String> = tag_ids
            .iter()
            .map(|tag_id| self.ctx.all_tag_key(tag_id))
            .collect();
        delete_keys(&mut conn, &tag_keys).await?;

        debug!(tags = tag_ids.len(), deleted, "Flushed all-mode tags");
        Ok(deleted.max(0) as u64)
    }
}
