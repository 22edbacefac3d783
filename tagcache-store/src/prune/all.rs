use std::collections::HashSet;
use tagcache_redis::TagConnection;
use tracing::info;

use super::{AllPruneStats, best_effort, discover_tag_keys, pause};
use crate::all_tag::AllTagOperations;
use crate::batch::existing_keys;
use crate::context::StoreContext;
use crate::error::CacheResult;
use crate::scan::ScanCursor;
use crate::write;

impl AllTagOperations {
    /// Sweep every All-mode tag set.
    ///
    /// Per tag set: drop members scored in `[0, now]`, drop members whose
    /// cache key no longer exists, and delete the set once it is empty.
    pub async fn prune(&self) -> CacheResult<AllPruneStats> {
        let ctx = self.context();
        let tag_keys = discover_tag_keys(ctx).await?;
        let now = write::now();
        let mut stats = AllPruneStats::default();
        let mut conn = ctx.connection().await?;

        for (i, tag_key) in tag_keys.iter().enumerate() {
            if i > 0 {
                pause(ctx).await;
            }
            stats.tags_scanned += 1;
            let result = prune_tag_set(ctx, &mut conn, tag_key, now, &mut stats).await;
            best_effort(tag_key, result, &mut stats.failed_tags);
        }

        info!(
            tags = stats.tags_scanned,
            stale = stats.stale_entries_removed,
            orphans = stats.orphans_removed,
            deleted_sets = stats.empty_sets_deleted,
            failed = stats.failed_tags,
            "All-mode prune finished"
        );
        Ok(stats)
    }
}

async fn prune_tag_set(
    ctx: &StoreContext,
    conn: &mut TagConnection<'_>,
    tag_key: &str,
    now: i64,
    stats: &mut AllPruneStats,
) -> CacheResult<()> {
    let stale: i64 = redis::cmd("ZREMRANGEBYSCORE")
        .arg(tag_key)
        .arg(0)
        .arg(now)
        .query_async(&mut *conn)
        .await?;
    stats.stale_entries_removed += stale.max(0) as u64;

    let mut seen = HashSet::new();
    let mut cursor = ScanCursor::sorted_set(tag_key, ctx.scan_count());
    while let Some(page) = cursor.next_pairs(conn).await? {
        let members: Vec<String> = page
            .into_iter()
            .map(|(member, _)| member)
            .filter(|member| seen.insert(member.clone()))
            .collect();
        if members.is_empty() {
            continue;
        }
        stats.entries_checked += members.len() as u64;

        let cache_keys: Vec<String> = members.iter().map(|m| ctx.prefixed(m)).collect();
        let exists = existing_keys(conn, &cache_keys).await?;
        let orphans: Vec<&String> = members
            .iter()
            .zip(exists)
            .filter(|(_, exists)| !exists)
            .map(|(member, _)| member)
            .collect();

        if !orphans.is_empty() {
            let removed: i64 = redis::cmd("ZREM")
                .arg(tag_key)
                .arg(&orphans)
                .query_async(&mut *conn)
                .await?;
            stats.orphans_removed += removed.max(0) as u64;
        }
    }

    let remaining: i64 = redis::cmd("ZCARD").arg(tag_key).query_async(&mut *conn).await?;
    if remaining == 0 {
        let _: i64 = redis::cmd("DEL").arg(tag_key).query_async(&mut *conn).await?;
        stats.empty_sets_deleted += 1;
    }

    Ok(())
}
