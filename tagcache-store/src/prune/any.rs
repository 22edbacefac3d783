use std::collections::HashSet;
use tagcache_redis::TagConnection;
use tracing::info;

use super::{AnyPruneStats, best_effort, discover_tag_keys, pause};
use crate::any_tag::AnyTagOperations;
use crate::batch::existing_keys;
use crate::context::StoreContext;
use crate::error::CacheResult;
use crate::reply;
use crate::scan::ScanCursor;
use crate::write;

impl AnyTagOperations {
    /// Sweep every Any-mode tag hash and reconcile the registry.
    ///
    /// 1. Registry entries whose watermark is below now are dropped.
    /// 2. Per hash: fields whose expiry passed or whose cache key is gone are
    ///    deleted; an emptied hash is deleted along with its registry entry.
    /// 3. Registry entries pointing at hashes that no longer exist are
    ///    dropped.
    pub async fn prune(&self) -> CacheResult<AnyPruneStats> {
        let ctx = self.context();
        let hashes = discover_tag_keys(ctx).await?;
        let now = write::now();
        let registry = ctx.registry_key();
        let mut stats = AnyPruneStats::default();
        let mut conn = ctx.connection().await?;

        let expired: i64 = redis::cmd("ZREMRANGEBYSCORE")
            .arg(&registry)
            .arg("-inf")
            .arg(format!("({}", now))
            .query_async(&mut conn)
            .await?;
        stats.expired_tags_removed = expired.max(0) as u64;

        for (i, hash_key) in hashes.iter().enumerate() {
            if i > 0 {
                pause(ctx).await;
            }
            stats.hashes_scanned += 1;
            let result = prune_hash(ctx, &mut conn, hash_key, now, &mut stats).await;
            best_effort(hash_key, result, &mut stats.failed_tags);
        }

        let result = reconcile_registry(ctx, &mut conn, &registry, &mut stats).await;
        best_effort(&registry, result, &mut stats.failed_tags);

        info!(
            hashes = stats.hashes_scanned,
            stale = stats.stale_fields_removed,
            orphans = stats.orphans_removed,
            deleted_hashes = stats.empty_hashes_deleted,
            expired_tags = stats.expired_tags_removed,
            registry_removed = stats.registry_entries_removed,
            failed = stats.failed_tags,
            "Any-mode prune finished"
        );
        Ok(stats)
    }
}

async fn prune_hash(
    ctx: &StoreContext,
    conn: &mut TagConnection<'_>,
    hash_key: &str,
    now: i64,
    stats: &mut AnyPruneStats,
) -> CacheResult<()> {
    let mut seen = HashSet::new();
    let mut cursor = ScanCursor::hash(hash_key, ctx.scan_count());

    while let Some(page) = cursor.next_pairs(conn).await? {
        let mut stale = Vec::new();
        let mut live = Vec::new();
        for (field, value) in page {
            if !seen.insert(field.clone()) {
                continue;
            }
            stats.fields_checked += 1;
            match reply::int(&value) {
                Some(expires_at) if (0..=now).contains(&expires_at) => stale.push(field),
                _ => live.push(field),
            }
        }

        let cache_keys: Vec<String> = live.iter().map(|key| ctx.prefixed(key)).collect();
        let exists = existing_keys(conn, &cache_keys).await?;
        let orphans: Vec<String> = live
            .into_iter()
            .zip(exists)
            .filter(|(_, exists)| !exists)
            .map(|(field, _)| field)
            .collect();

        if stale.is_empty() && orphans.is_empty() {
            continue;
        }

        let _: i64 = redis::cmd("HDEL")
            .arg(hash_key)
            .arg(&stale)
            .arg(&orphans)
            .query_async(&mut *conn)
            .await?;
        stats.stale_fields_removed += stale.len() as u64;
        stats.orphans_removed += orphans.len() as u64;
    }

    let remaining: i64 = redis::cmd("HLEN").arg(hash_key).query_async(&mut *conn).await?;
    if remaining == 0 {
        let _: i64 = redis::cmd("DEL").arg(hash_key).query_async(&mut *conn).await?;
        if let Some(name) = ctx.any_tag_name(hash_key) {
            let _: i64 = redis::cmd("ZREM")
                .arg(ctx.registry_key())
                .arg(name)
                .query_async(&mut *conn)
                .await?;
        }
        stats.empty_hashes_deleted += 1;
    }

    Ok(())
}

async fn reconcile_registry(
    ctx: &StoreContext,
    conn: &mut TagConnection<'_>,
    registry: &str,
    stats: &mut AnyPruneStats,
) -> CacheResult<()> {
    let mut cursor = ScanCursor::sorted_set(registry, ctx.scan_count());

    while let Some(page) = cursor.next_pairs(conn).await? {
        let names: Vec<String> = page.into_iter().map(|(name, _)| name).collect();
        if names.is_empty() {
            continue;
        }

        let hashes: Vec<String> = names.iter().map(|name| ctx.any_tag_key(name)).collect();
        let exists = existing_keys(conn, &hashes).await?;
        let missing: Vec<&String> = names
            .iter()
            .zip(exists)
            .filter(|(_, exists)| !exists)
            .map(|(name, _)| name)
            .collect();

        if !missing.is_empty() {
            let removed: i64 = redis::cmd("ZREM")
                .arg(registry)
                .arg(&missing)
                .query_async(&mut *conn)
                .await?;
            stats.registry_entries_removed += removed.max(0) as u64;
        }
    }

    Ok(())
}
