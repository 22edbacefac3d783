//! Garbage collection of tag structures.
//!
//! Tag bookkeeping drifts: entries expire on their own, keys are deleted
//! without their tags, and non-atomic batches can fail half way. Pruning walks
//! every tag structure of the active mode and repairs that drift. It is
//! idempotent and meant to run periodically, out of band.
//!
//! Pruning follows a **best-effort cleanup** policy: a tag whose cleanup fails
//! is logged and counted in `failed_tags`, and the sweep moves on to the next
//! one.

mod all;
mod any;
mod scheduler;

pub use scheduler::PruneScheduler;

use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::config::TagMode;
use crate::context::StoreContext;
use crate::error::CacheResult;
use crate::scan::ScanCursor;

/// Counters of an All-mode prune.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AllPruneStats {
    /// Tag sets visited
    pub tags_scanned: u64,
    /// Members removed because their expiry passed
    pub stale_entries_removed: u64,
    /// Members checked against the keyspace
    pub entries_checked: u64,
    /// Members removed because their cache key was gone
    pub orphans_removed: u64,
    /// Tag sets deleted after becoming empty
    pub empty_sets_deleted: u64,
    /// Tag sets whose cleanup failed
    pub failed_tags: u64,
}

/// Counters of an Any-mode prune.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnyPruneStats {
    /// Tag hashes visited
    pub hashes_scanned: u64,
    /// Hash fields inspected
    pub fields_checked: u64,
    /// Fields removed because their expiry passed
    pub stale_fields_removed: u64,
    /// Fields removed because their cache key was gone
    pub orphans_removed: u64,
    /// Hashes deleted after becoming empty
    pub empty_hashes_deleted: u64,
    /// Registry entries whose watermark passed
    pub expired_tags_removed: u64,
    /// Registry entries whose hash no longer exists
    pub registry_entries_removed: u64,
    /// Hashes (or the registry) whose cleanup failed
    pub failed_tags: u64,
}

/// Result of a prune run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum PruneReport {
    All(AllPruneStats),
    Any(AnyPruneStats),
}

impl PruneReport {
    /// Mode the prune ran in.
    pub fn mode(&self) -> TagMode {
        match self {
            PruneReport::All(_) => TagMode::All,
            PruneReport::Any(_) => TagMode::Any,
        }
    }

    /// Stale and orphaned references removed, whatever the mode.
    pub fn removed(&self) -> u64 {
        match self {
            PruneReport::All(stats) => stats.stale_entries_removed + stats.orphans_removed,
            PruneReport::Any(stats) => stats.stale_fields_removed + stats.orphans_removed,
        }
    }

    pub fn failed_tags(&self) -> u64 {
        match self {
            PruneReport::All(stats) => stats.failed_tags,
            PruneReport::Any(stats) => stats.failed_tags,
        }
    }
}

/// Record the outcome of one cleanup step, logging and counting failures
/// instead of returning them.
pub(crate) fn best_effort(key: &str, result: CacheResult<()>, failed: &mut u64) {
    if let Err(err) = result {
        warn!(key, error = %err, "Tag cleanup failed, continuing");
        *failed += 1;
    }
}

/// Every tag structure key of the context's mode, across all shards.
pub(crate) async fn discover_tag_keys(ctx: &StoreContext) -> CacheResult<Vec<String>> {
    let pattern = ctx.tag_scan_pattern();
    let mut keys = BTreeSet::new();

    for mut conn in ctx.scan_connections().await? {
        let mut cursor = ScanCursor::keys(pattern.as_str(), ctx.scan_count());
        while let Some(page) = cursor.next_keys(&mut conn).await? {
            keys.extend(page);
        }
    }

    debug!(pattern = %pattern, tags = keys.len(), "Discovered tag structures");
    Ok(keys.into_iter().collect())
}

/// Throttle between tags.
pub(crate) async fn pause(ctx: &StoreContext) {
    let pause = ctx.prune_pause();
    if !pause.is_zero() {
        tokio::time::sleep(pause).await;
    }
}
