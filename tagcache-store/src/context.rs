//! Shared store context: connection checkout, key naming and cluster
//! awareness.

use std::sync::Arc;
use std::time::Duration;
use tagcache_redis::{ConnectionProvider, TagConnection};

use crate::config::{CacheConfig, TagMode};
use crate::error::CacheResult;

const ALL_TAG_SEGMENT: &str = "tag:";
const ANY_TAG_SEGMENT: &str = "_any:tag:";
const ENTRIES_SUFFIX: &str = ":entries";
const REGISTRY_SUFFIX: &str = "registry";

/// Everything an operation needs besides its arguments.
///
/// Cheap to clone. The tag mode lives here rather than in any global so each
/// operation sees exactly the mode of the context it was handed.
#[derive(Clone)]
pub struct StoreContext {
    provider: Arc<dyn ConnectionProvider>,
    prefix: String,
    mode: TagMode,
    scan_count: usize,
    prune_pause: Duration,
    chunk_size: usize,
}

impl StoreContext {
    /// Build a context from a provider and configuration.
    pub fn new(provider: Arc<dyn ConnectionProvider>, config: &CacheConfig) -> Self {
        Self {
            provider,
            prefix: config.normalized_prefix(),
            mode: config.tag_mode,
            scan_count: config.scan_count.max(1),
            prune_pause: config.prune_pause,
            chunk_size: config.chunk_size.max(1),
        }
    }

    /// Check out the single connection an operation runs on.
    pub async fn connection(&self) -> CacheResult<TagConnection<'_>> {
        Ok(self.provider.checkout().await?)
    }

    /// One connection per keyspace shard, for `SCAN`.
    pub async fn scan_connections(&self) -> CacheResult<Vec<TagConnection<'_>>> {
        Ok(self.provider.scan_connections().await?)
    }

    /// Whether the backend is a Redis Cluster.
    pub fn is_cluster(&self) -> bool {
        self.provider.is_cluster()
    }

    /// Normalised key prefix (empty, or ending in `:`).
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Active tag mode.
    pub fn mode(&self) -> TagMode {
        self.mode
    }

    /// A copy of this context running in `mode`.
    pub fn with_mode(&self, mode: TagMode) -> Self {
        Self {
            mode,
            ..self.clone()
        }
    }

    pub fn scan_count(&self) -> usize {
        self.scan_count
    }

    pub fn prune_pause(&self) -> Duration {
        self.prune_pause
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// `key` with the store prefix applied.
    pub fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// All-mode tag set for a tag id (`tag:<name>`).
    pub fn all_tag_key(&self, tag_id: &str) -> String {
        format!("{}{}{}", self.prefix, tag_id, ENTRIES_SUFFIX)
    }

    /// Any-mode tag hash for a tag name.
    pub fn any_tag_key(&self, name: &str) -> String {
        format!("{}{}{}{}", self.prefix, ANY_TAG_SEGMENT, name, ENTRIES_SUFFIX)
    }

    /// Recover the tag name from an Any-mode hash key.
    pub fn any_tag_name<'k>(&self, hash_key: &'k str) -> Option<&'k str> {
        hash_key
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix(ANY_TAG_SEGMENT)?
            .strip_suffix(ENTRIES_SUFFIX)
    }

    /// Any-mode tag registry.
    pub fn registry_key(&self) -> String {
        format!("{}{}{}", self.prefix, ANY_TAG_SEGMENT, REGISTRY_SUFFIX)
    }

    /// SCAN pattern matching every tag structure of the active mode.
    pub fn tag_scan_pattern(&self) -> String {
        let segment = match self.mode {
            TagMode::All => ALL_TAG_SEGMENT,
            TagMode::Any => ANY_TAG_SEGMENT,
        };
        format!("{}{}*{}", self.prefix, segment, ENTRIES_SUFFIX)
    }
}

/// Tag id used by All-mode for a tag name.
pub fn tag_id(name: &str) -> String {
    format!("{}{}", ALL_TAG_SEGMENT, name)
}

impl std::fmt::Debug for StoreContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreContext")
            .field("prefix", &self.prefix)
            .field("mode", &self.mode)
            .field("cluster", &self.is_cluster())
            .field("scan_count", &self.scan_count)
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagcache_redis::{MemoryRedis, glob_match};

    fn context(prefix: &str, mode: TagMode) -> StoreContext {
        let config = CacheConfig::default()
            .with_prefix(prefix)
            .with_tag_mode(mode);
        StoreContext::new(Arc::new(MemoryRedis::new()), &config)
    }

    #[test]
    fn test_key_naming() {
        let ctx = context("app", TagMode::All);
        assert_eq!(ctx.prefixed("foo"), "app:foo");
        assert_eq!(ctx.all_tag_key(&tag_id("users")), "app:tag:users:entries");
        assert_eq!(ctx.any_tag_key("users"), "app:_any:tag:users:entries");
        assert_eq!(ctx.registry_key(), "app:_any:tag:registry");
        assert_eq!(ctx.tag_scan_pattern(), "app:tag:*:entries");
        assert_eq!(
            ctx.with_mode(TagMode::Any).tag_scan_pattern(),
            "app:_any:tag:*:entries"
        );
    }

    #[test]
    fn test_scan_patterns_do_not_overlap() {
        let all = context("app", TagMode::All);
        let any = all.with_mode(TagMode::Any);

        let all_key = all.all_tag_key(&tag_id("users"));
        let any_key = any.any_tag_key("users");

        assert!(glob_match(&all.tag_scan_pattern(), &all_key));
        assert!(!glob_match(&all.tag_scan_pattern(), &any_key));
        assert!(glob_match(&any.tag_scan_pattern(), &any_key));
        assert!(!glob_match(&any.tag_scan_pattern(), &all_key));
        assert!(!glob_match(&any.tag_scan_pattern(), &any.registry_key()));
    }

    #[test]
    fn test_any_tag_name_round_trip() {
        let ctx = context("", TagMode::Any);
        let key = ctx.any_tag_key("posts:recent");
        assert_eq!(ctx.any_tag_name(&key), Some("posts:recent"));
        assert_eq!(ctx.any_tag_name("other"), None);
    }

    #[test]
    fn test_with_mode_keeps_settings() {
        let ctx = context("p", TagMode::All);
        let any = ctx.with_mode(TagMode::Any);
        assert_eq!(any.mode(), TagMode::Any);
        assert_eq!(any.prefix(), "p:");
        assert_eq!(ctx.mode(), TagMode::All);
        assert!(!any.is_cluster());
    }
}
