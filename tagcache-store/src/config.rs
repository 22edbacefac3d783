//! Cache configuration types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tagcache_redis::RedisConfig;

use crate::error::{CacheError, CacheResult};

/// Tagging strategy.
///
/// The two modes keep structurally different bookkeeping under the same
/// prefix and neither understands the other's keys, so switching modes
/// against existing data requires a clean keyspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagMode {
    /// Intersection tagging: one sorted set per tag, items namespaced by the
    /// full tag combination.
    #[default]
    All,
    /// Union tagging: one hash per tag plus a registry of live tags.
    Any,
}

impl TagMode {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TagMode::All => "all",
            TagMode::Any => "any",
        }
    }
}

impl fmt::Display for TagMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TagMode {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(TagMode::All),
            "any" => Ok(TagMode::Any),
            other => Err(CacheError::InvalidTagMode(other.to_string())),
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Connection settings
    #[serde(default)]
    pub redis: RedisConfig,

    /// Key prefix for every key the store writes
    #[serde(default)]
    pub prefix: String,

    /// Tagging strategy
    #[serde(default)]
    pub tag_mode: TagMode,

    /// COUNT hint for SCAN, ZSCAN and HSCAN
    #[serde(default = "default_scan_count")]
    pub scan_count: usize,

    /// Pause between tags while pruning
    #[serde(with = "millis", default = "default_prune_pause")]
    pub prune_pause: Duration,

    /// Keys deleted per round trip when flushing
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_scan_count() -> usize {
    1000
}

fn default_prune_pause() -> Duration {
    Duration::from_millis(5)
}

fn default_chunk_size() -> usize {
    1000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            prefix: String::new(),
            tag_mode: TagMode::default(),
            scan_count: default_scan_count(),
            prune_pause: default_prune_pause(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl CacheConfig {
    /// Create a configuration for a standalone Redis URL.
    ///
    /// # Examples
    ///
    /// ```
    /// use tagcache_store::{CacheConfig, TagMode};
    ///
    /// let config = CacheConfig::redis("redis://localhost:6379")
    ///     .with_prefix("app")
    ///     .with_tag_mode(TagMode::Any);
    ///
    /// assert_eq!(config.normalized_prefix(), "app:");
    /// ```
    pub fn redis(url: impl Into<String>) -> Self {
        Self {
            redis: RedisConfig::new(url),
            ..Default::default()
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Connection settings come from [`RedisConfig::from_env`]. Cache
    /// settings read `CACHE_PREFIX`, `CACHE_TAG_MODE`, `CACHE_SCAN_COUNT`,
    /// `CACHE_PRUNE_PAUSE_MS` and `CACHE_CHUNK_SIZE`.
    pub fn from_env() -> CacheResult<Self> {
        let mut config = Self {
            redis: RedisConfig::from_env().build(),
            ..Default::default()
        };

        if let Ok(prefix) = std::env::var("CACHE_PREFIX") {
            config.prefix = prefix;
        }

        if let Ok(mode) = std::env::var("CACHE_TAG_MODE") {
            config.tag_mode = mode.parse()?;
        }

        if let Ok(count) = std::env::var("CACHE_SCAN_COUNT") {
            config.scan_count = parse_env("CACHE_SCAN_COUNT", &count)?;
        }

        if let Ok(pause) = std::env::var("CACHE_PRUNE_PAUSE_MS") {
            config.prune_pause = Duration::from_millis(parse_env("CACHE_PRUNE_PAUSE_MS", &pause)?);
        }

        if let Ok(size) = std::env::var("CACHE_CHUNK_SIZE") {
            config.chunk_size = parse_env("CACHE_CHUNK_SIZE", &size)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the connection settings.
    pub fn with_redis(mut self, redis: RedisConfig) -> Self {
        self.redis = redis;
        self
    }

    /// Set the key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the tag mode.
    pub fn with_tag_mode(mut self, mode: TagMode) -> Self {
        self.tag_mode = mode;
        self
    }

    /// Set the scan COUNT hint.
    pub fn with_scan_count(mut self, count: usize) -> Self {
        self.scan_count = count;
        self
    }

    /// Set the pause between tags while pruning.
    pub fn with_prune_pause(mut self, pause: Duration) -> Self {
        self.prune_pause = pause;
        self
    }

    /// Set the number of keys deleted per flush round trip.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// The prefix as it is applied to keys: ends in `:` unless empty.
    pub fn normalized_prefix(&self) -> String {
        if self.prefix.is_empty() || self.prefix.ends_with(':') {
            self.prefix.clone()
        } else {
            format!("{}:", self.prefix)
        }
    }

    /// Reject settings that would stall scans or flushes.
    pub fn validate(&self) -> CacheResult<()> {
        if self.scan_count == 0 {
            return Err(CacheError::Config("scan_count must be positive".into()));
        }
        if self.chunk_size == 0 {
            return Err(CacheError::Config("chunk_size must be positive".into()));
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(name: &str, raw: &str) -> CacheResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| CacheError::Config(format!("{} has an invalid value '{}'", name, raw)))
}

mod millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
