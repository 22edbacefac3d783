//! Redis connection configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::{RedisError, Result};

/// Redis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL (redis://host:port or rediss://host:port for TLS).
    pub url: String,
    /// Connection pool size.
    pub pool_size: u32,
    /// Minimum idle connections.
    pub min_idle: Option<u32>,
    /// Connection timeout.
    #[serde(with = "seconds", default = "default_connection_timeout")]
    pub connection_timeout: Duration,
    /// Command timeout.
    #[serde(with = "seconds", default = "default_command_timeout")]
    pub command_timeout: Duration,
    /// Database number (0-15). Ignored in cluster mode.
    pub database: Option<u8>,
    /// Username for Redis 6+ ACL.
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
    /// Cluster mode.
    #[serde(default)]
    pub cluster: bool,
    /// Cluster seed nodes. The rest of the topology is discovered.
    #[serde(default)]
    pub cluster_nodes: Vec<String>,
    /// Use TLS.
    #[serde(default)]
    pub tls: bool,
    /// Connection name (for CLIENT SETNAME).
    pub connection_name: Option<String>,
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            min_idle: Some(1),
            connection_timeout: default_connection_timeout(),
            command_timeout: default_command_timeout(),
            database: None,
            username: None,
            password: None,
            cluster: false,
            cluster_nodes: Vec::new(),
            tls: false,
            connection_name: None,
        }
    }
}

impl RedisConfig {
    /// Create a new configuration.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Create a builder.
    pub fn builder() -> RedisConfigBuilder {
        RedisConfigBuilder::new()
    }

    /// Parse a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> RedisConfigBuilder {
        let mut builder = RedisConfigBuilder::new();

        if let Ok(url) = std::env::var("REDIS_URL") {
            builder = builder.url(url);
        }

        if let Ok(pool_size) = std::env::var("REDIS_POOL_SIZE")
            && let Ok(size) = pool_size.parse()
        {
            builder = builder.pool_size(size);
        }

        if let Ok(db) = std::env::var("REDIS_DATABASE")
            && let Ok(db_num) = db.parse()
        {
            builder = builder.database(db_num);
        }

        if let Ok(username) = std::env::var("REDIS_USERNAME") {
            builder = builder.username(username);
        }

        if let Ok(password) = std::env::var("REDIS_PASSWORD") {
            builder = builder.password(password);
        }

        if std::env::var("REDIS_TLS").is_ok() {
            builder = builder.tls(true);
        }

        if std::env::var("REDIS_CLUSTER").is_ok() {
            builder = builder.cluster(true);
        }

        if let Ok(nodes) = std::env::var("REDIS_CLUSTER_NODES") {
            let nodes: Vec<String> = nodes
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            builder = builder.cluster_nodes(nodes);
        }

        builder
    }

    /// Full standalone URL with credentials, TLS scheme and database applied.
    pub fn connection_url(&self) -> Result<String> {
        let mut url = self.authorized(&self.url)?;

        if let Some(db) = self.database
            && (url.path().is_empty() || url.path() == "/")
        {
            url.set_path(&format!("/{}", db));
        }

        Ok(url.to_string())
    }

    /// Seed node URLs for a cluster client.
    ///
    /// Falls back to the primary URL when no explicit node list is set.
    pub fn cluster_urls(&self) -> Result<Vec<String>> {
        let seeds: Vec<&str> = if self.cluster_nodes.is_empty() {
            vec![self.url.as_str()]
        } else {
            self.cluster_nodes.iter().map(String::as_str).collect()
        };

        seeds
            .into_iter()
            .map(|node| self.authorized(node).map(|url| url.to_string()))
            .collect()
    }

    fn authorized(&self, raw: &str) -> Result<Url> {
        let mut url = Url::parse(raw)
            .map_err(|e| RedisError::Config(format!("invalid Redis URL '{}': {}", raw, e)))?;

        if self.tls && url.scheme() == "redis" {
            url.set_scheme("rediss")
                .map_err(|_| RedisError::Config(format!("cannot enable TLS for '{}'", raw)))?;
        }

        if let Some(password) = &self.password {
            if let Some(username) = &self.username {
                url.set_username(username)
                    .map_err(|_| RedisError::Config(format!("cannot set username on '{}'", raw)))?;
            }
            url.set_password(Some(password))
                .map_err(|_| RedisError::Config(format!("cannot set password on '{}'", raw)))?;
        }

        Ok(url)
    }
}

/// Builder for Redis configuration.
#[derive(Default)]
pub struct RedisConfigBuilder {
    config: RedisConfig,
}

impl RedisConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: RedisConfig::default(),
        }
    }

    /// Set the Redis URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = url.into();
        self
    }

    /// Set the pool size.
    pub fn pool_size(mut self, size: u32) -> Self {
        self.config.pool_size = size;
        self
    }

    /// Set the minimum idle connections.
    pub fn min_idle(mut self, min_idle: u32) -> Self {
        self.config.min_idle = Some(min_idle);
        self
    }

    /// Set the connection timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// Set the command timeout.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    /// Set the database number.
    pub fn database(mut self, db: u8) -> Self {
        self.config.database = Some(db);
        self
    }

    /// Set the username (Redis 6+ ACL).
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.username = Some(username.into());
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    /// Enable cluster mode.
    pub fn cluster(mut self, enabled: bool) -> Self {
        self.config.cluster = enabled;
        self
    }

    /// Set cluster nodes. Implies cluster mode.
    pub fn cluster_nodes(mut self, nodes: Vec<String>) -> Self {
        self.config.cluster_nodes = nodes;
        self.config.cluster = true;
        self
    }

    /// Enable TLS.
    pub fn tls(mut self, enabled: bool) -> Self {
        self.config.tls = enabled;
        self
    }

    /// Set the connection name.
    pub fn connection_name(mut self, name: impl Into<String>) -> Self {
        self.config.connection_name = Some(name.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> RedisConfig {
        self.config
    }
}

mod seconds {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_url_is_untouched() {
        let config = RedisConfig::new("redis://localhost:6379");
        assert_eq!(config.connection_url().unwrap(), "redis://localhost:6379");
    }

    #[test]
    fn test_password_and_database() {
        let config = RedisConfig::builder()
            .url("redis://localhost:6379")
            .password("secret")
            .database(2)
            .build();

        assert_eq!(
            config.connection_url().unwrap(),
            "redis://:secret@localhost:6379/2"
        );
    }

    #[test]
    fn test_acl_credentials_and_tls() {
        let config = RedisConfig::builder()
            .url("redis://cache.internal:6380")
            .username("app")
            .password("pw")
            .tls(true)
            .build();

        assert_eq!(
            config.connection_url().unwrap(),
            "rediss://app:pw@cache.internal:6380"
        );
    }

    #[test]
    fn test_invalid_url_is_config_error() {
        let config = RedisConfig::new("not a url");
        assert!(matches!(config.connection_url(), Err(RedisError::Config(_))));
    }

    #[test]
    fn test_cluster_urls_fall_back_to_primary() {
        let config = RedisConfig::builder()
            .url("redis://10.0.0.1:7000")
            .cluster(true)
            .build();

        assert_eq!(config.cluster_urls().unwrap(), vec!["redis://10.0.0.1:7000"]);
    }

    #[test]
    fn test_cluster_nodes_imply_cluster() {
        let config = RedisConfig::builder()
            .cluster_nodes(vec![
                "redis://10.0.0.1:7000".to_string(),
                "redis://10.0.0.2:7000".to_string(),
            ])
            .build();

        assert!(config.cluster);
        assert_eq!(config.cluster_urls().unwrap().len(), 2);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config = RedisConfig::from_json(
            r#"{"url":"redis://localhost:6379","pool_size":4,"min_idle":null,
                "database":null,"username":null,"password":null,"connection_name":null}"#,
        )
        .unwrap();

        assert_eq!(config.pool_size, 4);
        assert!(!config.cluster);
        assert_eq!(config.connection_timeout, Duration::from_secs(5));
    }
}
