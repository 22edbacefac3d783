//! Connection providers backed by real Redis deployments.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    pool::{RedisConnection, RedisPool, RedisPoolBuilder},
    provider::{ConnectionProvider, TagConnection},
    topology::{ClusterNode, parse_primaries},
    RedisConfig, RedisError, Result,
};

/// Standalone Redis behind a bb8 pool.
pub struct RedisService {
    config: RedisConfig,
    pool: RedisPool,
}

impl RedisService {
    /// Create a new Redis service.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let pool = RedisPoolBuilder::new(config.clone()).build().await?;
        Ok(Self { config, pool })
    }

    /// Create from an existing pool.
    pub fn from_pool(config: RedisConfig, pool: RedisPool) -> Self {
        Self { config, pool }
    }

    /// Get the configuration.
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Get a connection from the pool.
    pub async fn get(&self) -> Result<RedisConnection<'_>> {
        let conn = self.pool.get().await?;
        Ok(RedisConnection::new(conn))
    }

    /// Get pool statistics.
    pub fn pool_stats(&self) -> PoolStats {
        let state = self.pool.state();
        PoolStats {
            connections: state.connections,
            idle_connections: state.idle_connections,
        }
    }
}

#[async_trait]
impl ConnectionProvider for RedisService {
    async fn checkout(&self) -> Result<TagConnection<'_>> {
        let conn = self.get().await?;
        Ok(TagConnection::new(conn, false))
    }

    fn is_cluster(&self) -> bool {
        false
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    /// Total connections.
    pub connections: u32,
    /// Idle connections.
    pub idle_connections: u32,
}

/// Redis Cluster provider.
///
/// Commands go through one multiplexed cluster connection that routes by
/// slot. Keyspace scans need a connection per primary, since `SCAN` only
/// walks the node it is sent to; the primaries are looked up with
/// `CLUSTER NODES` on every scan and their connections cached by address.
pub struct ClusterService {
    config: RedisConfig,
    connection: ClusterConnection,
    seed_url: String,
    nodes: Mutex<HashMap<String, MultiplexedConnection>>,
}

impl ClusterService {
    /// Connect to the cluster described by `config`.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let urls = config.cluster_urls()?;
        let seed_url = urls
            .first()
            .cloned()
            .ok_or_else(|| RedisError::Config("no cluster seed nodes".into()))?;

        let client = ClusterClient::new(urls.clone())
            .map_err(|e| RedisError::Cluster(e.to_string()))?;
        let connection = client
            .get_async_connection()
            .await
            .map_err(|e| RedisError::Cluster(e.to_string()))?;

        info!(seeds = urls.len(), "Redis cluster connection established");

        Ok(Self {
            config,
            connection,
            seed_url,
            nodes: Mutex::new(HashMap::new()),
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// The cluster's current reachable primaries.
    pub async fn primaries(&self) -> Result<Vec<ClusterNode>> {
        let mut conn = self.connection.clone();
        let reply: String = redis::cmd("CLUSTER")
            .arg("NODES")
            .query_async(&mut conn)
            .await
            .map_err(|e| RedisError::Cluster(e.to_string()))?;

        let primaries = parse_primaries(&reply);
        if primaries.is_empty() {
            return Err(RedisError::Cluster("CLUSTER NODES listed no reachable primary".into()));
        }
        Ok(primaries)
    }

    async fn node_connection(&self, node: &ClusterNode) -> Result<MultiplexedConnection> {
        let address = node.address();
        let cached = self.nodes.lock().get(&address).cloned();
        if let Some(conn) = cached {
            return Ok(conn);
        }

        let url = node.url(&self.seed_url)?;
        let conn = redis::Client::open(url.as_str())
            .map_err(|e| RedisError::Connection(e.to_string()))?
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| RedisError::Connection(e.to_string()))?;
        debug!(node = %address, "Connected to cluster primary for keyspace scans");

        self.nodes.lock().insert(address, conn.clone());
        Ok(conn)
    }
}

#[async_trait]
impl ConnectionProvider for ClusterService {
    async fn checkout(&self) -> Result<TagConnection<'_>> {
        Ok(TagConnection::new(self.connection.clone(), true))
    }

    fn is_cluster(&self) -> bool {
        true
    }

    async fn scan_connections(&self) -> Result<Vec<TagConnection<'_>>> {
        let primaries = self.primaries().await?;

        // Drop connections to nodes that are no longer primaries.
        let live: HashSet<String> = primaries.iter().map(ClusterNode::address).collect();
        self.nodes.lock().retain(|address, _| live.contains(address));

        let mut conns = Vec::with_capacity(primaries.len());
        for node in &primaries {
            conns.push(TagConnection::new(self.node_connection(node).await?, true));
        }
        Ok(conns)
    }
}

/// Build the provider matching `config`: a cluster client when cluster mode
/// is enabled, a pooled standalone client otherwise.
pub async fn connect(config: RedisConfig) -> Result<Arc<dyn ConnectionProvider>> {
    if config.cluster {
        Ok(Arc::new(ClusterService::new(config).await?))
    } else {
        Ok(Arc::new(RedisService::new(config).await?))
    }
}
