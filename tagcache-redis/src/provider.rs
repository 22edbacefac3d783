//! Connection checkout.
//!
//! Every tagged cache operation acquires exactly one [`TagConnection`] and
//! issues all of its commands on it. The guard is returned by
//! [`ConnectionProvider::checkout`] and gives the connection back (to the pool,
//! or simply drops a multiplexed clone) when it goes out of scope.

use async_trait::async_trait;
use redis::aio::ConnectionLike;
use redis::{Cmd, Pipeline, RedisFuture, Value};

use crate::Result;

/// A checked-out connection.
///
/// Wraps any async Redis connection and records whether it talks to a
/// sharded cluster. It implements [`ConnectionLike`] itself, so commands and
/// pipelines run on it directly.
pub struct TagConnection<'a> {
    inner: Box<dyn ConnectionLike + Send + 'a>,
    cluster: bool,
}

impl<'a> TagConnection<'a> {
    /// Wrap a connection.
    pub fn new<C>(connection: C, cluster: bool) -> Self
    where
        C: ConnectionLike + Send + 'a,
    {
        Self {
            inner: Box::new(connection),
            cluster,
        }
    }

    /// Whether commands on this connection may hash to different shards.
    pub fn is_cluster(&self) -> bool {
        self.cluster
    }
}

impl std::fmt::Debug for TagConnection<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagConnection")
            .field("cluster", &self.cluster)
            .finish_non_exhaustive()
    }
}

impl ConnectionLike for TagConnection<'_> {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        self.inner.req_packed_command(cmd)
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        cmd: &'a Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        self.inner.req_packed_commands(cmd, offset, count)
    }

    fn get_db(&self) -> i64 {
        self.inner.get_db()
    }
}

/// Source of connections for the cache engine.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Check out one connection for the duration of an operation.
    ///
    /// Blocks until the pool can hand one out; pool exhaustion surfaces as
    /// [`RedisError::Pool`](crate::RedisError::Pool).
    async fn checkout(&self) -> Result<TagConnection<'_>>;

    /// Whether this provider talks to a Redis Cluster.
    fn is_cluster(&self) -> bool;

    /// Connections covering every shard of the keyspace, for `SCAN`.
    ///
    /// A standalone server has a single keyspace, so the default is one
    /// regular checkout.
    async fn scan_connections(&self) -> Result<Vec<TagConnection<'_>>> {
        Ok(vec![self.checkout().await?])
    }
}
