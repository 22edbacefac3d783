//! Batch executor.
//!
//! Operations queue their commands into a [`CommandBatch`] and let it decide
//! how they travel. On a standalone server the batch is one pipeline and one
//! round trip. On a cluster the keys of a batch may live on different shards,
//! so the commands go out one by one, in order, on the same connection.
//!
//! Neither form is atomic. A failing command leaves the others applied, and
//! both forms carry on past it to the end of the batch.

use redis::{Cmd, RedisResult, Value};
use tagcache_redis::TagConnection;
use tracing::trace;

use crate::error::CacheResult;
use crate::reply;

/// How a batch is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// All commands in one pipeline.
    Pipelined,
    /// One command per round trip.
    Sequential,
}

impl Dispatch {
    /// The dispatch a connection supports.
    pub fn for_connection(conn: &TagConnection<'_>) -> Self {
        if conn.is_cluster() {
            Dispatch::Sequential
        } else {
            Dispatch::Pipelined
        }
    }
}

/// An ordered list of commands bound for one connection.
#[derive(Debug, Clone)]
pub struct CommandBatch {
    dispatch: Dispatch,
    commands: Vec<Cmd>,
}

impl CommandBatch {
    /// An empty batch shaped for `conn`.
    pub fn for_connection(conn: &TagConnection<'_>) -> Self {
        Self::new(Dispatch::for_connection(conn))
    }

    /// An empty batch with an explicit dispatch.
    pub fn new(dispatch: Dispatch) -> Self {
        Self {
            dispatch,
            commands: Vec::new(),
        }
    }

    pub fn dispatch(&self) -> Dispatch {
        self.dispatch
    }

    /// Queue a command.
    pub fn push(&mut self, cmd: Cmd) -> &mut Self {
        self.commands.push(cmd);
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Send every queued command and return one reply per command.
    ///
    /// Fails with the first error reply.
    pub async fn execute(self, conn: &mut TagConnection<'_>) -> CacheResult<Vec<Value>> {
        let outcomes = self.execute_each(conn).await?;
        Ok(outcomes.into_iter().collect::<RedisResult<Vec<_>>>()?)
    }

    /// Send every queued command and return one outcome per command.
    ///
    /// A failing command does not stop the ones after it, in either dispatch.
    /// The outer error is reserved for a pipeline that never got a reply.
    pub async fn execute_each(self, conn: &mut TagConnection<'_>) -> CacheResult<Vec<RedisResult<Value>>> {
        if self.commands.is_empty() {
            return Ok(Vec::new());
        }

        trace!(
            commands = self.commands.len(),
            dispatch = ?self.dispatch,
            "Executing command batch"
        );

        match self.dispatch {
            Dispatch::Pipelined => {
                let mut pipe = redis::pipe();
                pipe.ignore_errors();
                for cmd in self.commands {
                    pipe.add_command(cmd);
                }
                let replies = pipe.query_async::<Vec<Value>>(conn).await?;
                Ok(replies.into_iter().map(Value::extract_error).collect())
            }
            Dispatch::Sequential => {
                let mut outcomes = Vec::with_capacity(self.commands.len());
                for cmd in &self.commands {
                    outcomes.push(cmd.query_async::<Value>(conn).await);
                }
                Ok(outcomes)
            }
        }
    }
}

/// Delete `keys` on `conn`.
///
/// One multi-key `DEL` on a standalone server. Cluster connections get one
/// `DEL` per key, since a multi-key `DEL` fails when keys span slots.
pub async fn delete_keys(conn: &mut TagConnection<'_>, keys: &[String]) -> CacheResult<i64> {
    if keys.is_empty() {
        return Ok(0);
    }

    let mut batch = CommandBatch::for_connection(conn);
    match batch.dispatch() {
        Dispatch::Pipelined => {
            let mut del = redis::cmd("DEL");
            del.arg(keys);
            batch.push(del);
        }
        Dispatch::Sequential => {
            for key in keys {
                let mut del = redis::cmd("DEL");
                del.arg(key);
                batch.push(del);
            }
        }
    }

    let replies = batch.execute(conn).await?;
    Ok(replies.iter().filter_map(reply::int).sum())
}

/// Which of `keys` currently exist, in order.
pub async fn existing_keys(conn: &mut TagConnection<'_>, keys: &[String]) -> CacheResult<Vec<bool>> {
    let mut batch = CommandBatch::for_connection(conn);
    for key in keys {
        let mut exists = redis::cmd("EXISTS");
        exists.arg(key);
        batch.push(exists);
    }

    let replies = batch.execute(conn).await?;
    Ok(replies
        .iter()
        .map(|r| reply::int(r).unwrap_or(0) > 0)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagcache_redis::{ConnectionProvider, MemoryRedis};

    fn set(key: &str, value: &str) -> Cmd {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        cmd
    }

    #[tokio::test]
    async fn test_pipelined_batch_is_one_round_trip() {
        let redis_mem = MemoryRedis::new();
        let mut conn = redis_mem.checkout().await.unwrap();

        let mut batch = CommandBatch::for_connection(&conn);
        batch.push(set("a", "1")).push(set("b", "2"));
        let replies = batch.execute(&mut conn).await.unwrap();

        assert_eq!(replies, vec![Value::Okay, Value::Okay]);
        assert_eq!(redis_mem.round_trips(), 1);
        assert_eq!(redis_mem.pipelines(), 1);
    }

    #[tokio::test]
    async fn test_cluster_batch_is_sequential() {
        let redis_mem = MemoryRedis::cluster();
        let mut conn = redis_mem.checkout().await.unwrap();

        let mut batch = CommandBatch::for_connection(&conn);
        assert_eq!(batch.dispatch(), Dispatch::Sequential);
        batch.push(set("a", "1")).push(set("b", "2"));
        let replies = batch.execute(&mut conn).await.unwrap();

        assert_eq!(replies.len(), 2);
        assert_eq!(redis_mem.round_trips(), 2);
        assert_eq!(redis_mem.pipelines(), 0);
        assert_eq!(redis_mem.commands(), vec!["SET a 1", "SET b 2"]);
    }

    #[tokio::test]
    async fn test_failing_command_does_not_stop_the_batch() {
        for redis_mem in [MemoryRedis::new(), MemoryRedis::cluster()] {
            let mut conn = redis_mem.checkout().await.unwrap();
            let mut seed = CommandBatch::for_connection(&conn);
            seed.push(set("s", "x"));
            seed.execute(&mut conn).await.unwrap();

            let mut zadd = redis::cmd("ZADD");
            zadd.arg("s").arg(1).arg("m");
            let mut batch = CommandBatch::for_connection(&conn);
            batch.push(zadd).push(set("a", "1"));
            let outcomes = batch.clone().execute_each(&mut conn).await.unwrap();

            assert_eq!(outcomes.len(), 2);
            assert_eq!(outcomes[0].as_ref().unwrap_err().code(), Some("WRONGTYPE"));
            assert_eq!(outcomes[1].as_ref().unwrap(), &Value::Okay);
            assert!(batch.execute(&mut conn).await.is_err());
        }
    }

    #[tokio::test]
    async fn test_empty_batch_sends_nothing() {
        let redis_mem = MemoryRedis::new();
        let mut conn = redis_mem.checkout().await.unwrap();

        let replies = CommandBatch::for_connection(&conn)
            .execute(&mut conn)
            .await
            .unwrap();

        assert!(replies.is_empty());
        assert_eq!(redis_mem.round_trips(), 0);
    }

    #[tokio::test]
    async fn test_delete_keys_shapes() {
        for redis_mem in [MemoryRedis::new(), MemoryRedis::cluster()] {
            let mut conn = redis_mem.checkout().await.unwrap();
            let mut batch = CommandBatch::for_connection(&conn);
            batch.push(set("a", "1")).push(set("b", "2"));
            batch.execute(&mut conn).await.unwrap();
            redis_mem.reset_stats();

            let keys = vec!["a".to_string(), "b".to_string(), "missing".to_string()];
            assert_eq!(delete_keys(&mut conn, &keys).await.unwrap(), 2);

            let dels = redis_mem.commands_named("DEL");
            if redis_mem.is_cluster() {
                assert_eq!(dels, vec!["DEL a", "DEL b", "DEL missing"]);
            } else {
                assert_eq!(dels, vec!["DEL a b missing"]);
            }
        }
    }

    #[tokio::test]
    async fn test_existing_keys() {
        let redis_mem = MemoryRedis::new();
        let mut conn = redis_mem.checkout().await.unwrap();
        let mut batch = CommandBatch::for_connection(&conn);
        batch.push(set("a", "1"));
        batch.execute(&mut conn).await.unwrap();

        let found = existing_keys(&mut conn, &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(found, vec![true, false]);
    }
}
