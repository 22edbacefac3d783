//! Data writes shared by both tag modes.
//!
//! A tagged write is one [`CommandBatch`]: the mode-specific bookkeeping
//! commands first, the data write last. The outcome is read from the data
//! write's reply only; bookkeeping failures are drift that prune repairs.

use chrono::Utc;
use redis::{Cmd, RedisResult, Value};
use serde::de::DeserializeOwned;
use tagcache_redis::TagConnection;
use tracing::warn;

use crate::batch::CommandBatch;
use crate::error::{CacheError, CacheResult};
use crate::reply;
use crate::serialization::{Payload, unserialize};

/// Tag-structure score of an entry that never expires.
pub const FOREVER_SCORE: i64 = -1;

/// Current Unix time in seconds.
pub(crate) fn now() -> i64 {
    Utc::now().timestamp()
}

/// Longest TTL sent to the server. Redis rejects an expiry whose deadline in
/// milliseconds does not fit an `i64`.
pub const MAX_TTL: i64 = i64::MAX / 1000 / 2;

/// TTLs below one second are raised to one: `SETEX 0` is an error and a
/// non-positive TTL must never reach the server. TTLs above [`MAX_TTL`] are
/// lowered to it.
pub fn effective_ttl(ttl: i64) -> i64 {
    ttl.clamp(1, MAX_TTL)
}

/// Absolute expiry of an entry written at `now` with `ttl`, bounded like
/// [`effective_ttl`] and saturating at `i64::MAX`.
pub(crate) fn expires_in(now: i64, ttl: i64) -> i64 {
    now.saturating_add(effective_ttl(ttl))
}

/// The value write at the end of a tagged batch.
#[derive(Debug, Clone)]
pub(crate) enum DataWrite {
    /// `SETEX`
    Put { payload: Payload, ttl: i64 },
    /// `SET .. EX .. NX`
    Add { payload: Payload, ttl: i64 },
    /// `SET`
    Forever { payload: Payload },
    /// `INCRBY`
    Increment(i64),
    /// `DECRBY`
    Decrement(i64),
}

impl DataWrite {
    pub(crate) fn put(payload: Payload, ttl: i64) -> Self {
        DataWrite::Put {
            payload,
            ttl: effective_ttl(ttl),
        }
    }

    pub(crate) fn add(payload: Payload, ttl: i64) -> Self {
        DataWrite::Add {
            payload,
            ttl: effective_ttl(ttl),
        }
    }

    /// Absolute expiry recorded in tag structures, `None` for entries that
    /// never expire (forever values and counters).
    pub(crate) fn expires_at(&self, now: i64) -> Option<i64> {
        match self {
            DataWrite::Put { ttl, .. } | DataWrite::Add { ttl, .. } => Some(expires_in(now, *ttl)),
            _ => None,
        }
    }

    pub(crate) fn is_counter(&self) -> bool {
        matches!(self, DataWrite::Increment(_) | DataWrite::Decrement(_))
    }

    pub(crate) fn command(&self, key: &str) -> Cmd {
        match self {
            DataWrite::Put { payload, ttl } => {
                let mut cmd = redis::cmd("SETEX");
                cmd.arg(key).arg(*ttl).arg(payload);
                cmd
            }
            DataWrite::Add { payload, ttl } => {
                let mut cmd = redis::cmd("SET");
                cmd.arg(key).arg(payload).arg("EX").arg(*ttl).arg("NX");
                cmd
            }
            DataWrite::Forever { payload } => {
                let mut cmd = redis::cmd("SET");
                cmd.arg(key).arg(payload);
                cmd
            }
            DataWrite::Increment(delta) => {
                let mut cmd = redis::cmd("INCRBY");
                cmd.arg(key).arg(*delta);
                cmd
            }
            DataWrite::Decrement(delta) => {
                let mut cmd = redis::cmd("DECRBY");
                cmd.arg(key).arg(*delta);
                cmd
            }
        }
    }
}

/// Run `batch` and return the reply of its last command, the data write.
pub(crate) async fn last_reply(batch: CommandBatch, conn: &mut TagConnection<'_>) -> CacheResult<Value> {
    let data_slot = batch.len().saturating_sub(1);
    let outcomes = batch.execute_each(conn).await?;
    Ok(data_replies(outcomes, &[data_slot])?.pop().unwrap_or(Value::Nil))
}

/// Replies of the data writes at `data_slots` (ascending), in order.
///
/// A failed data write fails the call. A failed bookkeeping command is only
/// logged: the value is written and prune reconciles the tag structures.
pub(crate) fn data_replies(
    outcomes: Vec<RedisResult<Value>>,
    data_slots: &[usize],
) -> CacheResult<Vec<Value>> {
    let mut replies = Vec::with_capacity(data_slots.len());
    for (slot, outcome) in outcomes.into_iter().enumerate() {
        let is_data = data_slots.binary_search(&slot).is_ok();
        match outcome {
            Ok(reply) if is_data => replies.push(reply),
            Ok(_) => {}
            Err(err) if is_data => return Err(err.into()),
            Err(err) => warn!(slot, error = %err, "Tag bookkeeping command failed"),
        }
    }
    Ok(replies)
}

/// Whether a `SET`/`SETEX` reply reports a stored value.
pub(crate) fn stored(reply: &Value) -> bool {
    reply::is_ok(reply)
}

/// The new counter value from an `INCRBY`/`DECRBY` reply.
pub(crate) fn counter(reply: &Value) -> CacheResult<i64> {
    reply::int(reply)
        .ok_or_else(|| CacheError::Deserialization(format!("unexpected counter reply: {:?}", reply)))
}

/// `GET` and decode, on an already checked-out connection.
pub(crate) async fn fetch<T: DeserializeOwned>(
    conn: &mut TagConnection<'_>,
    prefixed_key: &str,
) -> CacheResult<Option<T>> {
    let raw: Value = redis::cmd("GET").arg(prefixed_key).query_async(conn).await?;
    match reply::bytes(raw) {
        Some(bytes) => Ok(Some(unserialize(&bytes)?)),
        None => Ok(None),
    }
}
