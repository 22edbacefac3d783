//! Cursor scans (`SCAN`, `ZSCAN`, `HSCAN`).
//!
//! A [`ScanCursor`] fetches one page per call, so callers decide how far to
//! go and can interleave other commands on the same connection between pages.
//! Cursors are single pass: once a scan has finished it stays finished.

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use redis::{Cmd, Value};
use std::collections::{HashSet, VecDeque};
use tagcache_redis::TagConnection;
use tracing::trace;

use crate::error::{CacheError, CacheResult};
use crate::reply;

#[derive(Debug, Clone)]
enum Target {
    Keys { pattern: String },
    SortedSet { key: String },
    Hash { key: String },
}

/// Incremental scan over the keyspace, a sorted set or a hash.
#[derive(Debug, Clone)]
pub struct ScanCursor {
    target: Target,
    cursor: u64,
    count: usize,
    finished: bool,
}

impl ScanCursor {
    /// `SCAN` for keys matching `pattern`.
    pub fn keys(pattern: impl Into<String>, count: usize) -> Self {
        Self::new(
            Target::Keys {
                pattern: pattern.into(),
            },
            count,
        )
    }

    /// `ZSCAN` over a sorted set.
    pub fn sorted_set(key: impl Into<String>, count: usize) -> Self {
        Self::new(Target::SortedSet { key: key.into() }, count)
    }

    /// `HSCAN` over a hash.
    pub fn hash(key: impl Into<String>, count: usize) -> Self {
        Self::new(Target::Hash { key: key.into() }, count)
    }

    fn new(target: Target, count: usize) -> Self {
        Self {
            target,
            cursor: 0,
            count: count.max(1),
            finished: false,
        }
    }

    /// Whether the server has reported the end of the scan.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn command(&self) -> Cmd {
        let mut cmd = match &self.target {
            Target::Keys { pattern } => {
                let mut cmd = redis::cmd("SCAN");
                cmd.arg(self.cursor).arg("MATCH").arg(pattern);
                cmd
            }
            Target::SortedSet { key } => {
                let mut cmd = redis::cmd("ZSCAN");
                cmd.arg(key).arg(self.cursor);
                cmd
            }
            Target::Hash { key } => {
                let mut cmd = redis::cmd("HSCAN");
                cmd.arg(key).arg(self.cursor);
                cmd
            }
        };
        cmd.arg("COUNT").arg(self.count);
        cmd
    }

    /// Fetch the next page of raw items, or `None` once the scan is over.
    ///
    /// A reply that is not a `[cursor, items]` array ends the scan instead
    /// of failing it.
    pub async fn next_page(&mut self, conn: &mut TagConnection<'_>) -> CacheResult<Option<Vec<Value>>> {
        if self.finished {
            return Ok(None);
        }

        let reply: Value = self.command().query_async(conn).await?;

        let (next, items) = match reply {
            Value::Array(mut parts) if parts.len() == 2 => {
                let items = parts.pop();
                let next = parts.pop();
                match (next.as_ref().and_then(reply::text), items) {
                    (Some(next), Some(Value::Array(items))) => (next.parse::<u64>().ok(), items),
                    _ => (None, Vec::new()),
                }
            }
            _ => (None, Vec::new()),
        };

        match next {
            Some(0) | None => self.finished = true,
            Some(cursor) => self.cursor = cursor,
        }

        trace!(
            target_kind = self.kind(),
            items = items.len(),
            finished = self.finished,
            "Scan page"
        );

        Ok(Some(items))
    }

    /// Next page of `SCAN` results as key names.
    pub async fn next_keys(&mut self, conn: &mut TagConnection<'_>) -> CacheResult<Option<Vec<String>>> {
        Ok(self
            .next_page(conn)
            .await?
            .map(|items| items.iter().filter_map(reply::text).collect()))
    }

    /// Next page of `ZSCAN`/`HSCAN` results as `(member, value)` pairs.
    pub async fn next_pairs(
        &mut self,
        conn: &mut TagConnection<'_>,
    ) -> CacheResult<Option<Vec<(String, Value)>>> {
        Ok(self.next_page(conn).await?.map(reply::pairs))
    }

    fn kind(&self) -> &'static str {
        match self.target {
            Target::Keys { .. } => "keys",
            Target::SortedSet { .. } => "zset",
            Target::Hash { .. } => "hash",
        }
    }
}

/// Scope of duplicate suppression in [`TagMembers`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dedup {
    /// A member is reported once per tag structure.
    PerTag,
    /// A member is reported once across all tag structures.
    Global,
}

/// Member names of several tag structures, one scan page at a time.
///
/// Structures are walked one after the other. Scan cursors may return a
/// member more than once, so every batch is filtered against the members
/// already reported.
#[derive(Debug)]
pub struct TagMembers {
    pending: VecDeque<ScanCursor>,
    current: Option<ScanCursor>,
    seen: HashSet<String>,
    dedup: Dedup,
}

impl TagMembers {
    /// Members of the given cursors, visited in order.
    pub fn new(cursors: impl IntoIterator<Item = ScanCursor>, dedup: Dedup) -> Self {
        Self {
            pending: cursors.into_iter().collect(),
            current: None,
            seen: HashSet::new(),
            dedup,
        }
    }

    /// Next batch of member names, or `None` when every structure is done.
    pub async fn next_batch(&mut self, conn: &mut TagConnection<'_>) -> CacheResult<Option<Vec<String>>> {
        loop {
            if self.current.is_none() {
                let Some(next) = self.pending.pop_front() else {
                    return Ok(None);
                };
                if self.dedup == Dedup::PerTag {
                    self.seen.clear();
                }
                self.current = Some(next);
            }

            let page = match self.current.as_mut() {
                Some(cursor) => cursor.next_pairs(conn).await?,
                None => None,
            };

            match page {
                Some(page) => {
                    let fresh: Vec<String> = page
                        .into_iter()
                        .map(|(member, _)| member)
                        .filter(|member| self.seen.insert(member.clone()))
                        .collect();
                    if !fresh.is_empty() {
                        return Ok(Some(fresh));
                    }
                }
                None => self.current = None,
            }
        }
    }

    /// Turn the walk into a lazy stream that owns `conn`.
    ///
    /// Each poll that runs out of buffered names issues the next scan
    /// command. The stream is single pass.
    pub fn into_stream<'a>(self, conn: TagConnection<'a>) -> BoxStream<'a, CacheResult<String>> {
        stream::try_unfold((self, conn), |(mut members, mut conn)| async move {
            let batch = members.next_batch(&mut conn).await?;
            Ok::<_, CacheError>(batch.map(|names| {
                let page = stream::iter(names.into_iter().map(Ok::<String, CacheError>));
                (page, (members, conn))
            }))
        })
        .try_flatten()
        .boxed()
    }
}
