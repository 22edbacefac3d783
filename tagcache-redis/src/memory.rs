//! In-process Redis emulation.
//!
//! [`MemoryRedis`] implements the slice of the Redis command set the cache
//! engine relies on (strings with TTLs, sorted sets, hashes, the scan family,
//! pipelines) entirely in memory. It is a [`ConnectionProvider`], so the engine
//! runs against it unchanged. It also keeps the bookkeeping tests need:
//! checkouts, round trips, pipelines and a log of every executed command.
//!
//! A `MemoryRedis` built with [`MemoryRedis::cluster`] reports itself as a
//! cluster, which switches the engine to sequential command dispatch. One
//! built with [`MemoryRedis::sharded`] also splits the keyspace across
//! several shards: `SCAN` on a shard's connection only walks that shard.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionLike;
use redis::{Arg, Cmd, Pipeline, RedisFuture, RedisResult, ServerError, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::pattern::GlobPattern;
use crate::provider::{ConnectionProvider, TagConnection};
use crate::Result;

const DEFAULT_SCAN_COUNT: usize = 10;

#[derive(Debug, Clone)]
enum Data {
    Str(Vec<u8>),
    SortedSet(HashMap<String, f64>),
    Hash(HashMap<String, Vec<u8>>),
}

impl Data {
    fn type_name(&self) -> &'static str {
        match self {
            Data::Str(_) => "string",
            Data::SortedSet(_) => "zset",
            Data::Hash(_) => "hash",
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Data::Str(_) => false,
            Data::SortedSet(set) => set.is_empty(),
            Data::Hash(hash) => hash.is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    data: Data,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Database {
    entries: HashMap<String, Entry>,
    cursors: HashMap<u64, String>,
    next_cursor: u64,
    log: Vec<String>,
    round_trips: usize,
    pipelines: usize,
}

#[derive(Debug, Default)]
struct Shared {
    db: Mutex<Database>,
    checkouts: AtomicUsize,
}

/// Slice of the keyspace a connection's `SCAN` walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Shard {
    index: usize,
    count: usize,
}

impl Shard {
    fn owns(&self, key: &str) -> bool {
        shard_of(key, self.count) == self.index
    }
}

fn shard_of(key: &str, count: usize) -> usize {
    let hash = key
        .bytes()
        .fold(0u32, |hash, byte| hash.wrapping_mul(31).wrapping_add(u32::from(byte)));
    hash as usize % count.max(1)
}

/// In-memory Redis stand-in.
#[derive(Debug, Clone)]
pub struct MemoryRedis {
    shared: Arc<Shared>,
    cluster: bool,
    shards: usize,
}

impl Default for MemoryRedis {
    fn default() -> Self {
        Self {
            shared: Arc::default(),
            cluster: false,
            shards: 1,
        }
    }
}

impl MemoryRedis {
    /// A standalone (pipelining) instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// An instance that reports itself as a Redis Cluster.
    pub fn cluster() -> Self {
        Self::sharded(1)
    }

    /// A cluster whose keyspace is split across `shards` primaries.
    ///
    /// Commands still reach every key; only keyspace scans are per shard.
    pub fn sharded(shards: usize) -> Self {
        Self {
            shared: Arc::default(),
            cluster: true,
            shards: shards.max(1),
        }
    }

    /// A view over the same data with a different cluster flag.
    pub fn with_cluster(&self, cluster: bool) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            cluster,
            shards: if cluster { self.shards } else { 1 },
        }
    }

    /// A raw connection, not counted as a checkout.
    pub fn connection(&self) -> MemoryConnection {
        MemoryConnection {
            shared: Arc::clone(&self.shared),
            shard: None,
        }
    }

    /// Number of shards the keyspace is split across.
    pub fn shards(&self) -> usize {
        self.shards
    }

    /// The shard that owns `key`.
    pub fn shard_of(&self, key: &str) -> usize {
        shard_of(key, self.shards)
    }

    /// Number of [`ConnectionProvider::checkout`] calls so far.
    pub fn checkouts(&self) -> usize {
        self.shared.checkouts.load(Ordering::SeqCst)
    }

    /// Number of network round trips so far (one per command or pipeline).
    pub fn round_trips(&self) -> usize {
        self.shared.db.lock().round_trips
    }

    /// Number of pipelines executed so far.
    pub fn pipelines(&self) -> usize {
        self.shared.db.lock().pipelines
    }

    /// Every executed command, rendered as space separated arguments.
    pub fn commands(&self) -> Vec<String> {
        self.shared.db.lock().log.clone()
    }

    /// Executed commands whose name equals `name` (case-insensitive).
    pub fn commands_named(&self, name: &str) -> Vec<String> {
        let prefix = format!("{} ", name.to_ascii_uppercase());
        let bare = name.to_ascii_uppercase();
        self.commands()
            .into_iter()
            .filter(|c| c.starts_with(&prefix) || *c == bare)
            .collect()
    }

    /// Forget checkouts, round trips and the command log. Data is kept.
    pub fn reset_stats(&self) {
        self.shared.checkouts.store(0, Ordering::SeqCst);
        let mut db = self.shared.db.lock();
        db.log.clear();
        db.round_trips = 0;
        db.pipelines = 0;
    }

    /// Number of live keys.
    pub fn key_count(&self) -> usize {
        let mut db = self.shared.db.lock();
        db.purge_all();
        db.entries.len()
    }
}

#[async_trait]
impl ConnectionProvider for MemoryRedis {
    async fn checkout(&self) -> Result<TagConnection<'_>> {
        self.shared.checkouts.fetch_add(1, Ordering::SeqCst);
        Ok(TagConnection::new(self.connection(), self.cluster))
    }

    fn is_cluster(&self) -> bool {
        self.cluster
    }

    async fn scan_connections(&self) -> Result<Vec<TagConnection<'_>>> {
        if self.shards == 1 {
            return Ok(vec![self.checkout().await?]);
        }

        Ok((0..self.shards)
            .map(|index| {
                let conn = MemoryConnection {
                    shared: Arc::clone(&self.shared),
                    shard: Some(Shard {
                        index,
                        count: self.shards,
                    }),
                };
                TagConnection::new(conn, self.cluster)
            })
            .collect())
    }
}

/// Connection to a [`MemoryRedis`].
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    shared: Arc<Shared>,
    shard: Option<Shard>,
}

fn command_args(cmd: &Cmd) -> Vec<Vec<u8>> {
    cmd.args_iter()
        .filter_map(|arg| match arg {
            Arg::Simple(bytes) => Some(bytes.to_vec()),
            Arg::Cursor => None,
            _ => None,
        })
        .collect()
}

impl ConnectionLike for MemoryConnection {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        let reply = {
            let mut db = self.shared.db.lock();
            db.round_trips += 1;
            db.execute(command_args(cmd), self.shard).or_else(error_reply)
        };
        Box::pin(async move { reply })
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        cmd: &'a Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        let reply = {
            let mut db = self.shared.db.lock();
            db.round_trips += 1;
            db.pipelines += 1;

            // Like a server, a failing command yields an error reply in its
            // slot and the rest of the pipeline still runs.
            cmd.cmd_iter()
                .map(|command| db.execute(command_args(command), self.shard).or_else(error_reply))
                .collect::<RedisResult<Vec<_>>>()
                .map(|replies| {
                    // MULTI/EXEC framing: only the EXEC reply is requested.
                    if offset == replies.len() + 1 && count == 1 {
                        vec![Value::Array(replies)]
                    } else {
                        replies.into_iter().skip(offset).take(count).collect()
                    }
                })
        };
        Box::pin(async move { reply })
    }

    fn get_db(&self) -> i64 {
        0
    }
}

/// Server error reply: the first word is the code, the rest the detail.
fn error(message: impl Into<String>) -> redis::RedisError {
    let message = message.into();
    let (code, detail) = match message.split_once(' ') {
        Some((code, detail)) => (code.to_string(), Some(detail.to_string())),
        None => (message, None),
    };
    redis::make_extension_error(code, detail)
}

/// Relative expiry of `amount` units of `unit_ms`. Like the server, rejects
/// non-positive amounts and deadlines past the millisecond clock's range.
fn expire_time(amount: i64, unit_ms: i64, command: &str) -> RedisResult<Duration> {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |since| since.as_millis() as i64);
    amount
        .checked_mul(unit_ms)
        .filter(|ms| *ms > 0 && ms.checked_add(now_ms).is_some())
        .map(|ms| Duration::from_millis(ms as u64))
        .ok_or_else(|| error(format!("ERR invalid expire time in '{}' command", command)))
}

/// Turn a command failure into the error reply a server puts on the wire.
fn error_reply(err: redis::RedisError) -> RedisResult<Value> {
    ServerError::try_from(err).map(Value::ServerError)
}

fn wrong_type() -> redis::RedisError {
    error("WRONGTYPE Operation against a key holding the wrong kind of value")
}

fn not_integer() -> redis::RedisError {
    error("ERR value is not an integer or out of range")
}

fn bulk(bytes: impl Into<Vec<u8>>) -> Value {
    Value::BulkString(bytes.into())
}

fn format_score(score: f64) -> String {
    if score.is_infinite() {
        if score > 0.0 { "inf".into() } else { "-inf".into() }
    } else if score.fract() == 0.0 && score.abs() < 1e17 {
        format!("{}", score as i64)
    } else {
        format!("{}", score)
    }
}

/// Score bound as accepted by `ZRANGEBYSCORE` / `ZREMRANGEBYSCORE`.
#[derive(Debug, Clone, Copy)]
struct Bound {
    value: f64,
    exclusive: bool,
}

impl Bound {
    fn parse(raw: &str) -> RedisResult<Self> {
        let (exclusive, text) = match raw.strip_prefix('(') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let value = parse_score(text)?;
        Ok(Self { value, exclusive })
    }

    fn above(&self, score: f64) -> bool {
        if self.exclusive { score > self.value } else { score >= self.value }
    }

    fn below(&self, score: f64) -> bool {
        if self.exclusive { score < self.value } else { score <= self.value }
    }
}

fn parse_score(text: &str) -> RedisResult<f64> {
    text.parse::<f64>()
        .ok()
        .filter(|v| !v.is_nan())
        .ok_or_else(|| error("ERR value is not a valid float"))
}

struct Args {
    name: String,
    values: Vec<Vec<u8>>,
}

impl Args {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn bytes(&self, i: usize) -> RedisResult<&[u8]> {
        self.values
            .get(i)
            .map(Vec::as_slice)
            .ok_or_else(|| error(format!("ERR wrong number of arguments for '{}' command", self.name)))
    }

    fn string(&self, i: usize) -> RedisResult<String> {
        Ok(String::from_utf8_lossy(self.bytes(i)?).into_owned())
    }

    fn int(&self, i: usize) -> RedisResult<i64> {
        self.string(i)?.parse().map_err(|_| not_integer())
    }

    fn require(&self, at_least: usize) -> RedisResult<()> {
        if self.len() < at_least {
            return Err(error(format!(
                "ERR wrong number of arguments for '{}' command",
                self.name
            )));
        }
        Ok(())
    }
}

/// Options shared by the scan family.
struct ScanOptions {
    pattern: Option<GlobPattern>,
    count: usize,
    kind: Option<String>,
}

impl ScanOptions {
    fn parse(args: &Args, from: usize) -> RedisResult<Self> {
        let mut options = Self {
            pattern: None,
            count: DEFAULT_SCAN_COUNT,
            kind: None,
        };
        let mut i = from;
        while i < args.len() {
            match args.string(i)?.to_ascii_uppercase().as_str() {
                "MATCH" => options.pattern = Some(GlobPattern::new(args.bytes(i + 1)?)),
                "COUNT" => {
                    options.count = usize::try_from(args.int(i + 1)?)
                        .ok()
                        .filter(|c| *c > 0)
                        .ok_or_else(|| error("ERR syntax error"))?
                }
                "TYPE" => options.kind = Some(args.string(i + 1)?.to_ascii_lowercase()),
                _ => return Err(error("ERR syntax error")),
            }
            i += 2;
        }
        Ok(options)
    }

    fn accepts(&self, name: &str) -> bool {
        self.pattern
            .as_ref()
            .is_none_or(|pattern| pattern.matches(name.as_bytes()))
    }
}

impl Database {
    fn purge(&mut self, key: &str) {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key)
            && entry.expires_at.is_some_and(|at| at <= now)
        {
            self.entries.remove(key);
        }
    }

    fn purge_all(&mut self) {
        let now = Instant::now();
        self.entries
            .retain(|_, entry| entry.expires_at.is_none_or(|at| at > now));
    }

    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        self.purge(key);
        self.entries.get_mut(key)
    }

    fn string_value(&mut self, key: &str) -> RedisResult<Option<Vec<u8>>> {
        match self.live(key) {
            None => Ok(None),
            Some(Entry { data: Data::Str(bytes), .. }) => Ok(Some(bytes.clone())),
            Some(_) => Err(wrong_type()),
        }
    }

    fn sorted_set(&mut self, key: &str) -> RedisResult<Option<&mut HashMap<String, f64>>> {
        match self.live(key) {
            None => Ok(None),
            Some(Entry { data: Data::SortedSet(set), .. }) => Ok(Some(set)),
            Some(_) => Err(wrong_type()),
        }
    }

    fn sorted_set_or_create(&mut self, key: &str) -> RedisResult<&mut HashMap<String, f64>> {
        self.purge(key);
        let entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            data: Data::SortedSet(HashMap::new()),
            expires_at: None,
        });
        match &mut entry.data {
            Data::SortedSet(set) => Ok(set),
            _ => Err(wrong_type()),
        }
    }

    fn hash(&mut self, key: &str) -> RedisResult<Option<&mut HashMap<String, Vec<u8>>>> {
        match self.live(key) {
            None => Ok(None),
            Some(Entry { data: Data::Hash(hash), .. }) => Ok(Some(hash)),
            Some(_) => Err(wrong_type()),
        }
    }

    fn hash_or_create(&mut self, key: &str) -> RedisResult<&mut HashMap<String, Vec<u8>>> {
        self.purge(key);
        let entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            data: Data::Hash(HashMap::new()),
            expires_at: None,
        });
        match &mut entry.data {
            Data::Hash(hash) => Ok(hash),
            _ => Err(wrong_type()),
        }
    }

    /// Containers disappear once their last member is removed.
    fn drop_if_empty(&mut self, key: &str) {
        if self.entries.get(key).is_some_and(|entry| entry.data.is_empty()) {
            self.entries.remove(key);
        }
    }

    /// Pages through `candidates` (sorted) the way Redis cursors do: a cursor
    /// resumes after the last element it returned, so deleting elements
    /// between calls never causes surviving elements to be skipped.
    fn page(&mut self, candidates: Vec<String>, cursor: u64, count: usize) -> (u64, Vec<String>) {
        let start = if cursor == 0 {
            0
        } else {
            match self.cursors.remove(&cursor) {
                Some(last) => candidates.partition_point(|c| *c <= last),
                None => candidates.len(),
            }
        };

        let end = (start + count).min(candidates.len());
        let page = candidates[start..end].to_vec();

        let next = if end < candidates.len() {
            self.next_cursor += 1;
            let id = self.next_cursor;
            self.cursors.insert(id, page.last().cloned().unwrap_or_default());
            id
        } else {
            0
        };

        (next, page)
    }

    fn scan_reply(next: u64, items: Vec<Value>) -> Value {
        Value::Array(vec![bulk(next.to_string()), Value::Array(items)])
    }

    fn execute(&mut self, values: Vec<Vec<u8>>, shard: Option<Shard>) -> RedisResult<Value> {
        let Some(first) = values.first() else {
            return Err(error("ERR empty command"));
        };
        let name = String::from_utf8_lossy(first).to_ascii_uppercase();
        let rendered = std::iter::once(name.clone())
            .chain(values[1..].iter().map(|v| String::from_utf8_lossy(v).into_owned()))
            .collect::<Vec<_>>()
            .join(" ");
        self.log.push(rendered);

        let args = Args {
            name: name.to_ascii_lowercase(),
            values,
        };

        match name.as_str() {
            "PING" => Ok(Value::SimpleString("PONG".into())),
            "FLUSHDB" | "FLUSHALL" => {
                self.entries.clear();
                Ok(Value::Okay)
            }
            "GET" => self.get(&args),
            "MGET" => self.mget(&args),
            "SET" => self.set(&args),
            "SETEX" => self.setex(&args),
            "INCR" | "DECR" | "INCRBY" | "DECRBY" => self.incr(&args),
            "DEL" | "UNLINK" => self.del(&args),
            "EXISTS" => self.exists(&args),
            "EXPIRE" => self.expire(&args),
            "TTL" => self.ttl(&args),
            "TYPE" => self.kind(&args),
            "SCAN" => self.scan(&args, shard),
            "ZADD" => self.zadd(&args),
            "ZSCORE" => self.zscore(&args),
            "ZCARD" => self.zcard(&args),
            "ZREM" => self.zrem(&args),
            "ZREMRANGEBYSCORE" => self.zremrangebyscore(&args),
            "ZRANGEBYSCORE" => self.zrangebyscore(&args),
            "ZRANGE" => self.zrange(&args),
            "ZSCAN" => self.zscan(&args),
            "HSET" => self.hset(&args),
            "HSETNX" => self.hsetnx(&args),
            "HGET" => self.hget(&args),
            "HDEL" => self.hdel(&args),
            "HLEN" => self.hlen(&args),
            "HGETALL" => self.hgetall(&args),
            "HSCAN" => self.hscan(&args),
            other => Err(error(format!("ERR unknown command '{}'", other))),
        }
    }

    // ---- strings -------------------------------------------------------

    fn get(&mut self, args: &Args) -> RedisResult<Value> {
        args.require(2)?;
        Ok(self
            .string_value(&args.string(1)?)?
            .map(bulk)
            .unwrap_or(Value::Nil))
    }

    fn mget(&mut self, args: &Args) -> RedisResult<Value> {
        args.require(2)?;
        let mut replies = Vec::with_capacity(args.len() - 1);
        for i in 1..args.len() {
            let reply = match self.live(&args.string(i)?) {
                Some(Entry { data: Data::Str(bytes), .. }) => bulk(bytes.clone()),
                _ => Value::Nil,
            };
            replies.push(reply);
        }
        Ok(Value::Array(replies))
    }

    fn store_string(&mut self, key: String, value: Vec<u8>, ttl: Option<Duration>) {
        self.entries.insert(
            key,
            Entry {
                data: Data::Str(value),
                expires_at: ttl.and_then(|ttl| Instant::now().checked_add(ttl)),
            },
        );
    }

    fn set(&mut self, args: &Args) -> RedisResult<Value> {
        args.require(3)?;
        let key = args.string(1)?;
        let value = args.bytes(2)?.to_vec();
        let (mut ttl, mut nx, mut xx) = (None, false, false);

        let mut i = 3;
        while i < args.len() {
            match args.string(i)?.to_ascii_uppercase().as_str() {
                "EX" | "PX" => {
                    let unit_ms = if args.string(i)?.eq_ignore_ascii_case("EX") { 1000 } else { 1 };
                    ttl = Some(expire_time(args.int(i + 1)?, unit_ms, "set")?);
                    i += 2;
                }
                "NX" => {
                    nx = true;
                    i += 1;
                }
                "XX" => {
                    xx = true;
                    i += 1;
                }
                _ => return Err(error("ERR syntax error")),
            }
        }

        let exists = self.live(&key).is_some();
        if (nx && exists) || (xx && !exists) {
            return Ok(Value::Nil);
        }

        self.store_string(key, value, ttl);
        Ok(Value::Okay)
    }

    fn setex(&mut self, args: &Args) -> RedisResult<Value> {
        args.require(4)?;
        let ttl = expire_time(args.int(2)?, 1000, "setex")?;
        self.store_string(args.string(1)?, args.bytes(3)?.to_vec(), Some(ttl));
        Ok(Value::Okay)
    }

    fn incr(&mut self, args: &Args) -> RedisResult<Value> {
        args.require(2)?;
        let key = args.string(1)?;
        let delta = match args.name.as_str() {
            "incr" => 1,
            "decr" => -1,
            "incrby" => args.int(2)?,
            _ => args.int(2)?.checked_neg().ok_or_else(not_integer)?,
        };

        let (current, expires_at) = match self.live(&key) {
            None => (0, None),
            Some(Entry { data: Data::Str(bytes), expires_at }) => {
                let text = String::from_utf8_lossy(bytes);
                (text.parse::<i64>().map_err(|_| not_integer())?, *expires_at)
            }
            Some(_) => return Err(wrong_type()),
        };

        let next = current
            .checked_add(delta)
            .ok_or_else(|| error("ERR increment or decrement would overflow"))?;
        self.entries.insert(
            key,
            Entry {
                data: Data::Str(next.to_string().into_bytes()),
                expires_at,
            },
        );
        Ok(Value::Int(next))
    }

    // ---- keyspace ------------------------------------------------------

    fn del(&mut self, args: &Args) -> RedisResult<Value> {
        args.require(2)?;
        let mut removed = 0;
        for i in 1..args.len() {
            let key = args.string(i)?;
            self.purge(&key);
            if self.entries.remove(&key).is_some() {
                removed += 1;
            }
        }
        Ok(Value::Int(removed))
    }

    fn exists(&mut self, args: &Args) -> RedisResult<Value> {
        args.require(2)?;
        let mut found = 0;
        for i in 1..args.len() {
            if self.live(&args.string(i)?).is_some() {
                found += 1;
            }
        }
        Ok(Value::Int(found))
    }

    fn expire(&mut self, args: &Args) -> RedisResult<Value> {
        args.require(3)?;
        let key = args.string(1)?;
        let seconds = args.int(2)?;
        if seconds <= 0 {
            let existed = self.entries.remove(&key).is_some();
            return Ok(Value::Int(existed as i64));
        }
        match self.live(&key) {
            Some(entry) => {
                entry.expires_at = Instant::now().checked_add(expire_time(seconds, 1000, "expire")?);
                Ok(Value::Int(1))
            }
            None => Ok(Value::Int(0)),
        }
    }

    fn ttl(&mut self, args: &Args) -> RedisResult<Value> {
        args.require(2)?;
        Ok(Value::Int(match self.live(&args.string(1)?) {
            None => -2,
            Some(Entry { expires_at: None, .. }) => -1,
            Some(Entry { expires_at: Some(at), .. }) => {
                let remaining = at.saturating_duration_since(Instant::now());
                remaining.as_millis().div_ceil(1000) as i64
            }
        }))
    }

    fn kind(&mut self, args: &Args) -> RedisResult<Value> {
        args.require(2)?;
        let name = self
            .live(&args.string(1)?)
            .map(|entry| entry.data.type_name())
            .unwrap_or("none");
        Ok(Value::SimpleString(name.into()))
    }

    fn scan(&mut self, args: &Args, shard: Option<Shard>) -> RedisResult<Value> {
        args.require(2)?;
        let cursor = args.string(1)?.parse::<u64>().map_err(|_| error("ERR invalid cursor"))?;
        let options = ScanOptions::parse(args, 2)?;

        self.purge_all();
        let mut keys: Vec<String> = self
            .entries
            .keys()
            .filter(|key| shard.is_none_or(|shard| shard.owns(key)))
            .cloned()
            .collect();
        keys.sort();

        let (next, page) = self.page(keys, cursor, options.count);
        let items = page
            .into_iter()
            .filter(|key| options.accepts(key))
            .filter(|key| {
                options.kind.as_deref().is_none_or(|kind| {
                    self.entries
                        .get(key)
                        .is_some_and(|entry| entry.data.type_name() == kind)
                })
            })
            .map(bulk)
            .collect();

        Ok(Self::scan_reply(next, items))
    }

    // ---- sorted sets ---------------------------------------------------

    fn zadd(&mut self, args: &Args) -> RedisResult<Value> {
        args.require(4)?;
        let key = args.string(1)?;
        let (mut nx, mut xx, mut gt, mut lt, mut ch) = (false, false, false, false, false);

        let mut i = 2;
        while i < args.len() {
            match args.string(i)?.to_ascii_uppercase().as_str() {
                "NX" => nx = true,
                "XX" => xx = true,
                "GT" => gt = true,
                "LT" => lt = true,
                "CH" => ch = true,
                _ => break,
            }
            i += 1;
        }

        if (nx && xx) || (nx && (gt || lt)) || (gt && lt) {
            return Err(error(
                "ERR GT, LT, and/or NX options at the same time are not compatible",
            ));
        }
        if i >= args.len() || (args.len() - i) % 2 != 0 {
            return Err(error("ERR syntax error"));
        }

        let mut pairs = Vec::new();
        while i < args.len() {
            pairs.push((parse_score(&args.string(i)?)?, args.string(i + 1)?));
            i += 2;
        }

        let set = self.sorted_set_or_create(&key)?;
        let (mut added, mut changed) = (0, 0);
        for (score, member) in pairs {
            match set.get(&member).copied() {
                Some(_) if nx => {}
                None if xx => {}
                Some(old) if (gt && score <= old) || (lt && score >= old) => {}
                Some(old) => {
                    if old != score {
                        changed += 1;
                    }
                    set.insert(member, score);
                }
                None => {
                    added += 1;
                    set.insert(member, score);
                }
            }
        }
        self.drop_if_empty(&key);

        Ok(Value::Int(if ch { added + changed } else { added }))
    }

    fn zscore(&mut self, args: &Args) -> RedisResult<Value> {
        args.require(3)?;
        let member = args.string(2)?;
        Ok(self
            .sorted_set(&args.string(1)?)?
            .and_then(|set| set.get(&member).copied())
            .map(|score| bulk(format_score(score)))
            .unwrap_or(Value::Nil))
    }

    fn zcard(&mut self, args: &Args) -> RedisResult<Value> {
        args.require(2)?;
        Ok(Value::Int(
            self.sorted_set(&args.string(1)?)?.map_or(0, |set| set.len() as i64),
        ))
    }

    fn zrem(&mut self, args: &Args) -> RedisResult<Value> {
        args.require(3)?;
        let key = args.string(1)?;
        let members: Vec<String> = (2..args.len()).map(|i| args.string(i)).collect::<RedisResult<_>>()?;
        let removed = match self.sorted_set(&key)? {
            Some(set) => members.iter().filter(|m| set.remove(*m).is_some()).count(),
            None => 0,
        };
        self.drop_if_empty(&key);
        Ok(Value::Int(removed as i64))
    }

    fn ordered(set: &HashMap<String, f64>) -> Vec<(String, f64)> {
        let mut members: Vec<(String, f64)> = set.iter().map(|(m, s)| (m.clone(), *s)).collect();
        members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        members
    }

    fn zremrangebyscore(&mut self, args: &Args) -> RedisResult<Value> {
        args.require(4)?;
        let key = args.string(1)?;
        let (min, max) = (Bound::parse(&args.string(2)?)?, Bound::parse(&args.string(3)?)?);
        let removed = match self.sorted_set(&key)? {
            Some(set) => {
                let before = set.len();
                set.retain(|_, score| !(min.above(*score) && max.below(*score)));
                before - set.len()
            }
            None => 0,
        };
        self.drop_if_empty(&key);
        Ok(Value::Int(removed as i64))
    }

    fn zrangebyscore(&mut self, args: &Args) -> RedisResult<Value> {
        args.require(4)?;
        let (min, max) = (Bound::parse(&args.string(2)?)?, Bound::parse(&args.string(3)?)?);
        let with_scores = args.len() > 4 && args.string(4)?.eq_ignore_ascii_case("WITHSCORES");
        let members = match self.sorted_set(&args.string(1)?)? {
            Some(set) => Self::ordered(set),
            None => Vec::new(),
        };

        let mut items = Vec::new();
        for (member, score) in members {
            if min.above(score) && max.below(score) {
                items.push(bulk(member));
                if with_scores {
                    items.push(bulk(format_score(score)));
                }
            }
        }
        Ok(Value::Array(items))
    }

    fn zrange(&mut self, args: &Args) -> RedisResult<Value> {
        args.require(4)?;
        let (start, stop) = (args.int(2)?, args.int(3)?);
        let with_scores = args.len() > 4 && args.string(4)?.eq_ignore_ascii_case("WITHSCORES");
        let members = match self.sorted_set(&args.string(1)?)? {
            Some(set) => Self::ordered(set),
            None => Vec::new(),
        };

        let len = members.len() as i64;
        let resolve = |index: i64| if index < 0 { (len + index).max(0) } else { index };
        let (from, to) = (resolve(start), resolve(stop).min(len - 1));

        let mut items = Vec::new();
        if from <= to {
            for (member, score) in &members[from as usize..=to as usize] {
                items.push(bulk(member.clone()));
                if with_scores {
                    items.push(bulk(format_score(*score)));
                }
            }
        }
        Ok(Value::Array(items))
    }

    fn zscan(&mut self, args: &Args) -> RedisResult<Value> {
        args.require(3)?;
        let key = args.string(1)?;
        let cursor = args.string(2)?.parse::<u64>().map_err(|_| error("ERR invalid cursor"))?;
        let options = ScanOptions::parse(args, 3)?;

        let scores = match self.sorted_set(&key)? {
            Some(set) => set.clone(),
            None => return Ok(Self::scan_reply(0, Vec::new())),
        };
        let mut members: Vec<String> = scores.keys().cloned().collect();
        members.sort();

        let (next, page) = self.page(members, cursor, options.count);
        let mut items = Vec::new();
        for member in page.into_iter().filter(|m| options.accepts(m)) {
            let score = scores.get(&member).copied().unwrap_or_default();
            items.push(bulk(member));
            items.push(bulk(format_score(score)));
        }
        Ok(Self::scan_reply(next, items))
    }

    // ---- hashes --------------------------------------------------------

    fn hset(&mut self, args: &Args) -> RedisResult<Value> {
        args.require(4)?;
        if (args.len() - 2) % 2 != 0 {
            return Err(error("ERR wrong number of arguments for 'hset' command"));
        }
        let key = args.string(1)?;
        let mut pairs = Vec::new();
        for i in (2..args.len()).step_by(2) {
            pairs.push((args.string(i)?, args.bytes(i + 1)?.to_vec()));
        }

        let hash = self.hash_or_create(&key)?;
        let added = pairs
            .into_iter()
            .filter(|(field, value)| hash.insert(field.clone(), value.clone()).is_none())
            .count();
        Ok(Value::Int(added as i64))
    }

    fn hsetnx(&mut self, args: &Args) -> RedisResult<Value> {
        args.require(4)?;
        let (key, field) = (args.string(1)?, args.string(2)?);
        let value = args.bytes(3)?.to_vec();
        let hash = self.hash_or_create(&key)?;
        if hash.contains_key(&field) {
            return Ok(Value::Int(0));
        }
        hash.insert(field, value);
        Ok(Value::Int(1))
    }

    fn hget(&mut self, args: &Args) -> RedisResult<Value> {
        args.require(3)?;
        let field = args.string(2)?;
        Ok(self
            .hash(&args.string(1)?)?
            .and_then(|hash| hash.get(&field).cloned())
            .map(bulk)
            .unwrap_or(Value::Nil))
    }

    fn hdel(&mut self, args: &Args) -> RedisResult<Value> {
        args.require(3)?;
        let key = args.string(1)?;
        let fields: Vec<String> = (2..args.len()).map(|i| args.string(i)).collect::<RedisResult<_>>()?;
        let removed = match self.hash(&key)? {
            Some(hash) => fields.iter().filter(|f| hash.remove(*f).is_some()).count(),
            None => 0,
        };
        self.drop_if_empty(&key);
        Ok(Value::Int(removed as i64))
    }

    fn hlen(&mut self, args: &Args) -> RedisResult<Value> {
        args.require(2)?;
        Ok(Value::Int(
            self.hash(&args.string(1)?)?.map_or(0, |hash| hash.len() as i64),
        ))
    }

    fn hgetall(&mut self, args: &Args) -> RedisResult<Value> {
        args.require(2)?;
        let mut fields: Vec<(String, Vec<u8>)> = match self.hash(&args.string(1)?)? {
            Some(hash) => hash.iter().map(|(f, v)| (f.clone(), v.clone())).collect(),
            None => Vec::new(),
        };
        fields.sort();
        Ok(Value::Array(
            fields
                .into_iter()
                .flat_map(|(field, value)| [bulk(field), bulk(value)])
                .collect(),
        ))
    }

    fn hscan(&mut self, args: &Args) -> RedisResult<Value> {
        args.require(3)?;
        let key = args.string(1)?;
        let cursor = args.string(2)?.parse::<u64>().map_err(|_| error("ERR invalid cursor"))?;
        let options = ScanOptions::parse(args, 3)?;

        let values = match self.hash(&key)? {
            Some(hash) => hash.clone(),
            None => return Ok(Self::scan_reply(0, Vec::new())),
        };
        let mut fields: Vec<String> = values.keys().cloned().collect();
        fields.sort();

        let (next, page) = self.page(fields, cursor, options.count);
        let mut items = Vec::new();
        for field in page.into_iter().filter(|f| options.accepts(f)) {
            let value = values.get(&field).cloned().unwrap_or_default();
            items.push(bulk(field));
            items.push(bulk(value));
        }
        Ok(Self::scan_reply(next, items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(conn: &mut MemoryConnection, cmd: &mut Cmd) -> Value {
        cmd.query_async(conn).await.unwrap()
    }

    #[tokio::test]
    async fn test_setex_rejects_non_positive_ttl() {
        let redis = MemoryRedis::new();
        let mut conn = redis.connection();

        let result: RedisResult<Value> = redis::cmd("SETEX")
            .arg("k")
            .arg(0)
            .arg("v")
            .query_async(&mut conn)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_setex_rejects_overflowing_ttl() {
        let redis = MemoryRedis::new();
        let mut conn = redis.connection();

        let result: RedisResult<Value> = redis::cmd("SETEX")
            .arg("k")
            .arg(i64::MAX)
            .arg("v")
            .query_async(&mut conn)
            .await;
        assert!(result.is_err());
        assert_eq!(redis.key_count(), 0);
    }

    #[tokio::test]
    async fn test_zadd_flags() {
        let redis = MemoryRedis::new();
        let mut conn = redis.connection();

        run(&mut conn, redis::cmd("ZADD").arg("z").arg(10).arg("a")).await;
        run(&mut conn, redis::cmd("ZADD").arg("z").arg("NX").arg(20).arg("a")).await;
        let score: String = redis::cmd("ZSCORE").arg("z").arg("a").query_async(&mut conn).await.unwrap();
        assert_eq!(score, "10");

        run(&mut conn, redis::cmd("ZADD").arg("z").arg("GT").arg(5).arg("a")).await;
        let score: String = redis::cmd("ZSCORE").arg("z").arg("a").query_async(&mut conn).await.unwrap();
        assert_eq!(score, "10");

        run(&mut conn, redis::cmd("ZADD").arg("z").arg("GT").arg("+inf").arg("a")).await;
        let score: String = redis::cmd("ZSCORE").arg("z").arg("a").query_async(&mut conn).await.unwrap();
        assert_eq!(score, "inf");
    }

    #[tokio::test]
    async fn test_scan_cursor_survives_deletes() {
        let redis = MemoryRedis::new();
        let mut conn = redis.connection();
        for i in 0..25 {
            run(&mut conn, redis::cmd("ZADD").arg("z").arg(i).arg(format!("m{:02}", i))).await;
        }

        let mut seen = Vec::new();
        let mut cursor = 0u64;
        loop {
            let (next, items): (u64, Vec<String>) = redis::cmd("ZSCAN")
                .arg("z")
                .arg(cursor)
                .arg("COUNT")
                .arg(5)
                .query_async(&mut conn)
                .await
                .unwrap();
            for pair in items.chunks(2) {
                seen.push(pair[0].clone());
                run(&mut conn, redis::cmd("ZREM").arg("z").arg(&pair[0])).await;
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        assert_eq!(seen.len(), 25);
        let card: i64 = redis::cmd("ZCARD").arg("z").query_async(&mut conn).await.unwrap();
        assert_eq!(card, 0);
    }

    #[tokio::test]
    async fn test_pipeline_counts_one_round_trip() {
        let redis = MemoryRedis::new();
        let mut conn = redis.connection();

        let replies: Vec<Value> = redis::pipe()
            .cmd("SET").arg("a").arg("1")
            .cmd("INCRBY").arg("a").arg(4)
            .cmd("GET").arg("a")
            .query_async(&mut conn)
            .await
            .unwrap();

        assert_eq!(replies.len(), 3);
        assert_eq!(replies[1], Value::Int(5));
        assert_eq!(redis.round_trips(), 1);
        assert_eq!(redis.pipelines(), 1);
        assert_eq!(redis.commands_named("incrby"), vec!["INCRBY a 4"]);
    }

    #[tokio::test]
    async fn test_pipeline_error_reply_keeps_its_slot() {
        let redis = MemoryRedis::new();
        let mut conn = redis.connection();
        run(&mut conn, redis::cmd("SET").arg("s").arg("x")).await;

        let mut pipe = redis::pipe();
        pipe.cmd("ZADD").arg("s").arg(1).arg("m")
            .cmd("SET").arg("a").arg("1");

        let failed: RedisResult<Vec<Value>> = pipe.query_async(&mut conn).await;
        assert!(failed.is_err());

        let replies: Vec<Value> = pipe.ignore_errors().query_async(&mut conn).await.unwrap();
        assert_eq!(replies.len(), 2);
        let err = replies[0].clone().extract_error().unwrap_err();
        assert_eq!(err.code(), Some("WRONGTYPE"));
        assert_eq!(replies[1], Value::Okay);

        let stored: String = redis::cmd("GET").arg("a").query_async(&mut conn).await.unwrap();
        assert_eq!(stored, "1");
    }

    #[tokio::test]
    async fn test_sharded_scan_splits_keyspace() {
        let redis = MemoryRedis::sharded(3);
        let mut conn = redis.connection();
        for i in 0..30 {
            run(&mut conn, redis::cmd("SET").arg(format!("k{}", i)).arg(i)).await;
        }

        let mut seen = Vec::new();
        let shards = redis.scan_connections().await.unwrap();
        assert_eq!(shards.len(), 3);
        for (index, mut shard) in shards.into_iter().enumerate() {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(0)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut shard)
                .await
                .unwrap();
            assert_eq!(next, 0);
            assert!(keys.iter().all(|key| redis.shard_of(key) == index));
            seen.extend(keys);
        }

        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 30);
    }

    #[tokio::test]
    async fn test_checkouts_are_counted() {
        let redis = MemoryRedis::cluster();
        let conn = redis.checkout().await.unwrap();
        assert!(conn.is_cluster());
        assert_eq!(redis.checkouts(), 1);
    }
}
