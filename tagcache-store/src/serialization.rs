//! Value encoding.
//!
//! Numbers are stored as their plain decimal text so Redis can operate on
//! them natively (`INCRBY`/`DECRBY`). Everything else goes through JSON.

use redis::{RedisWrite, ToRedisArgs};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{CacheError, CacheResult};

/// A value ready to be written to Redis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Raw numeric text, written verbatim.
    Numeric(String),
    /// JSON bytes.
    Serialized(Vec<u8>),
}

impl Payload {
    /// The bytes sent to Redis.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Numeric(text) => text.as_bytes(),
            Payload::Serialized(bytes) => bytes,
        }
    }

    /// Whether the value bypassed the serializer.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Payload::Numeric(_))
    }
}

impl ToRedisArgs for Payload {
    fn write_redis_args<W>(&self, out: &mut W)
    where
        W: ?Sized + RedisWrite,
    {
        out.write_arg(self.as_bytes());
    }
}

/// Encode a value for storage.
pub fn serialize<T: Serialize + ?Sized>(value: &T) -> CacheResult<Payload> {
    let json = serde_json::to_value(value).map_err(|e| CacheError::Serialization(e.to_string()))?;

    match json {
        serde_json::Value::Number(number) => Ok(Payload::Numeric(number.to_string())),
        other => serde_json::to_vec(&other)
            .map(Payload::Serialized)
            .map_err(|e| CacheError::Serialization(e.to_string())),
    }
}

/// Decode a stored value.
///
/// A missing key must be handled by the caller before getting here: a
/// stored JSON `null` and an absent key are different things.
pub fn unserialize<T: DeserializeOwned>(raw: &[u8]) -> CacheResult<T> {
    if let Some(number) = numeric(raw)
        && let Ok(value) = serde_json::from_value(serde_json::Value::Number(number))
    {
        return Ok(value);
    }

    serde_json::from_slice(raw).map_err(|e| CacheError::Deserialization(e.to_string()))
}

fn numeric(raw: &[u8]) -> Option<serde_json::Number> {
    let text = std::str::from_utf8(raw).ok()?;
    if let Ok(int) = text.parse::<i64>() {
        return Some(int.into());
    }
    if let Ok(uint) = text.parse::<u64>() {
        return Some(uint.into());
    }
    text.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(serde_json::Number::from_f64)
}
