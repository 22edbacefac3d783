//! Decoding of raw Redis replies.
//!
//! Batches return `redis::Value`s of mixed shape; these helpers read the few
//! shapes the engine cares about and treat anything else as absent.

use redis::Value;

/// Integer reply, or a bulk string holding an integer.
pub(crate) fn int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(n) => Some(*n),
        Value::BulkString(bytes) => std::str::from_utf8(bytes).ok()?.trim().parse().ok(),
        Value::SimpleString(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Textual reply.
pub(crate) fn text(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::SimpleString(text) => Some(text.clone()),
        Value::Int(n) => Some(n.to_string()),
        Value::Double(f) => Some(f.to_string()),
        Value::Okay => Some("OK".to_string()),
        _ => None,
    }
}

/// Stored value bytes; `None` for a missing key.
pub(crate) fn bytes(value: Value) -> Option<Vec<u8>> {
    match value {
        Value::BulkString(bytes) => Some(bytes),
        Value::SimpleString(text) => Some(text.into_bytes()),
        Value::Int(n) => Some(n.to_string().into_bytes()),
        _ => None,
    }
}

/// `OK` status reply (a successful `SET`).
pub(crate) fn is_ok(value: &Value) -> bool {
    match value {
        Value::Okay => true,
        Value::SimpleString(text) => text.eq_ignore_ascii_case("OK"),
        _ => false,
    }
}

/// Flat `[member, score, member, score, ...]` or `[field, value, ...]` array
/// into pairs.
pub(crate) fn pairs(items: Vec<Value>) -> Vec<(String, Value)> {
    let mut out = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(name), Some(value)) = (iter.next(), iter.next()) {
        if let Some(name) = text(&name) {
            out.push((name, value));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_shapes() {
        assert_eq!(int(&Value::Int(3)), Some(3));
        assert_eq!(int(&Value::BulkString(b"-7".to_vec())), Some(-7));
        assert_eq!(int(&Value::Nil), None);
    }

    #[test]
    fn test_pairs_ignore_trailing_element() {
        let items = vec![
            Value::BulkString(b"a".to_vec()),
            Value::BulkString(b"1".to_vec()),
            Value::BulkString(b"b".to_vec()),
        ];
        let pairs = pairs(items);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, "a");
    }

    #[test]
    fn test_status_replies() {
        assert!(is_ok(&Value::Okay));
        assert!(is_ok(&Value::SimpleString("OK".into())));
        assert!(!is_ok(&Value::Nil));
        assert_eq!(bytes(Value::Nil), None);
    }
}
