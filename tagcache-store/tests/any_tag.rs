//! Any-mode tagging against the in-process Redis

use futures::TryStreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tagcache_redis::MemoryRedis;
use tagcache_redis::redis;
use tagcache_store::*;

const REGISTRY: &str = "app:_any:tag:registry";

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn operations(redis_mem: &MemoryRedis) -> AnyTagOperations {
    let config = CacheConfig::default()
        .with_prefix("app")
        .with_tag_mode(TagMode::Any);
    AnyTagOperations::new(StoreContext::new(Arc::new(redis_mem.clone()), &config))
}

fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

async fn field(redis_mem: &MemoryRedis, tag: &str, key: &str) -> Option<i64> {
    let mut conn = redis_mem.connection();
    redis::cmd("HGET")
        .arg(format!("app:_any:tag:{}:entries", tag))
        .arg(key)
        .query_async(&mut conn)
        .await
        .unwrap()
}

async fn registry_score(redis_mem: &MemoryRedis, tag: &str) -> Option<f64> {
    let mut conn = redis_mem.connection();
    redis::cmd("ZSCORE")
        .arg(REGISTRY)
        .arg(tag)
        .query_async(&mut conn)
        .await
        .unwrap()
}

async fn raw_get(redis_mem: &MemoryRedis, key: &str) -> Option<String> {
    let mut conn = redis_mem.connection();
    redis::cmd("GET").arg(key).query_async(&mut conn).await.unwrap()
}

#[tokio::test]
async fn test_put_records_expiry_in_every_tag() {
    let redis_mem = MemoryRedis::new();
    let ops = operations(&redis_mem);

    let before = now();
    assert!(ops.put("foo", "bar", 60, &names(&["a", "b"])).await.unwrap());

    assert_eq!(raw_get(&redis_mem, "app:foo").await.as_deref(), Some("\"bar\""));
    for tag in ["a", "b"] {
        let expires_at = field(&redis_mem, tag, "foo").await.unwrap();
        assert!(expires_at >= before + 60 && expires_at <= now() + 60);

        let watermark = registry_score(&redis_mem, tag).await.unwrap();
        assert_eq!(watermark as i64, expires_at);
    }
}

#[tokio::test]
async fn test_write_is_one_checkout_one_pipeline() {
    let redis_mem = MemoryRedis::new();
    let ops = operations(&redis_mem);

    ops.put("k", &1, 60, &names(&["a", "b", "c"])).await.unwrap();

    assert_eq!(redis_mem.checkouts(), 1);
    assert_eq!(redis_mem.pipelines(), 1);
    assert_eq!(redis_mem.round_trips(), 1);
    assert_eq!(redis_mem.commands().len(), 7);
}

#[tokio::test]
async fn test_ttl_is_floored_to_one_second() {
    let redis_mem = MemoryRedis::new();
    let ops = operations(&redis_mem);
    let tags = names(&["a"]);

    let before = now();
    ops.put("k", "v", 0, &tags).await.unwrap();

    assert_eq!(redis_mem.commands_named("SETEX"), vec!["SETEX app:k 1 \"v\""]);
    let expires_at = field(&redis_mem, "a", "k").await.unwrap();
    assert!(expires_at >= before + 1 && expires_at <= now() + 1);
}

#[tokio::test]
async fn test_forever_and_counters_never_expire() {
    let redis_mem = MemoryRedis::new();
    let ops = operations(&redis_mem);
    let tags = names(&["a"]);

    ops.forever("f", "v", &tags).await.unwrap();
    ops.increment("inc", 4, &tags).await.unwrap();
    assert_eq!(ops.decrement("inc", 1, &tags).await.unwrap(), 3);

    assert_eq!(field(&redis_mem, "a", "f").await, Some(-1));
    assert_eq!(field(&redis_mem, "a", "inc").await, Some(-1));
    assert_eq!(registry_score(&redis_mem, "a").await, Some(f64::INFINITY));
}

#[tokio::test]
async fn test_counter_keeps_existing_expiry_marker() {
    let redis_mem = MemoryRedis::new();
    let ops = operations(&redis_mem);
    let tags = names(&["a"]);

    ops.put("n", &10, 60, &tags).await.unwrap();
    let expires_at = field(&redis_mem, "a", "n").await.unwrap();

    assert_eq!(ops.increment("n", 5, &tags).await.unwrap(), 15);
    assert_eq!(field(&redis_mem, "a", "n").await, Some(expires_at));
}

#[tokio::test]
async fn test_add_on_existing_key_still_writes_tags() {
    let redis_mem = MemoryRedis::new();
    let ops = operations(&redis_mem);

    ops.put("k", "first", 60, &names(&["a"])).await.unwrap();
    assert!(!ops.add("k", "second", 60, &names(&["b"])).await.unwrap());

    assert_eq!(raw_get(&redis_mem, "app:k").await.as_deref(), Some("\"first\""));
    assert!(field(&redis_mem, "b", "k").await.is_some());
}

#[tokio::test]
async fn test_remember_miss_then_hit() {
    let redis_mem = MemoryRedis::new();
    let ops = operations(&redis_mem);
    let tags = names(&["a"]);
    let calls = AtomicUsize::new(0);

    let produce = || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok::<_, CacheError>("value".to_string())
    };

    let (first, hit) = ops.remember("k", 60, &tags, produce).await.unwrap();
    assert_eq!((first.as_str(), hit), ("value", false));
    assert_eq!(redis_mem.checkouts(), 1);
    redis_mem.reset_stats();

    let (second, hit) = ops.remember("k", 60, &tags, produce).await.unwrap();
    assert_eq!((second.as_str(), hit), ("value", true));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(redis_mem.commands(), vec!["GET app:k"]);
}

#[tokio::test]
async fn test_remember_forever_registers_at_infinity() {
    let redis_mem = MemoryRedis::new();
    let ops = operations(&redis_mem);

    let (value, hit) = ops
        .remember_forever("k", &names(&["a"]), || async { Ok(99) })
        .await
        .unwrap();

    assert_eq!((value, hit), (99, false));
    assert_eq!(field(&redis_mem, "a", "k").await, Some(-1));
    assert_eq!(registry_score(&redis_mem, "a").await, Some(f64::INFINITY));
}

#[tokio::test]
async fn test_tagged_keys_report_each_key_once() {
    let redis_mem = MemoryRedis::new();
    let ops = operations(&redis_mem);

    ops.put("shared", "v", 60, &names(&["a", "b"])).await.unwrap();
    ops.put("only_b", "v", 60, &names(&["b"])).await.unwrap();

    let mut keys: Vec<String> = ops
        .get_tagged_keys(&names(&["a", "b"]))
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    keys.sort();

    assert_eq!(keys, vec!["only_b", "shared"]);
}

#[tokio::test]
async fn test_tag_items_decode_values() {
    let redis_mem = MemoryRedis::new();
    let ops = operations(&redis_mem);
    let tags = names(&["users"]);

    ops.put("u1", "ada", 60, &tags).await.unwrap();
    ops.put("u2", "grace", 60, &tags).await.unwrap();

    let mut items: Vec<(String, String)> = ops
        .get_tag_items(&tags)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    items.sort();

    assert_eq!(
        items,
        vec![
            ("u1".to_string(), "ada".to_string()),
            ("u2".to_string(), "grace".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_flush_removes_keys_hashes_and_registry_entries() {
    let redis_mem = MemoryRedis::new();
    let ops = operations(&redis_mem);

    ops.put("k1", "v", 60, &names(&["a"])).await.unwrap();
    ops.put("k2", "v", 60, &names(&["a", "b"])).await.unwrap();
    ops.forever("k3", "v", &names(&["b"])).await.unwrap();
    ops.put("other", "v", 60, &names(&["c"])).await.unwrap();

    assert_eq!(ops.flush(&names(&["a", "b"])).await.unwrap(), 3);

    for key in ["app:k1", "app:k2", "app:k3"] {
        assert_eq!(raw_get(&redis_mem, key).await, None);
    }
    assert_eq!(field(&redis_mem, "a", "k1").await, None);
    assert_eq!(field(&redis_mem, "b", "k3").await, None);
    assert_eq!(registry_score(&redis_mem, "a").await, None);
    assert_eq!(registry_score(&redis_mem, "b").await, None);

    assert_eq!(raw_get(&redis_mem, "app:other").await.as_deref(), Some("\"v\""));
    assert!(registry_score(&redis_mem, "c").await.is_some());
}

#[tokio::test]
async fn test_flush_of_no_tags_is_a_no_op() {
    let redis_mem = MemoryRedis::new();
    let ops = operations(&redis_mem);

    assert_eq!(ops.flush(&[]).await.unwrap(), 0);
    assert!(redis_mem.commands().is_empty());
}

#[tokio::test]
async fn test_cluster_and_standalone_reach_same_state() {
    let standalone = MemoryRedis::new();
    let cluster = MemoryRedis::cluster();
    let tags = names(&["a", "b"]);

    for redis_mem in [&standalone, &cluster] {
        let ops = operations(redis_mem);
        ops.put("p", "v", 60, &tags).await.unwrap();
        ops.forever("f", &1, &tags).await.unwrap();
        ops.increment("c", 1, &tags).await.unwrap();
    }

    assert_eq!(cluster.pipelines(), 0);
    for key in ["p", "f", "c"] {
        let prefixed = format!("app:{}", key);
        assert_eq!(raw_get(&standalone, &prefixed).await, raw_get(&cluster, &prefixed).await);
        for tag in ["a", "b"] {
            let (a, b) = (
                field(&standalone, tag, key).await.unwrap(),
                field(&cluster, tag, key).await.unwrap(),
            );
            assert!((a - b).abs() <= 1, "{} {}: {} vs {}", tag, key, a, b);
        }
    }
    assert_eq!(registry_score(&cluster, "a").await, Some(f64::INFINITY));
}

async fn seed_string(redis_mem: &MemoryRedis, key: &str) {
    let mut conn = redis_mem.connection();
    let _: redis::Value = redis::cmd("SET").arg(key).arg("x").query_async(&mut conn).await.unwrap();
}

#[tokio::test]
async fn test_failed_tag_update_still_stores_value() {
    for (topology, redis_mem) in [("standalone", MemoryRedis::new()), ("cluster", MemoryRedis::cluster())] {
        let ops = operations(&redis_mem);
        // Strings at the tag hash and the registry make HSET and ZADD fail.
        seed_string(&redis_mem, "app:_any:tag:a:entries").await;

        let stored = ops.put("foo", "bar", 60, &names(&["a", "b"])).await.unwrap();
        assert!(stored, "{}", topology);
        assert_eq!(raw_get(&redis_mem, "app:foo").await.as_deref(), Some("\"bar\""));
        assert!(field(&redis_mem, "b", "foo").await.is_some(), "{}", topology);
        assert!(registry_score(&redis_mem, "b").await.is_some(), "{}", topology);

        seed_string(&redis_mem, REGISTRY).await;
        let items = [("k1", 1), ("k2", 2)];
        assert!(ops.put_many(&items, 60, &names(&["b"])).await.unwrap(), "{}", topology);
        assert_eq!(raw_get(&redis_mem, "app:k1").await.as_deref(), Some("1"));
        assert!(field(&redis_mem, "b", "k2").await.is_some());
    }
}

#[tokio::test]
async fn test_huge_ttl_is_bounded() {
    let redis_mem = MemoryRedis::new();
    let ops = operations(&redis_mem);

    assert!(ops.put("foo", "bar", i64::MAX, &names(&["a"])).await.unwrap());
    let expires_at = field(&redis_mem, "a", "foo").await.unwrap();
    assert!(expires_at > now() && expires_at <= now() + MAX_TTL);
    assert_eq!(registry_score(&redis_mem, "a").await.unwrap() as i64, expires_at);
}
