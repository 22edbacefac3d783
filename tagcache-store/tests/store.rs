//! Store facade and tag-scoped views

use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tagcache_redis::MemoryRedis;
use tagcache_store::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    id: u64,
    name: String,
}

fn store(redis_mem: &MemoryRedis, mode: TagMode) -> RedisStore {
    let config = CacheConfig::default().with_prefix("app").with_tag_mode(mode);
    RedisStore::new(Arc::new(redis_mem.clone()), &config)
}

#[tokio::test]
async fn test_untagged_put_get_forget() {
    let redis_mem = MemoryRedis::new();
    let store = store(&redis_mem, TagMode::All);
    let user = User {
        id: 1,
        name: "Ada".into(),
    };

    assert!(store.put("user:1", &user, 60).await.unwrap());
    assert_eq!(store.get::<User>("user:1").await.unwrap(), Some(user));
    assert_eq!(redis_mem.commands_named("SETEX").len(), 1);

    assert!(store.forget("user:1").await.unwrap());
    assert!(!store.forget("user:1").await.unwrap());
    assert_eq!(store.get::<User>("user:1").await.unwrap(), None);
}

#[tokio::test]
async fn test_untagged_numbers_are_stored_raw() {
    let redis_mem = MemoryRedis::new();
    let store = store(&redis_mem, TagMode::All);

    store.forever("visits", &12).await.unwrap();

    assert_eq!(redis_mem.commands_named("SET"), vec!["SET app:visits 12"]);
    assert_eq!(store.get::<i64>("visits").await.unwrap(), Some(12));
}

#[tokio::test]
async fn test_all_mode_items_are_namespaced_by_tag_set() {
    let redis_mem = MemoryRedis::new();
    let store = store(&redis_mem, TagMode::All);

    store.tags(["a", "b"]).put("k", "ab", 60).await.unwrap();

    assert_eq!(
        store.tags(["a", "b"]).get::<String>("k").await.unwrap().as_deref(),
        Some("ab")
    );
    assert_eq!(store.tags(["b", "a"]).get::<String>("k").await.unwrap(), None);
    assert_eq!(store.get::<String>("k").await.unwrap(), None);

    let namespace = TagSet::new(["a", "b"]).namespace();
    assert_eq!(store.tags(["a", "b"]).item_key("k"), format!("{}:k", namespace));
}

#[tokio::test]
async fn test_any_mode_items_keep_plain_keys() {
    let redis_mem = MemoryRedis::new();
    let store = store(&redis_mem, TagMode::Any);

    store.tags(["a", "b"]).put("k", "v", 60).await.unwrap();

    assert_eq!(store.get::<String>("k").await.unwrap().as_deref(), Some("v"));
    assert_eq!(store.tags(["b"]).get::<String>("k").await.unwrap().as_deref(), Some("v"));
}

#[tokio::test]
async fn test_all_mode_flush_through_tag_view() {
    let redis_mem = MemoryRedis::new();
    let store = store(&redis_mem, TagMode::All);
    let posts = store.tags(["posts"]);

    posts.put("p1", "one", 60).await.unwrap();
    posts.put_many(&[("p2", "two"), ("p3", "three")], 60).await.unwrap();
    store.tags(["users"]).put("u1", "ada", 60).await.unwrap();

    assert_eq!(posts.flush().await.unwrap(), 3);

    assert_eq!(posts.get::<String>("p1").await.unwrap(), None);
    assert_eq!(posts.get::<String>("p3").await.unwrap(), None);
    assert_eq!(
        store.tags(["users"]).get::<String>("u1").await.unwrap().as_deref(),
        Some("ada")
    );
}

#[tokio::test]
async fn test_any_mode_flush_through_one_tag() {
    let redis_mem = MemoryRedis::new();
    let store = store(&redis_mem, TagMode::Any);

    store.tags(["posts", "user:42"]).put("feed", "v", 60).await.unwrap();
    store.tags(["posts"]).put("latest", "v", 60).await.unwrap();
    store.tags(["user:42"]).put("profile", "v", 60).await.unwrap();

    assert_eq!(store.tags(["user:42"]).flush().await.unwrap(), 2);

    assert_eq!(store.get::<String>("feed").await.unwrap(), None);
    assert_eq!(store.get::<String>("profile").await.unwrap(), None);
    assert_eq!(store.get::<String>("latest").await.unwrap().as_deref(), Some("v"));
}

#[tokio::test]
async fn test_tag_view_remember() {
    let redis_mem = MemoryRedis::new();
    let store = store(&redis_mem, TagMode::All);
    let users = store.tags(["users"]);

    let (user, hit) = users
        .remember("user:2", 300, || async {
            Ok(User {
                id: 2,
                name: "Grace".into(),
            })
        })
        .await
        .unwrap();
    assert!(!hit);
    assert_eq!(user.name, "Grace");

    let (cached, hit) = users
        .remember::<User, _, _>("user:2", 300, || async { Err(CacheError::Config("not called".into())) })
        .await
        .unwrap();
    assert!(hit);
    assert_eq!(cached, user);

    let (count, hit) = users.remember_forever("count", || async { Ok(1) }).await.unwrap();
    assert_eq!((count, hit), (1, false));
}

#[tokio::test]
async fn test_tag_view_counters_and_add() {
    let redis_mem = MemoryRedis::new();
    let store = store(&redis_mem, TagMode::Any);
    let stats = store.tags(["stats"]);

    assert_eq!(stats.increment("hits", 5).await.unwrap(), 5);
    assert_eq!(stats.decrement("hits", 2).await.unwrap(), 3);
    assert!(stats.add("first", "v", 60).await.unwrap());
    assert!(!stats.add("first", "w", 60).await.unwrap());
    assert!(stats.forever("pinned", "v").await.unwrap());

    let mut keys: Vec<String> = stats.entries().await.unwrap().try_collect().await.unwrap();
    keys.sort();
    assert_eq!(keys, vec!["first", "hits", "pinned"]);
}

#[tokio::test]
async fn test_mode_specific_operations_are_rejected() {
    let redis_mem = MemoryRedis::new();
    let any = store(&redis_mem, TagMode::Any);
    let all = any.with_tag_mode(TagMode::All);

    let err = any.tags(["a"]).flush_stale().await.unwrap_err();
    assert!(matches!(
        err,
        CacheError::Unsupported {
            operation: "flush_stale",
            mode: TagMode::Any
        }
    ));

    let err = all.tags(["a"]).items::<String>().await.err().unwrap();
    assert!(matches!(
        err,
        CacheError::Unsupported {
            operation: "items",
            mode: TagMode::All
        }
    ));

    assert_eq!(all.tags(["a"]).flush_stale().await.unwrap(), 0);
}

#[tokio::test]
async fn test_any_mode_items_through_tag_view() {
    let redis_mem = MemoryRedis::new();
    let store = store(&redis_mem, TagMode::Any);
    let users = store.tags(["users"]);

    users.put("u1", &1, 60).await.unwrap();
    users.put("u2", &2, 60).await.unwrap();
    store.forget("u2").await.unwrap();

    let items: Vec<(String, i64)> = users.items().await.unwrap().try_collect().await.unwrap();
    assert_eq!(items, vec![("u1".to_string(), 1)]);
}

#[tokio::test]
async fn test_set_tag_mode_switches_strategy() {
    let redis_mem = MemoryRedis::new();
    let mut store = store(&redis_mem, TagMode::All);
    assert!(matches!(store.strategy(), TagStrategy::All(_)));

    store.set_tag_mode(TagMode::Any);
    assert_eq!(store.tag_mode(), TagMode::Any);
    assert!(matches!(store.strategy(), TagStrategy::Any(_)));

    store.tags(["a"]).put("k", "v", 60).await.unwrap();
    assert!(redis_mem.commands_named("HSET")[0].starts_with("HSET app:_any:tag:a:entries k "));
    assert_eq!(store.context().prefix(), "app:");
}

#[tokio::test]
async fn test_connect_rejects_invalid_config() {
    let config = CacheConfig::redis("redis://127.0.0.1:1").with_scan_count(0);

    let err = RedisStore::connect(config).await.unwrap_err();
    assert!(matches!(err, CacheError::Config(_)));
}
