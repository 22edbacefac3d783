//! Tag-based cache invalidation over Redis.
//!
//! Redis has no notion of tags. This crate keeps the bookkeeping that maps
//! tags to cache keys inside Redis itself, so entries written with a set of
//! tags can later be invalidated together, and a periodic prune keeps that
//! bookkeeping from drifting.
//!
//! # Features
//!
//! - **Two tagging strategies** - `all` (intersection, sorted sets) and
//!   `any` (union, hashes plus a tag registry), see [`TagMode`]
//! - **One checkout per operation** - lookups and dual writes share a single
//!   pooled connection
//! - **Cluster aware** - pipelined batches on a standalone server, ordered
//!   per-command dispatch on Redis Cluster
//! - **Lazy scans** - tag membership is streamed page by page with cursors
//! - **Prune** - idempotent, throttled garbage collection with a scheduler
//!
//! # Examples
//!
//! ```no_run
//! use tagcache_store::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), CacheError> {
//!     let store = RedisStore::connect(
//!         CacheConfig::redis("redis://localhost:6379").with_prefix("app"),
//!     )
//!     .await?;
//!
//!     let users = store.tags(["users", "team:7"]);
//!     users.put("user:1", "Ada", 3600).await?;
//!
//!     let (name, hit) = users
//!         .remember("user:2", 3600, || async { Ok("Grace".to_string()) })
//!         .await?;
//!     assert!(!hit);
//!     assert_eq!(name, "Grace");
//!
//!     users.flush().await?;
//!     let report = store.prune().await?;
//!     println!("{:?}", report);
//!     Ok(())
//! }
//! ```

pub mod all_tag;
pub mod any_tag;
pub mod batch;
pub mod config;
pub mod context;
pub mod error;
pub mod prune;
mod reply;
pub mod scan;
pub mod serialization;
pub mod store;
pub mod tagged;
mod write;

pub use all_tag::AllTagOperations;
pub use any_tag::AnyTagOperations;
pub use batch::{CommandBatch, Dispatch};
pub use config::{CacheConfig, TagMode};
pub use context::StoreContext;
pub use error::{CacheError, CacheResult};
pub use prune::{AllPruneStats, AnyPruneStats, PruneReport, PruneScheduler};
pub use scan::{Dedup, ScanCursor, TagMembers};
pub use serialization::{Payload, serialize, unserialize};
pub use store::{RedisStore, TagStrategy};
pub use tagged::{TagSet, TaggedCache};
pub use write::{FOREVER_SCORE, MAX_TTL, effective_ttl};
