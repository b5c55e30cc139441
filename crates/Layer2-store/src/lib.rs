//! # sessioncache-store
//!
//! Local tiers of the cache:
//! - `fast`: bounded in-memory store with recency × frequency eviction
//! - `persistent`: SQLite store with secondary indexes and LRU eviction
//!
//! Both implement [`CacheProvider`](sessioncache_foundation::CacheProvider).

pub mod fast;
pub mod persistent;

pub use fast::{FastTier, FastUsage};
pub use persistent::{PersistentTier, PersistentUsage, TemperatureCounts};
