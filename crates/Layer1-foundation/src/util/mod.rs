//! Cache utilities
//!
//! - `LruCache`: entry-bounded LRU cache
//! - `TtlLruCache`: LRU cache with TTL support (remote request cache)

mod lru;

pub use lru::{LruCache, TtlLruCache};
