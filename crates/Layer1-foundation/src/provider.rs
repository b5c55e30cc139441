//! Provider contract
//!
//! Implemented identically by the Fast, Persistent and Remote tiers and
//! consumed only by the cache manager.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  CacheManager                                            │
//! │     │ get / set / delete / mget / mset / search ...      │
//! │     ▼                                                    │
//! │  CacheProvider<V>                                        │
//! │  ├── FastTier        (volatile, hybrid eviction)         │
//! │  ├── PersistentTier  (SQLite, LRU eviction, indexes)     │
//! │  └── RemoteTier      (read-through, writes are no-ops)   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Read methods are fail-soft: a failing backend is logged and reported as
//! a miss / empty result. Write methods return `Result` so a durable tier
//! can surface genuine write failures.

use crate::codec::CacheValue;
use crate::entry::{CacheEntry, SetOptions, TierKind};
use crate::search::{SearchHit, SearchQuery};
use crate::stats::ProviderStats;
use crate::Result;
use async_trait::async_trait;

/// Ordered multi-get result: one element per requested key
pub type MultiGet<V> = Vec<(String, Option<CacheEntry<V>>)>;

/// Batch write item
#[derive(Debug, Clone)]
pub struct BatchItem<V> {
    pub key: String,
    pub value: V,
    pub options: SetOptions,
}

impl<V> BatchItem<V> {
    pub fn new(key: impl Into<String>, value: V, options: SetOptions) -> Self {
        Self {
            key: key.into(),
            value,
            options,
        }
    }
}

#[async_trait]
pub trait CacheProvider<V: CacheValue>: Send + Sync {
    /// Which tier this provider implements
    fn tier(&self) -> TierKind;

    /// Prepare backing structures; idempotent
    async fn init(&self) -> Result<()>;

    /// Release backing structures; the provider reports unavailable afterwards
    async fn destroy(&self) -> Result<()>;

    async fn is_available(&self) -> bool;

    /// Entry for `key`, `None` on miss, expiry or backend failure
    async fn get(&self, key: &str) -> Option<CacheEntry<V>>;

    async fn set(&self, key: &str, value: V, options: &SetOptions) -> Result<()>;

    /// Returns whether the key was present
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn exists(&self, key: &str) -> bool;

    async fn clear(&self) -> Result<()>;

    async fn mget(&self, keys: &[String]) -> MultiGet<V> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            results.push((key.clone(), self.get(key).await));
        }
        results
    }

    async fn mset(&self, items: Vec<BatchItem<V>>) -> Result<()>;

    /// Returns whether any key was present
    async fn mdelete(&self, keys: &[String]) -> Result<bool>;

    /// Keys starting with `prefix`, sorted ascending
    async fn list(&self, prefix: &str, limit: Option<usize>) -> Vec<String>;

    async fn search(&self, query: &SearchQuery) -> Vec<SearchHit>;

    async fn get_stats(&self) -> ProviderStats;
}
