//! In-memory Fast tier

use super::eviction::{eviction_order, recency_order, CapacityTarget};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use sessioncache_foundation::search::{rank, score};
use sessioncache_foundation::{
    encode_payload, AccessCounter, BatchItem, CacheEntry, CacheProvider,
    CacheValue, Codec, EntryFacets, Error, FastTierConfig, JsonCodec, ProviderStats, Result,
    SearchHit, SearchQuery, SetOptions, Temperature, TierKind,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Byte/entry usage snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FastUsage {
    pub bytes: usize,
    pub max_bytes: usize,
    pub entries: usize,
    pub max_entries: usize,
}

impl FastUsage {
    /// Resident bytes as a fraction of the byte budget
    pub fn byte_ratio(&self) -> f64 {
        if self.max_bytes == 0 {
            return 0.0;
        }
        self.bytes as f64 / self.max_bytes as f64
    }
}

struct FastState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    bytes: usize,
    counter: AccessCounter,
    evictions: u64,
}

impl<V> FastState<V> {
    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let removed = self.entries.remove(key)?;
        self.bytes = self.bytes.saturating_sub(removed.size_bytes);
        Some(removed)
    }

    fn insert(&mut self, entry: CacheEntry<V>) {
        self.bytes += entry.size_bytes;
        self.entries.insert(entry.key.clone(), entry);
    }
}

/// Bounded in-memory tier.
///
/// All state sits behind one `parking_lot::Mutex`; no method awaits while
/// holding it.
pub struct FastTier<V> {
    target: CapacityTarget,
    codec: Arc<dyn Codec>,
    state: Mutex<FastState<V>>,
    available: AtomicBool,
}

impl<V: CacheValue> FastTier<V> {
    pub fn new(config: &FastTierConfig) -> Self {
        Self::with_codec(config, Arc::new(JsonCodec))
    }

    pub fn with_codec(config: &FastTierConfig, codec: Arc<dyn Codec>) -> Self {
        Self {
            target: CapacityTarget::new(
                config.max_bytes,
                config.max_entries,
                config.eviction_target_ratio,
            ),
            codec,
            state: Mutex::new(FastState {
                entries: HashMap::new(),
                bytes: 0,
                counter: AccessCounter::default(),
                evictions: 0,
            }),
            available: AtomicBool::new(true),
        }
    }

    pub fn capacity(&self) -> CapacityTarget {
        self.target
    }

    /// Encoded size of `value` under this tier's codec
    pub fn size_of(&self, value: &V) -> Result<usize> {
        Ok(encode_payload(self.codec.as_ref(), value)?.size())
    }

    /// Residency check that does not count as an access
    pub fn contains(&self, key: &str) -> bool {
        let now = Utc::now();
        self.state
            .lock()
            .entries
            .get(key)
            .is_some_and(|e| !e.is_expired_at(now))
    }

    /// Copy of a live entry without recording an access
    pub fn peek(&self, key: &str) -> Option<CacheEntry<V>> {
        let now = Utc::now();
        self.state
            .lock()
            .entries
            .get(key)
            .filter(|e| !e.is_expired_at(now))
            .cloned()
    }

    /// Whether `size` more bytes fit below the eviction targets without evicting
    pub fn has_headroom(&self, size: usize) -> bool {
        let state = self.state.lock();
        self.target
            .has_headroom(state.bytes, state.entries.len(), size)
    }

    /// Insert a fully formed entry, keeping its access history.
    ///
    /// Used for promotion so an entry does not lose its score when it moves up.
    pub fn put_entry(&self, entry: CacheEntry<V>) -> Result<()> {
        self.ensure_available()?;
        if entry.size_bytes > self.target.max_bytes {
            warn!(
                key = %entry.key,
                size = entry.size_bytes,
                max = self.target.max_bytes,
                "Value exceeds fast tier budget, not cached"
            );
            return Ok(());
        }

        let mut state = self.state.lock();
        state.remove(&entry.key);
        self.ensure_capacity(&mut state, entry.size_bytes);
        debug!(key = %entry.key, size = entry.size_bytes, "Fast tier insert");
        state.insert(entry.moved_to(TierKind::Fast, Temperature::Hot));
        Ok(())
    }

    /// Keys in ascending `last_accessed_at` order
    pub fn least_recently_used(&self, n: usize) -> Vec<String> {
        let state = self.state.lock();
        let mut keys = recency_order(&state.entries);
        keys.truncate(n);
        keys
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut state = self.state.lock();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired_at(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            state.remove(key);
        }
        expired.len()
    }

    pub fn usage(&self) -> FastUsage {
        let state = self.state.lock();
        FastUsage {
            bytes: state.bytes,
            max_bytes: self.target.max_bytes,
            entries: state.entries.len(),
            max_entries: self.target.max_entries,
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries removed by capacity eviction since creation
    pub fn evictions(&self) -> u64 {
        self.state.lock().evictions
    }

    /// Make room for a new entry of `new_size` bytes.
    ///
    /// Evicts lowest retention score first until the entry fits under both
    /// targets or the tier is empty.
    fn ensure_capacity(&self, state: &mut FastState<V>, new_size: usize) {
        if !self
            .target
            .needs_eviction(state.bytes, state.entries.len(), new_size)
        {
            return;
        }

        let mut evicted = 0usize;
        for key in eviction_order(&state.entries) {
            if self
                .target
                .has_headroom(state.bytes, state.entries.len(), new_size)
            {
                break;
            }
            if state.remove(&key).is_some() {
                evicted += 1;
            }
        }

        state.evictions += evicted as u64;
        debug!(
            evicted,
            bytes = state.bytes,
            entries = state.entries.len(),
            "Fast tier eviction"
        );
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::Unavailable("fast tier destroyed".into()))
        }
    }

    fn build_entry(&self, key: &str, value: V, options: &SetOptions) -> Result<CacheEntry<V>> {
        let payload = encode_payload(self.codec.as_ref(), &value)?;
        let now = Utc::now();
        let entry = CacheEntry::new(
            key,
            value,
            payload.size(),
            options.temperature.unwrap_or(Temperature::Hot),
            TierKind::Fast,
            now,
        )
        .with_expiry(options.resolve_expiry(now))
        .with_facets(EntryFacets::from_payload(&payload.json));
        Ok(entry)
    }
}

#[async_trait]
impl<V: CacheValue> CacheProvider<V> for FastTier<V> {
    fn tier(&self) -> TierKind {
        TierKind::Fast
    }

    async fn init(&self) -> Result<()> {
        self.available.store(true, Ordering::Release);
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.available.store(false, Ordering::Release);
        let mut state = self.state.lock();
        state.entries.clear();
        state.bytes = 0;
        Ok(())
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    async fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        if !self.available.load(Ordering::Acquire) {
            return None;
        }

        let started = Instant::now();
        let now = Utc::now();
        let mut state = self.state.lock();

        let expired = state.entries.get(key).map(|e| e.is_expired_at(now));
        let result = match expired {
            Some(false) => {
                state.counter.record_hit();
                state.entries.get_mut(key).map(|entry| {
                    entry.touch(now);
                    entry.clone()
                })
            }
            Some(true) => {
                debug!(key = %key, "Fast tier entry expired");
                state.remove(key);
                state.counter.record_miss();
                None
            }
            None => {
                state.counter.record_miss();
                None
            }
        };
        state.counter.record_latency(started.elapsed());
        drop(state);

        result
    }

    async fn set(&self, key: &str, value: V, options: &SetOptions) -> Result<()> {
        self.ensure_available()?;
        let entry = self.build_entry(key, value, options)?;

        if entry.size_bytes > self.target.max_bytes {
            warn!(
                key = %key,
                size = entry.size_bytes,
                max = self.target.max_bytes,
                "Value exceeds fast tier budget, not cached"
            );
            return Ok(());
        }

        let mut state = self.state.lock();
        state.remove(key);
        self.ensure_capacity(&mut state, entry.size_bytes);
        state.insert(entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.state.lock().remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> bool {
        self.contains(key)
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.entries.clear();
        state.bytes = 0;
        Ok(())
    }

    async fn mset(&self, items: Vec<BatchItem<V>>) -> Result<()> {
        for item in items {
            self.set(&item.key, item.value, &item.options).await?;
        }
        Ok(())
    }

    async fn mdelete(&self, keys: &[String]) -> Result<bool> {
        let mut state = self.state.lock();
        let mut any = false;
        for key in keys {
            any |= state.remove(key).is_some();
        }
        Ok(any)
    }

    async fn list(&self, prefix: &str, limit: Option<usize>) -> Vec<String> {
        let now = Utc::now();
        let state = self.state.lock();
        let mut keys: Vec<String> = state
            .entries
            .values()
            .filter(|e| e.key.starts_with(prefix) && !e.is_expired_at(now))
            .map(|e| e.key.clone())
            .collect();
        keys.sort();
        if let Some(limit) = limit {
            keys.truncate(limit);
        }
        keys
    }

    async fn search(&self, query: &SearchQuery) -> Vec<SearchHit> {
        let now = Utc::now();
        let state = self.state.lock();
        let hits = state
            .entries
            .values()
            .filter(|e| !e.is_expired_at(now))
            .map(|e| SearchHit {
                key: e.key.clone(),
                score: score(query, &e.key, &e.facets),
                tier: TierKind::Fast,
            })
            .collect();
        rank(hits, query.effective_limit())
    }

    async fn get_stats(&self) -> ProviderStats {
        let state = self.state.lock();
        ProviderStats {
            total_entries: state.entries.len(),
            total_size: state.bytes,
            hit_count: state.counter.hits(),
            miss_count: state.counter.misses(),
            hit_rate: state.counter.hit_rate(),
            avg_access_time: state.counter.avg_access_ms(),
            oldest_entry: state.entries.values().map(|e| e.created_at).min(),
            newest_entry: state.entries.values().map(|e| e.created_at).max(),
        }
    }
}
