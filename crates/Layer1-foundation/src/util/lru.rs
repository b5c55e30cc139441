//! Lightweight LRU cache
//!
//! Backs the remote tier's request cache. Eviction is a linear scan for the
//! oldest access stamp, which is fine for the few hundred entries it holds.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Entry-bounded LRU (Least Recently Used) cache
#[derive(Debug)]
pub struct LruCache<K, V> {
    entries: HashMap<K, LruEntry<V>>,
    capacity: usize,
    /// Monotonic stamp for LRU ordering
    access_counter: u64,
}

#[derive(Debug)]
struct LruEntry<V> {
    value: V,
    last_access: u64,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: HashMap::with_capacity(capacity),
            capacity,
            access_counter: 0,
        }
    }

    /// Get a value, refreshing its recency
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.access_counter += 1;
        let stamp = self.access_counter;
        self.entries.get_mut(key).map(|entry| {
            entry.last_access = stamp;
            &entry.value
        })
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert a value, evicting the least recently used entry when full
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.access_counter += 1;

        if let Some(entry) = self.entries.get_mut(&key) {
            entry.last_access = self.access_counter;
            return Some(std::mem::replace(&mut entry.value, value));
        }

        while self.entries.len() >= self.capacity {
            self.evict_lru();
        }

        self.entries.insert(
            key,
            LruEntry {
                value,
                last_access: self.access_counter,
            },
        );
        None
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|e| e.value)
    }

    pub fn retain<F>(&mut self, mut f: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        self.entries.retain(|k, e| f(k, &e.value));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn evict_lru(&mut self) {
        let lru_key = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_access)
            .map(|(k, _)| k.clone());
        if let Some(key) = lru_key {
            self.entries.remove(&key);
        }
    }
}

/// LRU cache with TTL (Time-To-Live) support
#[derive(Debug)]
pub struct TtlLruCache<K, V> {
    inner: LruCache<K, TtlEntry<V>>,
    default_ttl: Duration,
}

#[derive(Debug)]
struct TtlEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<K: Eq + Hash + Clone, V> TtlLruCache<K, V> {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            inner: LruCache::new(capacity),
            default_ttl,
        }
    }

    /// Get a value if it exists and hasn't expired; expired entries are dropped
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let now = Instant::now();
        let expired = match self.inner.get(key) {
            Some(entry) => entry.expires_at <= now,
            None => return None,
        };
        if expired {
            self.inner.remove(key);
            return None;
        }
        self.inner.get(key).map(|e| &e.value)
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    pub fn insert_with_ttl(&mut self, key: K, value: V, ttl: Duration) {
        let entry = TtlEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.inner.insert(key, entry);
    }

    pub fn cleanup_expired(&mut self) {
        let now = Instant::now();
        self.inner.retain(|_, e| e.expires_at > now);
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.inner.remove(key).map(|e| e.value)
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Number of entries, including ones that expired but were not yet read
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_eviction() {
        let mut cache = LruCache::new(2);

        cache.insert("a", 1);
        cache.insert("b", 2);

        // Access "a" to make it more recent
        cache.get(&"a");

        // Insert "c", should evict "b" (least recently used)
        cache.insert("c", 3);

        assert_eq!(cache.get(&"a"), Some(&1));
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"c"), Some(&3));
    }

    #[test]
    fn test_lru_update_returns_old_value() {
        let mut cache = LruCache::new(2);

        cache.insert("a", 1);
        let old = cache.insert("a", 10);

        assert_eq!(old, Some(1));
        assert_eq!(cache.get(&"a"), Some(&10));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut cache = LruCache::new(0);
        cache.insert("a", 1);
        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_ttl_expiry() {
        let mut cache = TtlLruCache::new(4, Duration::from_secs(60));
        cache.insert("fresh", 1);
        cache.insert_with_ttl("stale", 2, Duration::ZERO);

        assert_eq!(cache.get(&"fresh"), Some(&1));
        assert_eq!(cache.get(&"stale"), None);
        // Expired entry was dropped on read
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_ttl_cleanup() {
        let mut cache = TtlLruCache::new(4, Duration::ZERO);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.cleanup_expired();
        assert!(cache.is_empty());
    }
}
