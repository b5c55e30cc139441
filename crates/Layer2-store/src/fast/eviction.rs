//! Hybrid LRU/LFU eviction
//!
//! Eviction triggers when an insert would cross 100% of either bound and then
//! runs down to the lower target (80% by default), so inserts near the
//! boundary do not evict on every call.

use sessioncache_foundation::CacheEntry;
use std::collections::HashMap;

/// Trigger and target bounds for one tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityTarget {
    pub max_bytes: usize,
    pub max_entries: usize,
    pub target_bytes: usize,
    pub target_entries: usize,
}

impl CapacityTarget {
    pub fn new(max_bytes: usize, max_entries: usize, target_ratio: f64) -> Self {
        Self {
            max_bytes,
            max_entries,
            target_bytes: (max_bytes as f64 * target_ratio) as usize,
            target_entries: (max_entries as f64 * target_ratio) as usize,
        }
    }

    /// Whether inserting `new_size` bytes as a new entry must evict first
    pub fn needs_eviction(&self, bytes: usize, entries: usize, new_size: usize) -> bool {
        bytes + new_size > self.max_bytes || entries >= self.max_entries
    }

    /// Whether the tier can take `new_size` bytes and stay under the targets
    pub fn has_headroom(&self, bytes: usize, entries: usize, new_size: usize) -> bool {
        bytes + new_size <= self.target_bytes && entries < self.target_entries
    }
}

/// Keys ordered by ascending retention score (`last_accessed_at × access_count`)
pub(crate) fn eviction_order<V>(entries: &HashMap<String, CacheEntry<V>>) -> Vec<String> {
    let mut scored: Vec<(f64, &String)> = entries
        .iter()
        .map(|(key, entry)| (entry.retention_score(), key))
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(b.1)));
    scored.into_iter().map(|(_, key)| key.clone()).collect()
}

/// Keys ordered by ascending `last_accessed_at`
pub(crate) fn recency_order<V>(entries: &HashMap<String, CacheEntry<V>>) -> Vec<String> {
    let mut ordered: Vec<_> = entries
        .iter()
        .map(|(key, entry)| (entry.last_accessed_at, key))
        .collect();
    ordered.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
    ordered.into_iter().map(|(_, key)| key.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use sessioncache_foundation::{Temperature, TierKind};

    fn entry(key: &str, age_secs: i64, accesses: u64) -> (String, CacheEntry<()>) {
        let at = Utc::now() - Duration::seconds(age_secs);
        let mut e = CacheEntry::new(key, (), 1, Temperature::Hot, TierKind::Fast, at);
        e.access_count = accesses;
        (key.to_string(), e)
    }

    #[test]
    fn test_targets() {
        let target = CapacityTarget::new(1000, 10, 0.8);
        assert_eq!(target.target_bytes, 800);
        assert_eq!(target.target_entries, 8);

        assert!(!target.needs_eviction(900, 5, 100));
        assert!(target.needs_eviction(900, 5, 101));
        assert!(target.needs_eviction(0, 10, 1));

        assert!(target.has_headroom(700, 7, 100));
        assert!(!target.has_headroom(700, 8, 1));
        assert!(!target.has_headroom(701, 0, 100));
    }

    #[test]
    fn test_frequency_outweighs_slight_staleness() {
        let entries: HashMap<_, _> = [
            entry("old-popular", 10, 50),
            entry("new-once", 0, 1),
        ]
        .into_iter()
        .collect();

        let order = eviction_order(&entries);
        assert_eq!(order.first().map(String::as_str), Some("new-once"));

        let order = recency_order(&entries);
        assert_eq!(order.first().map(String::as_str), Some("old-popular"));
    }
}
