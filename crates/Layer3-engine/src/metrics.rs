//! Engine-level metrics

use serde::{Deserialize, Serialize};
use sessioncache_foundation::AccessCounter;
use std::time::Duration;

/// Counters kept by the cache manager
#[derive(Debug, Clone)]
pub struct EngineMetrics {
    access: AccessCounter,
    promotions: u64,
    demotions: u64,
    preloaded: u64,
    remote_fetches: u64,
}

/// Point-in-time copy of [`EngineMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    /// Smoothed `get` latency in milliseconds
    pub avg_latency_ms: f64,
    pub promotions: u64,
    pub demotions: u64,
    pub preloaded: u64,
    pub remote_fetches: u64,
}

impl EngineMetrics {
    pub fn new(latency_alpha: f64) -> Self {
        Self {
            access: AccessCounter::new(latency_alpha),
            promotions: 0,
            demotions: 0,
            preloaded: 0,
            remote_fetches: 0,
        }
    }

    pub fn record_get(&mut self, hit: bool, elapsed: Duration) {
        if hit {
            self.access.record_hit();
        } else {
            self.access.record_miss();
        }
        self.access.record_latency(elapsed);
    }

    pub fn record_promotion(&mut self) {
        self.promotions += 1;
    }

    pub fn record_demotion(&mut self) {
        self.demotions += 1;
    }

    pub fn record_preloaded(&mut self, count: u64) {
        self.preloaded += count;
    }

    pub fn record_remote_fetch(&mut self) {
        self.remote_fetches += 1;
    }

    pub fn hit_rate(&self) -> f64 {
        self.access.hit_rate()
    }

    pub fn requests(&self) -> u64 {
        self.access.requests()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.access.hits(),
            misses: self.access.misses(),
            hit_rate: self.access.hit_rate(),
            avg_latency_ms: self.access.avg_access_ms(),
            promotions: self.promotions,
            demotions: self.demotions,
            preloaded: self.preloaded,
            remote_fetches: self.remote_fetches,
        }
    }

    pub fn reset(&mut self) {
        self.access.reset();
        self.promotions = 0;
        self.demotions = 0;
        self.preloaded = 0;
        self.remote_fetches = 0;
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new(0.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_reset() {
        let mut metrics = EngineMetrics::default();
        metrics.record_get(true, Duration::from_millis(2));
        metrics.record_get(false, Duration::from_millis(2));
        metrics.record_promotion();

        let snap = metrics.snapshot();
        assert_eq!((snap.hits, snap.misses, snap.promotions), (1, 1, 1));
        assert_eq!(snap.hit_rate, 0.5);

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }
}
