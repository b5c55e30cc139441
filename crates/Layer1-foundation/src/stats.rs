//! Per-tier statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Snapshot returned by `CacheProvider::get_stats`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderStats {
    pub total_entries: usize,
    pub total_size: usize,
    pub hit_count: u64,
    pub miss_count: u64,
    pub hit_rate: f64,
    /// Smoothed access time in milliseconds
    pub avg_access_time: f64,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

/// Hit/miss counter with an exponentially smoothed access time
#[derive(Debug, Clone)]
pub struct AccessCounter {
    hits: u64,
    misses: u64,
    avg_access_ms: f64,
    samples: u64,
    alpha: f64,
}

impl Default for AccessCounter {
    fn default() -> Self {
        Self::new(0.1)
    }
}

impl AccessCounter {
    pub fn new(alpha: f64) -> Self {
        Self {
            hits: 0,
            misses: 0,
            avg_access_ms: 0.0,
            samples: 0,
            alpha,
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    /// Fold one latency sample into the moving average
    pub fn record_latency(&mut self, elapsed: Duration) {
        let sample = elapsed.as_secs_f64() * 1000.0;
        self.avg_access_ms = if self.samples == 0 {
            sample
        } else {
            self.alpha * sample + (1.0 - self.alpha) * self.avg_access_ms
        };
        self.samples += 1;
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn requests(&self) -> u64 {
        self.hits + self.misses
    }

    #[inline]
    pub fn hit_rate(&self) -> f64 {
        let total = self.requests();
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }

    pub fn avg_access_ms(&self) -> f64 {
        self.avg_access_ms
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.alpha);
    }
}
