//! Aggregate usage report

use serde::{Deserialize, Serialize};

/// Byte/entry usage of one tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TierUsage {
    pub bytes: usize,
    pub max_bytes: usize,
    pub entries: usize,
    pub max_entries: usize,
    /// `bytes / max_bytes × 100`
    pub percent: f64,
}

impl TierUsage {
    pub fn new(bytes: usize, max_bytes: usize, entries: usize, max_entries: usize) -> Self {
        let percent = if max_bytes == 0 {
            0.0
        } else {
            bytes as f64 / max_bytes as f64 * 100.0
        };
        Self {
            bytes,
            max_bytes,
            entries,
            max_entries,
            percent,
        }
    }
}

/// Estimated entry count per temperature
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemperatureDistribution {
    pub hot: usize,
    pub warm: usize,
    pub cold: usize,
}

/// Result of `CacheManager::get_usage_stats`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub fast: TierUsage,
    pub persistent: TierUsage,
    pub distribution: TemperatureDistribution,
    pub hit_rate: f64,
}

/// Result of `CacheManager::optimize`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizeReport {
    /// Hit rate fell below the configured threshold
    pub low_hit_rate: bool,
    /// Persistent rows removed above the soft cap
    pub persistent_trimmed: usize,
    /// Fast tier entries demoted by rebalancing
    pub demoted: usize,
    /// Expired rows removed
    pub expired_removed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        assert_eq!(TierUsage::new(25, 100, 1, 10).percent, 25.0);
        assert_eq!(TierUsage::new(25, 0, 1, 10).percent, 0.0);
    }
}
