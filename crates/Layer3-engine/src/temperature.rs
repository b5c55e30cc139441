//! Temperature classification

use sessioncache_foundation::{Temperature, TemperatureConfig};

/// Resolves the placement class of a write.
///
/// Order: explicit override, then the legacy key markers ("current",
/// "active"), then payload size bands.
#[derive(Debug, Clone)]
pub struct TemperatureClassifier {
    hot_max_bytes: usize,
    warm_max_bytes: usize,
    markers: Vec<String>,
    legacy_key_heuristics: bool,
}

impl TemperatureClassifier {
    pub fn new(config: &TemperatureConfig) -> Self {
        Self {
            hot_max_bytes: config.hot_max_bytes,
            warm_max_bytes: config.warm_max_bytes,
            markers: config
                .hot_markers
                .iter()
                .map(|m| m.to_ascii_lowercase())
                .collect(),
            legacy_key_heuristics: config.legacy_key_heuristics,
        }
    }

    pub fn classify(
        &self,
        key: &str,
        size_bytes: usize,
        explicit: Option<Temperature>,
    ) -> Temperature {
        if let Some(temperature) = explicit {
            return temperature;
        }
        if self.legacy_key_heuristics && self.is_marked(key) {
            return Temperature::Hot;
        }
        self.by_size(size_bytes)
    }

    /// Whether `key` carries one of the "current"/"active" markers
    pub fn is_marked(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        self.markers.iter().any(|m| key.contains(m.as_str()))
    }

    pub fn by_size(&self, size_bytes: usize) -> Temperature {
        if size_bytes < self.hot_max_bytes {
            Temperature::Hot
        } else if size_bytes <= self.warm_max_bytes {
            Temperature::Warm
        } else {
            Temperature::Cold
        }
    }
}

impl Default for TemperatureClassifier {
    fn default() -> Self {
        Self::new(&TemperatureConfig::default())
    }
}
