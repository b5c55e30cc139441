//! Engine configuration
//!
//! Every knob has a serde default function so a partial TOML file only needs
//! to name the values it overrides.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file name looked up by the CLI
pub const DEFAULT_CONFIG_FILE: &str = "sessioncache.toml";

/// Default SQLite file name inside the data directory
pub const DEFAULT_DB_FILE: &str = "cache.db";

const KIB: usize = 1024;
const MIB: usize = 1024 * 1024;

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fast (volatile) tier
    #[serde(default)]
    pub fast: FastTierConfig,

    /// Persistent (SQLite) tier
    #[serde(default)]
    pub persistent: PersistentTierConfig,

    /// Remote read-through tier
    #[serde(default)]
    pub remote: RemoteTierConfig,

    /// Temperature classification
    #[serde(default)]
    pub temperature: TemperatureConfig,

    /// Preloading
    #[serde(default)]
    pub preload: PreloadConfig,

    /// Metrics and maintenance thresholds
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// TTL applied to writes that carry no explicit expiry (seconds, 0 = none)
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
}

/// Fast tier limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FastTierConfig {
    /// Maximum resident bytes
    #[serde(default = "default_fast_max_bytes")]
    pub max_bytes: usize,

    /// Maximum resident entries
    #[serde(default = "default_fast_max_entries")]
    pub max_entries: usize,

    /// Fraction of both limits that eviction drains down to
    #[serde(default = "default_eviction_target")]
    pub eviction_target_ratio: f64,
}

/// Persistent tier limits and location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentTierConfig {
    /// Database file; defaults to `<data_local_dir>/sessioncache/cache.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Maximum stored payload bytes
    #[serde(default = "default_persistent_max_bytes")]
    pub max_bytes: usize,

    /// Maximum stored entries
    #[serde(default = "default_persistent_max_entries")]
    pub max_entries: usize,

    /// Fraction of both limits that eviction drains down to
    #[serde(default = "default_eviction_target")]
    pub eviction_target_ratio: f64,

    /// Fraction of `max_entries` kept by `optimize()`
    #[serde(default = "default_soft_cap_ratio")]
    pub soft_cap_ratio: f64,
}

/// Remote history service adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteTierConfig {
    /// Whether the manager wires a remote tier at all
    #[serde(default)]
    pub enabled: bool,

    /// Base URL of the conversation-history service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Bearer token sent with every request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Per-request timeout (seconds)
    #[serde(default = "default_remote_timeout_secs")]
    pub timeout_secs: u64,

    /// Total attempts per request, first try included
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Delay before the second attempt; doubles afterwards (milliseconds)
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Spread retry delays by ±20%
    #[serde(default)]
    pub retry_jitter: bool,

    /// Request cache TTL (seconds)
    #[serde(default = "default_request_cache_ttl_secs")]
    pub request_cache_ttl_secs: u64,

    /// Request cache capacity
    #[serde(default = "default_request_cache_entries")]
    pub request_cache_entries: usize,

    /// Page size used for the summary listing
    #[serde(default = "default_summary_limit")]
    pub summary_limit: usize,

    /// Bytes assumed per remote message when estimating size
    #[serde(default = "default_avg_message_bytes")]
    pub avg_message_bytes: usize,
}

/// Temperature classification thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemperatureConfig {
    /// Payloads strictly below this size are HOT
    #[serde(default = "default_hot_max_bytes")]
    pub hot_max_bytes: usize,

    /// Payloads up to this size are WARM, larger ones COLD
    #[serde(default = "default_warm_max_bytes")]
    pub warm_max_bytes: usize,

    /// Key substrings that mark a key as HOT
    #[serde(default = "default_hot_markers")]
    pub hot_markers: Vec<String>,

    /// Honour `hot_markers`; set to false once callers tag writes explicitly
    #[serde(default = "default_true")]
    pub legacy_key_heuristics: bool,
}

/// Preloading behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreloadConfig {
    /// Preload siblings of a key after a miss
    #[serde(default = "default_true")]
    pub preload_on_miss: bool,

    /// Key prefixes whose siblings are preloaded
    #[serde(default = "default_related_prefixes")]
    pub related_prefixes: Vec<String>,

    /// Maximum siblings fetched per related preload
    #[serde(default = "default_related_limit")]
    pub related_limit: usize,

    /// Visited-key set size before it is cleared
    #[serde(default = "default_visited_cap")]
    pub visited_cap: usize,

    /// Keys waiting for a running pass beyond this are dropped
    #[serde(default = "default_preload_queue_cap")]
    pub queue_cap: usize,
}

/// Metrics smoothing and maintenance thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Exponential smoothing factor for access latency
    #[serde(default = "default_latency_alpha")]
    pub latency_alpha: f64,

    /// Hit rate below which `optimize()` raises an operator signal
    #[serde(default = "default_low_hit_rate")]
    pub low_hit_rate_threshold: f64,

    /// Fast tier byte utilisation that triggers rebalancing
    #[serde(default = "default_rebalance_threshold")]
    pub rebalance_threshold: f64,

    /// Fraction of Fast tier entries demoted per rebalance
    #[serde(default = "default_rebalance_fraction")]
    pub rebalance_fraction: f64,
}

// Default value functions
fn default_ttl_secs() -> u64 {
    24 * 60 * 60
}
fn default_fast_max_bytes() -> usize {
    50 * MIB
}
fn default_fast_max_entries() -> usize {
    1000
}
fn default_eviction_target() -> f64 {
    0.8
}
fn default_persistent_max_bytes() -> usize {
    100 * MIB
}
fn default_persistent_max_entries() -> usize {
    10_000
}
fn default_soft_cap_ratio() -> f64 {
    0.9
}
fn default_remote_timeout_secs() -> u64 {
    30
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}
fn default_request_cache_ttl_secs() -> u64 {
    300
} // 5 minutes
fn default_request_cache_entries() -> usize {
    256
}
fn default_summary_limit() -> usize {
    100
}
fn default_avg_message_bytes() -> usize {
    512
}
fn default_hot_max_bytes() -> usize {
    10 * KIB
}
fn default_warm_max_bytes() -> usize {
    100 * KIB
}
fn default_hot_markers() -> Vec<String> {
    vec!["current".to_string(), "active".to_string()]
}
fn default_true() -> bool {
    true
}
fn default_related_prefixes() -> Vec<String> {
    vec!["session:".to_string()]
}
fn default_related_limit() -> usize {
    10
}
fn default_visited_cap() -> usize {
    1000
}
fn default_preload_queue_cap() -> usize {
    1000
}
fn default_latency_alpha() -> f64 {
    0.1
}
fn default_low_hit_rate() -> f64 {
    0.7
}
fn default_rebalance_threshold() -> f64 {
    0.8
}
fn default_rebalance_fraction() -> f64 {
    0.2
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fast: FastTierConfig::default(),
            persistent: PersistentTierConfig::default(),
            remote: RemoteTierConfig::default(),
            temperature: TemperatureConfig::default(),
            preload: PreloadConfig::default(),
            metrics: MetricsConfig::default(),
            default_ttl_secs: default_ttl_secs(),
        }
    }
}

impl Default for FastTierConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_fast_max_bytes(),
            max_entries: default_fast_max_entries(),
            eviction_target_ratio: default_eviction_target(),
        }
    }
}

impl Default for PersistentTierConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_bytes: default_persistent_max_bytes(),
            max_entries: default_persistent_max_entries(),
            eviction_target_ratio: default_eviction_target(),
            soft_cap_ratio: default_soft_cap_ratio(),
        }
    }
}

impl Default for RemoteTierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: None,
            api_key: None,
            timeout_secs: default_remote_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_jitter: false,
            request_cache_ttl_secs: default_request_cache_ttl_secs(),
            request_cache_entries: default_request_cache_entries(),
            summary_limit: default_summary_limit(),
            avg_message_bytes: default_avg_message_bytes(),
        }
    }
}

impl Default for TemperatureConfig {
    fn default() -> Self {
        Self {
            hot_max_bytes: default_hot_max_bytes(),
            warm_max_bytes: default_warm_max_bytes(),
            hot_markers: default_hot_markers(),
            legacy_key_heuristics: true,
        }
    }
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            preload_on_miss: true,
            related_prefixes: default_related_prefixes(),
            related_limit: default_related_limit(),
            visited_cap: default_visited_cap(),
            queue_cap: default_preload_queue_cap(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            latency_alpha: default_latency_alpha(),
            low_hit_rate_threshold: default_low_hit_rate(),
            rebalance_threshold: default_rebalance_threshold(),
            rebalance_fraction: default_rebalance_fraction(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Load configuration if the file exists, defaults otherwise
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Small limits for tests and resource-constrained hosts
    pub fn minimal() -> Self {
        Self {
            fast: FastTierConfig {
                max_bytes: 64 * KIB,
                max_entries: 64,
                eviction_target_ratio: default_eviction_target(),
            },
            persistent: PersistentTierConfig {
                path: None,
                max_bytes: MIB,
                max_entries: 512,
                eviction_target_ratio: default_eviction_target(),
                soft_cap_ratio: default_soft_cap_ratio(),
            },
            ..Default::default()
        }
    }

    /// TTL applied to writes without an explicit expiry
    pub fn default_ttl(&self) -> Option<Duration> {
        (self.default_ttl_secs > 0).then(|| Duration::from_secs(self.default_ttl_secs))
    }

    /// Reject limits the engine cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.fast.max_bytes == 0 || self.fast.max_entries == 0 {
            return Err(Error::Config("fast tier limits must be non-zero".into()));
        }
        if self.persistent.max_bytes == 0 || self.persistent.max_entries == 0 {
            return Err(Error::Config("persistent tier limits must be non-zero".into()));
        }
        for (name, ratio) in [
            ("fast.eviction_target_ratio", self.fast.eviction_target_ratio),
            ("persistent.eviction_target_ratio", self.persistent.eviction_target_ratio),
            ("persistent.soft_cap_ratio", self.persistent.soft_cap_ratio),
            ("metrics.latency_alpha", self.metrics.latency_alpha),
            ("metrics.rebalance_threshold", self.metrics.rebalance_threshold),
            ("metrics.rebalance_fraction", self.metrics.rebalance_fraction),
        ] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(Error::Config(format!("{} must be in (0, 1], got {}", name, ratio)));
            }
        }
        if self.temperature.hot_max_bytes > self.temperature.warm_max_bytes {
            return Err(Error::Config(
                "temperature.hot_max_bytes must not exceed warm_max_bytes".into(),
            ));
        }
        if self.remote.enabled && self.remote.base_url.is_none() {
            return Err(Error::Config("remote.enabled requires remote.base_url".into()));
        }
        if self.remote.retry_attempts == 0 {
            return Err(Error::Config("remote.retry_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

impl PersistentTierConfig {
    /// Database path, falling back to the platform data directory
    pub fn resolved_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        let dir = dirs::data_local_dir()
            .ok_or_else(|| Error::Config("Cannot find data directory".to_string()))?
            .join("sessioncache");
        Ok(dir.join(DEFAULT_DB_FILE))
    }
}

impl RemoteTierConfig {
    /// Per-request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Base retry delay as Duration
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Request cache TTL as Duration
    pub fn request_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.request_cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.fast.max_bytes, 50 * 1024 * 1024);
        assert_eq!(config.fast.max_entries, 1000);
        assert_eq!(config.persistent.max_bytes, 100 * 1024 * 1024);
        assert_eq!(config.persistent.max_entries, 10_000);
        assert_eq!(config.default_ttl(), Some(Duration::from_secs(86_400)));
        assert_eq!(config.remote.timeout(), Duration::from_secs(30));
        assert_eq!(config.remote.retry_attempts, 3);
        assert_eq!(config.remote.retry_base_delay(), Duration::from_millis(1000));
        assert_eq!(config.remote.request_cache_ttl(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            default_ttl_secs = 0

            [fast]
            max_entries = 10

            [temperature]
            legacy_key_heuristics = false
            "#,
        )
        .unwrap();

        assert_eq!(config.fast.max_entries, 10);
        assert_eq!(config.fast.max_bytes, 50 * 1024 * 1024);
        assert_eq!(config.default_ttl(), None);
        assert!(!config.temperature.legacy_key_heuristics);
        assert_eq!(config.temperature.hot_markers, vec!["current", "active"]);
    }

    #[test]
    fn test_invalid_ratio_rejected() {
        let result = EngineConfig::from_toml_str(
            r#"
            [fast]
            eviction_target_ratio = 1.5
            "#,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_remote_requires_base_url() {
        let result = EngineConfig::from_toml_str(
            r#"
            [remote]
            enabled = true
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "[persistent]\nmax_entries = 42\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.persistent.max_entries, 42);

        let missing = EngineConfig::load_or_default(dir.path().join("missing.toml")).unwrap();
        assert_eq!(missing.persistent.max_entries, 10_000);
    }

    #[test]
    fn test_explicit_persistent_path() {
        let config = PersistentTierConfig {
            path: Some(PathBuf::from("/tmp/x.db")),
            ..Default::default()
        };
        assert_eq!(config.resolved_path().unwrap(), PathBuf::from("/tmp/x.db"));
    }
}
