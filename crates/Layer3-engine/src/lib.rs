//! # sessioncache-engine
//!
//! Cache manager over the Fast, Persistent and Remote tiers:
//! - `manager`: `CacheManager`, placement and tier movement
//! - `temperature`: HOT/WARM/COLD classification
//! - `preload`: preload scheduling
//! - `metrics` / `usage`: hit rate, latency and capacity reporting

pub mod manager;
pub mod metrics;
pub mod preload;
pub mod temperature;
pub mod usage;

pub use manager::{CacheManager, CacheManagerBuilder, DynRemoteTier};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use preload::{PassGuard, PreloadCandidate, Preloader};
pub use temperature::TemperatureClassifier;
pub use usage::{OptimizeReport, TemperatureDistribution, TierUsage, UsageStats};

pub use sessioncache_foundation::{
    BatchItem, CacheEntry, EngineConfig, Error, Result, SearchHit, SearchQuery, SetOptions,
    Temperature, TierKind,
};
