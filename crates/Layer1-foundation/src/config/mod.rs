//! Config - engine configuration
//!
//! - `engine.rs` - EngineConfig and per-tier sections

mod engine;

pub use engine::{
    EngineConfig, FastTierConfig, MetricsConfig, PersistentTierConfig, PreloadConfig,
    RemoteTierConfig, TemperatureConfig, DEFAULT_CONFIG_FILE, DEFAULT_DB_FILE,
};
