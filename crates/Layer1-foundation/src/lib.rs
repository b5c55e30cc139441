//! # sessioncache-foundation
//!
//! Foundation layer for sessioncache:
//! - Entry: `CacheEntry`, temperature, tier and sync enums
//! - Provider: the contract every tier implements
//! - Codec: pluggable payload serialization and size estimation
//! - Search: shared query scoring
//! - Config: `EngineConfig` loaded from TOML
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  CacheManager (Layer3-engine)                           │
//! │     │  temperature, promotion/demotion, preload         │
//! │     ▼                                                   │
//! │  CacheProvider<V>  (this crate)                         │
//! │     │                                                   │
//! │     ├── FastTier        (Layer2-store, in-memory)       │
//! │     ├── PersistentTier  (Layer2-store, SQLite)          │
//! │     └── RemoteTier      (Layer2-remote, read-through)   │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod config;
pub mod entry;
pub mod error;
pub mod provider;
pub mod search;
pub mod stats;
pub mod util;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Entry model
// ============================================================================
pub use entry::{CacheEntry, EntryFacets, SetOptions, SyncStatus, Temperature, TierKind};

// ============================================================================
// Provider contract
// ============================================================================
pub use provider::{BatchItem, CacheProvider, MultiGet};

// ============================================================================
// Codec
// ============================================================================
pub use codec::{
    decode_payload, encode_payload, estimate_size, CacheValue, Codec, EncodedPayload, JsonCodec,
};

// ============================================================================
// Search & stats
// ============================================================================
pub use search::{DateRange, SearchHit, SearchQuery, DEFAULT_SEARCH_LIMIT};
pub use stats::{AccessCounter, ProviderStats};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    EngineConfig, FastTierConfig, MetricsConfig, PersistentTierConfig, PreloadConfig,
    RemoteTierConfig, TemperatureConfig, DEFAULT_CONFIG_FILE, DEFAULT_DB_FILE,
};

// ============================================================================
// Utilities
// ============================================================================
pub use util::{LruCache, TtlLruCache};
