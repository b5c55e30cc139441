//! Entry model
//!
//! - `types.rs` - CacheEntry, Temperature, SyncStatus, TierKind, SetOptions
//! - `facets.rs` - searchable attributes extracted from payloads

mod facets;
mod types;

pub use facets::EntryFacets;
pub use types::{CacheEntry, SetOptions, SyncStatus, Temperature, TierKind};
