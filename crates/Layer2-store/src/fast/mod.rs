//! Fast tier - volatile, size- and count-bounded
//!
//! - `store.rs` - FastTier and its provider implementation
//! - `eviction.rs` - capacity targets and eviction ordering

mod eviction;
mod store;

pub use eviction::CapacityTarget;
pub use store::{FastTier, FastUsage};
