//! Persistent tier - durable, indexed, transactional
//!
//! - `schema.rs` - table layout and versioned migrations
//! - `store.rs` - PersistentTier and its provider implementation

mod schema;
mod store;

pub use schema::CURRENT_SCHEMA_VERSION;
pub use store::{PersistentTier, PersistentUsage, TemperatureCounts};
