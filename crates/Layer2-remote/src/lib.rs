//! # sessioncache-remote
//!
//! Read-through tier over an external conversation-history service.
//!
//! - `client`: `HistoryTransport` contract and its reqwest implementation
//! - `retry`: exponential backoff
//! - `tier`: `RemoteTier`, the read-only `CacheProvider`
//!
//! The remote service is the system of record; this crate never writes to it.

pub mod client;
pub mod error;
pub mod retry;
pub mod tier;

pub use client::{ConversationSummary, HistoryTransport, HttpHistoryTransport};
pub use error::RemoteError;
pub use retry::{with_retry, RetryClassification, RetryPolicy, RetryableError};
pub use tier::{conversation_id, RemoteTier, DEFAULT_KEY_PREFIX};
