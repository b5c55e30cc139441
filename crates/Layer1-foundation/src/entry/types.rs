//! Cache entry and its classification enums

use super::facets::EntryFacets;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Placement class of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Temperature {
    /// Fast + Persistent
    Hot,
    /// Persistent, Fast when there is headroom
    Warm,
    /// Persistent only
    Cold,
}

impl Temperature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Temperature::Hot => "HOT",
            Temperature::Warm => "WARM",
            Temperature::Cold => "COLD",
        }
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Temperature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "HOT" => Ok(Temperature::Hot),
            "WARM" => Ok(Temperature::Warm),
            "COLD" => Ok(Temperature::Cold),
            other => Err(Error::InvalidInput(format!("unknown temperature: {}", other))),
        }
    }
}

/// Synchronisation state relative to the remote system of record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncStatus {
    Synced,
    Pending,
    Conflict,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "SYNCED",
            SyncStatus::Pending => "PENDING",
            SyncStatus::Conflict => "CONFLICT",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SYNCED" => Ok(SyncStatus::Synced),
            "PENDING" => Ok(SyncStatus::Pending),
            "CONFLICT" => Ok(SyncStatus::Conflict),
            other => Err(Error::InvalidInput(format!("unknown sync status: {}", other))),
        }
    }
}

/// Backing store an entry lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    Fast,
    Persistent,
    Remote,
}

impl TierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::Fast => "fast",
            TierKind::Persistent => "persistent",
            TierKind::Remote => "remote",
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TierKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fast" => Ok(TierKind::Fast),
            "persistent" => Ok(TierKind::Persistent),
            "remote" => Ok(TierKind::Remote),
            other => Err(Error::InvalidInput(format!("unknown tier: {}", other))),
        }
    }
}

/// A cached value together with its bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    pub temperature: Temperature,
    pub expires_at: Option<DateTime<Utc>>,
    pub size_bytes: usize,
    pub owning_tier: TierKind,
    pub sync_status: SyncStatus,
    #[serde(default)]
    pub facets: EntryFacets,
}

impl<V> CacheEntry<V> {
    /// Fresh entry as produced by a successful local write
    pub fn new(
        key: impl Into<String>,
        value: V,
        size_bytes: usize,
        temperature: Temperature,
        owning_tier: TierKind,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            created_at: now,
            last_accessed_at: now,
            access_count: 1,
            temperature,
            expires_at: None,
            size_bytes,
            owning_tier,
            sync_status: SyncStatus::Synced,
            facets: EntryFacets::default(),
        }
    }

    pub fn with_expiry(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }

    pub fn with_facets(mut self, facets: EntryFacets) -> Self {
        self.facets = facets;
        self
    }

    /// Expired entries are never returned by a read
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Recency × frequency score; lowest is evicted first
    pub fn retention_score(&self) -> f64 {
        self.last_accessed_at.timestamp_millis() as f64 * self.access_count as f64
    }

    /// Record a read hit
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_accessed_at = now;
        self.access_count = self.access_count.saturating_add(1);
    }

    /// Re-home the entry in another tier, keeping its history
    pub fn moved_to(mut self, tier: TierKind, temperature: Temperature) -> Self {
        self.owning_tier = tier;
        self.temperature = temperature;
        self
    }
}

/// Per-write options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetOptions {
    /// Explicit placement; skips classification
    pub temperature: Option<Temperature>,
    /// Absolute expiry
    pub expires_at: Option<DateTime<Utc>>,
    /// Relative expiry, used when `expires_at` is absent
    pub ttl: Option<Duration>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn temperature(mut self, temperature: Temperature) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Whether the caller specified any expiry
    pub fn has_expiry(&self) -> bool {
        self.expires_at.is_some() || self.ttl.is_some()
    }

    /// Absolute expiry for a write happening at `now`
    pub fn resolve_expiry(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expires_at.or_else(|| {
            self.ttl
                .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
                .map(|ttl| now + ttl)
        })
    }
}
