//! SQLite-backed Persistent tier

use super::schema::{self, ENTRY_COLUMNS};
use crate::fast::CapacityTarget;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex as SyncMutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use sessioncache_foundation::search::{rank, score};
use sessioncache_foundation::{
    decode_payload, encode_payload, AccessCounter, BatchItem, CacheEntry, CacheProvider,
    CacheValue, Codec, EntryFacets, Error, JsonCodec, PersistentTierConfig, ProviderStats, Result,
    SearchHit, SearchQuery, SetOptions, SyncStatus, Temperature, TierKind,
};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Byte/entry usage snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PersistentUsage {
    pub bytes: usize,
    pub max_bytes: usize,
    pub entries: usize,
    pub max_entries: usize,
}

/// Rows per stored temperature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TemperatureCounts {
    pub hot: usize,
    pub warm: usize,
    pub cold: usize,
}

impl TemperatureCounts {
    pub fn total(&self) -> usize {
        self.hot + self.warm + self.cold
    }
}

#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

/// Raw `cache_entries` row
struct StoredRow {
    key: String,
    value: Vec<u8>,
    codec: String,
    created_at: i64,
    last_accessed_at: i64,
    access_count: i64,
    temperature: String,
    expires_at: Option<i64>,
    size_bytes: i64,
    owning_tier: String,
    sync_status: String,
    title: Option<String>,
    agent_id: Option<String>,
    timestamp: Option<i64>,
    tags: Option<String>,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            value: row.get(1)?,
            codec: row.get(2)?,
            created_at: row.get(3)?,
            last_accessed_at: row.get(4)?,
            access_count: row.get(5)?,
            temperature: row.get(6)?,
            expires_at: row.get(7)?,
            size_bytes: row.get(8)?,
            owning_tier: row.get(9)?,
            sync_status: row.get(10)?,
            title: row.get(11)?,
            agent_id: row.get(12)?,
            timestamp: row.get(13)?,
            tags: row.get(14)?,
        })
    }

    fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn into_entry<V: CacheValue>(self, codec: &dyn Codec) -> Result<CacheEntry<V>> {
        if self.codec != codec.name() {
            return Err(Error::Serialization(format!(
                "entry {} was written with codec {}, reader uses {}",
                self.key,
                self.codec,
                codec.name()
            )));
        }
        let value = decode_payload(codec, &self.value)?;
        Ok(CacheEntry {
            key: self.key,
            value,
            created_at: from_millis(self.created_at),
            last_accessed_at: from_millis(self.last_accessed_at),
            access_count: self.access_count.max(0) as u64,
            temperature: self.temperature.parse()?,
            expires_at: self.expires_at.map(from_millis),
            size_bytes: self.size_bytes.max(0) as usize,
            owning_tier: self.owning_tier.parse()?,
            sync_status: self.sync_status.parse()?,
            facets: EntryFacets {
                title: self.title,
                agent_id: self.agent_id,
                timestamp: self.timestamp.map(from_millis),
                tags: EntryFacets::parse_tags(self.tags.as_deref()),
            },
        })
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn live(slot: &mut Option<Connection>) -> Result<&mut Connection> {
    slot.as_mut()
        .ok_or_else(|| Error::Unavailable("persistent tier is closed".into()))
}

/// Durable tier backed by SQLite.
///
/// Writes run inside a transaction. Reads are fail-soft: storage and decode
/// errors are logged and reported as misses.
pub struct PersistentTier<V> {
    db: Mutex<Option<Connection>>,
    location: Location,
    target: CapacityTarget,
    soft_cap: usize,
    codec: Arc<dyn Codec>,
    counter: SyncMutex<AccessCounter>,
    _value: PhantomData<fn() -> V>,
}

impl<V: CacheValue> PersistentTier<V> {
    /// Open (or create) the database file at `path`
    pub fn open(path: impl AsRef<Path>, config: &PersistentTierConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Self::connect(&Location::File(path.clone()))?;
        info!(db_path = %path.display(), "Persistent tier opened");
        Ok(Self::from_connection(conn, Location::File(path), config))
    }

    /// Open the database named by the config, or the platform default
    pub fn from_config(config: &PersistentTierConfig) -> Result<Self> {
        Self::open(config.resolved_path()?, config)
    }

    /// Create an in-memory tier (for testing)
    pub fn in_memory(config: &PersistentTierConfig) -> Result<Self> {
        let conn = Self::connect(&Location::Memory)?;
        Ok(Self::from_connection(conn, Location::Memory, config))
    }

    /// Replace the payload codec
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    fn from_connection(
        conn: Connection,
        location: Location,
        config: &PersistentTierConfig,
    ) -> Self {
        Self {
            db: Mutex::new(Some(conn)),
            location,
            target: CapacityTarget::new(
                config.max_bytes,
                config.max_entries,
                config.eviction_target_ratio,
            ),
            soft_cap: (config.max_entries as f64 * config.soft_cap_ratio) as usize,
            codec: Arc::new(JsonCodec),
            counter: SyncMutex::new(AccessCounter::default()),
            _value: PhantomData,
        }
    }

    fn connect(location: &Location) -> Result<Connection> {
        let conn = match location {
            Location::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        Error::Storage(format!("Failed to create data directory: {}", e))
                    })?;
                }
                Connection::open(path)
                    .map_err(|e| Error::Storage(format!("Failed to open database: {}", e)))?
            }
            Location::Memory => Connection::open_in_memory().map_err(|e| {
                Error::Storage(format!("Failed to create in-memory database: {}", e))
            })?,
        };

        schema::configure(&conn, matches!(location, Location::File(_)))?;
        schema::initialize_schema(&conn)?;
        schema::run_migrations(&conn)?;
        Ok(conn)
    }

    pub fn capacity(&self) -> CapacityTarget {
        self.target
    }

    /// Entry count above which `trim_to_soft_cap` removes rows
    pub fn soft_cap(&self) -> usize {
        self.soft_cap
    }

    pub async fn schema_version(&self) -> Result<i32> {
        let mut guard = self.db.lock().await;
        schema::schema_version(live(&mut guard)?)
    }

    /// Store a fully formed entry, keeping its history.
    ///
    /// Used when an entry moves down from the Fast tier or arrives from the
    /// Remote tier.
    pub async fn put_entry(&self, entry: CacheEntry<V>) -> Result<()> {
        let payload = encode_payload(self.codec.as_ref(), &entry.value)?;
        if payload.size() > self.target.max_bytes {
            warn!(
                key = %entry.key,
                size = payload.size(),
                max = self.target.max_bytes,
                "Value exceeds persistent tier budget, not stored"
            );
            return Ok(());
        }

        let mut guard = self.db.lock().await;
        let conn = live(&mut guard)?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Storage(format!("Failed to begin transaction: {}", e)))?;
        self.ensure_capacity_logged(&tx, &entry.key, payload.size());
        Self::write_row(&tx, &entry, self.codec.name(), &payload.bytes)?;
        tx.commit()
            .map_err(|e| Error::Storage(format!("Failed to commit entry: {}", e)))?;
        Ok(())
    }

    /// Bulk-delete expired rows, returning how many were removed
    pub async fn cleanup(&self) -> Result<usize> {
        let mut guard = self.db.lock().await;
        let conn = live(&mut guard)?;
        let removed = conn
            .execute(
                "DELETE FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                params![now_millis()],
            )
            .map_err(|e| Error::Storage(format!("Failed to clean up expired entries: {}", e)))?;
        if removed > 0 {
            info!(removed, "Expired cache entries cleaned up");
        }
        Ok(removed)
    }

    /// Remove least-recently-touched rows until at most `max_entries` remain
    pub async fn trim_to(&self, max_entries: usize) -> Result<usize> {
        let mut guard = self.db.lock().await;
        let conn = live(&mut guard)?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))
            .map_err(|e| Error::Storage(format!("Failed to count entries: {}", e)))?;
        let excess = (count.max(0) as usize).saturating_sub(max_entries);
        if excess == 0 {
            return Ok(0);
        }

        let removed = conn
            .execute(
                r#"
                DELETE FROM cache_entries WHERE key IN (
                    SELECT key FROM cache_entries
                    ORDER BY last_accessed_at ASC
                    LIMIT ?1
                )
                "#,
                params![excess as i64],
            )
            .map_err(|e| Error::Storage(format!("Failed to trim entries: {}", e)))?;
        debug!(removed, max_entries, "Persistent tier trimmed");
        Ok(removed)
    }

    /// `trim_to` the configured soft cap
    pub async fn trim_to_soft_cap(&self) -> Result<usize> {
        self.trim_to(self.soft_cap).await
    }

    pub async fn temperature_counts(&self) -> Result<TemperatureCounts> {
        let mut guard = self.db.lock().await;
        let conn = live(&mut guard)?;
        let mut stmt = conn
            .prepare("SELECT temperature, COUNT(*) FROM cache_entries GROUP BY temperature")
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(|e| Error::Storage(format!("Failed to count temperatures: {}", e)))?;

        let mut counts = TemperatureCounts::default();
        for row in rows {
            let (temperature, count) =
                row.map_err(|e| Error::Storage(format!("Failed to read row: {}", e)))?;
            let count = count.max(0) as usize;
            match temperature.parse::<Temperature>() {
                Ok(Temperature::Hot) => counts.hot += count,
                Ok(Temperature::Warm) => counts.warm += count,
                Ok(Temperature::Cold) => counts.cold += count,
                Err(e) => warn!(error = %e, "Skipping unknown temperature"),
            }
        }
        Ok(counts)
    }

    pub async fn usage(&self) -> Result<PersistentUsage> {
        let mut guard = self.db.lock().await;
        let conn = live(&mut guard)?;
        let (entries, bytes) = Self::totals(conn, None)?;
        Ok(PersistentUsage {
            bytes,
            max_bytes: self.target.max_bytes,
            entries,
            max_entries: self.target.max_entries,
        })
    }

    /// Record a sync outcome for the external sync collaborator
    pub async fn set_sync_status(&self, key: &str, status: SyncStatus) -> Result<bool> {
        let mut guard = self.db.lock().await;
        let conn = live(&mut guard)?;
        let updated = conn
            .execute(
                "UPDATE cache_entries SET sync_status = ?2 WHERE key = ?1",
                params![key, status.as_str()],
            )
            .map_err(|e| Error::Storage(format!("Failed to update sync status: {}", e)))?;
        Ok(updated > 0)
    }

    /// Keys in a given sync state, oldest-touched first
    pub async fn keys_with_sync_status(
        &self,
        status: SyncStatus,
        limit: Option<usize>,
    ) -> Result<Vec<String>> {
        let mut guard = self.db.lock().await;
        let conn = live(&mut guard)?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT key FROM cache_entries
                WHERE sync_status = ?1
                ORDER BY last_accessed_at ASC
                LIMIT ?2
                "#,
            )
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map(params![status.as_str(), sql_limit(limit)], |row| row.get(0))
            .map_err(|e| Error::Storage(format!("Failed to query sync status: {}", e)))?;
        rows.collect::<rusqlite::Result<Vec<String>>>()
            .map_err(|e| Error::Storage(format!("Failed to read row: {}", e)))
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn totals(conn: &Connection, excluding: Option<&str>) -> Result<(usize, usize)> {
        conn.query_row(
            r#"
            SELECT COUNT(*), COALESCE(SUM(size_bytes), 0)
            FROM cache_entries
            WHERE ?1 IS NULL OR key != ?1
            "#,
            params![excluding],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )
        .map(|(count, bytes)| (count.max(0) as usize, bytes.max(0) as usize))
        .map_err(|e| Error::Storage(format!("Failed to read totals: {}", e)))
    }

    /// Evict oldest-touched rows (pure LRU) until `new_size` fits under the
    /// targets. `key` is about to be rewritten and is not counted.
    fn ensure_capacity(&self, conn: &Connection, key: &str, new_size: usize) -> Result<usize> {
        let (mut entries, mut bytes) = Self::totals(conn, Some(key))?;
        if !self.target.needs_eviction(bytes, entries, new_size) {
            return Ok(0);
        }

        let victims = {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT key, size_bytes FROM cache_entries
                    WHERE key != ?1
                    ORDER BY last_accessed_at ASC
                    "#,
                )
                .map_err(|e| Error::Storage(format!("Failed to prepare eviction scan: {}", e)))?;
            let mut rows = stmt
                .query(params![key])
                .map_err(|e| Error::Storage(format!("Failed to scan for eviction: {}", e)))?;

            let mut victims = Vec::new();
            while !self.target.has_headroom(bytes, entries, new_size) {
                let Some(row) = rows
                    .next()
                    .map_err(|e| Error::Storage(format!("Failed to read row: {}", e)))?
                else {
                    break;
                };
                let victim: String = row.get(0)?;
                let size: i64 = row.get(1)?;
                bytes = bytes.saturating_sub(size.max(0) as usize);
                entries = entries.saturating_sub(1);
                victims.push(victim);
            }
            victims
        };

        for victim in &victims {
            conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![victim])
                .map_err(|e| Error::Storage(format!("Failed to evict entry: {}", e)))?;
        }
        debug!(evicted = victims.len(), bytes, entries, "Persistent tier eviction");
        Ok(victims.len())
    }

    /// Eviction failure never aborts the write that triggered it
    fn ensure_capacity_logged(&self, conn: &Connection, key: &str, new_size: usize) {
        if let Err(e) = self.ensure_capacity(conn, key, new_size) {
            warn!(key = %key, error = %e, "Persistent tier eviction failed");
        }
    }

    fn write_row(
        conn: &Connection,
        entry: &CacheEntry<V>,
        codec: &str,
        bytes: &[u8],
    ) -> Result<()> {
        conn.execute(
            r#"
            INSERT INTO cache_entries (
                key, value, codec, created_at, last_accessed_at, access_count,
                temperature, expires_at, size_bytes, owning_tier, sync_status,
                title, agent_id, timestamp, tags
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                codec = excluded.codec,
                created_at = MIN(cache_entries.created_at, excluded.created_at),
                last_accessed_at = excluded.last_accessed_at,
                access_count = excluded.access_count,
                temperature = excluded.temperature,
                expires_at = excluded.expires_at,
                size_bytes = excluded.size_bytes,
                owning_tier = excluded.owning_tier,
                sync_status = excluded.sync_status,
                title = excluded.title,
                agent_id = excluded.agent_id,
                timestamp = excluded.timestamp,
                tags = excluded.tags
            "#,
            params![
                entry.key,
                bytes,
                codec,
                entry.created_at.timestamp_millis(),
                entry.last_accessed_at.timestamp_millis(),
                entry.access_count as i64,
                entry.temperature.as_str(),
                entry.expires_at.map(|at| at.timestamp_millis()),
                bytes.len() as i64,
                TierKind::Persistent.as_str(),
                entry.sync_status.as_str(),
                entry.facets.title,
                entry.facets.agent_id,
                entry.facets.timestamp.map(|at| at.timestamp_millis()),
                entry.facets.tags_json(),
            ],
        )
        .map_err(|e| Error::Storage(format!("Failed to write entry {}: {}", entry.key, e)))?;
        Ok(())
    }

    fn build_entry(
        &self,
        key: &str,
        value: V,
        options: &SetOptions,
    ) -> Result<(CacheEntry<V>, Vec<u8>)> {
        let payload = encode_payload(self.codec.as_ref(), &value)?;
        let now = Utc::now();
        let entry = CacheEntry::new(
            key,
            value,
            payload.size(),
            options.temperature.unwrap_or(Temperature::Warm),
            TierKind::Persistent,
            now,
        )
        .with_expiry(options.resolve_expiry(now))
        .with_facets(EntryFacets::from_payload(&payload.json));
        Ok((entry, payload.bytes))
    }

    async fn lookup(&self, key: &str) -> Result<Option<CacheEntry<V>>> {
        let mut guard = self.db.lock().await;
        let conn = live(&mut guard)?;

        let sql = format!("SELECT {} FROM cache_entries WHERE key = ?1", ENTRY_COLUMNS);
        let row = conn
            .query_row(&sql, params![key], StoredRow::from_row)
            .optional()
            .map_err(|e| Error::Storage(format!("Failed to read entry: {}", e)))?;
        let Some(row) = row else {
            return Ok(None);
        };

        let now = now_millis();
        if row.is_expired_at(now) {
            debug!(key = %key, "Persistent tier entry expired");
            conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])
                .map_err(|e| Error::Storage(format!("Failed to purge expired entry: {}", e)))?;
            return Ok(None);
        }

        let mut entry: CacheEntry<V> = row.into_entry(self.codec.as_ref())?;
        conn.execute(
            r#"
            UPDATE cache_entries
            SET last_accessed_at = ?2, access_count = access_count + 1
            WHERE key = ?1
            "#,
            params![key, now],
        )
        .map_err(|e| Error::Storage(format!("Failed to record access: {}", e)))?;
        entry.touch(from_millis(now));
        Ok(Some(entry))
    }

    async fn try_list(&self, prefix: &str, limit: Option<usize>) -> Result<Vec<String>> {
        let mut guard = self.db.lock().await;
        let conn = live(&mut guard)?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT key FROM cache_entries
                WHERE substr(key, 1, length(?1)) = ?1
                  AND (expires_at IS NULL OR expires_at > ?2)
                ORDER BY key ASC
                LIMIT ?3
                "#,
            )
            .map_err(|e| Error::Storage(format!("Failed to prepare list: {}", e)))?;
        let rows = stmt
            .query_map(params![prefix, now_millis(), sql_limit(limit)], |row| row.get(0))
            .map_err(|e| Error::Storage(format!("Failed to list keys: {}", e)))?;
        rows.collect::<rusqlite::Result<Vec<String>>>()
            .map_err(|e| Error::Storage(format!("Failed to read row: {}", e)))
    }

    async fn try_search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        let mut guard = self.db.lock().await;
        let conn = live(&mut guard)?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT key, title, agent_id, timestamp, tags FROM cache_entries
                WHERE expires_at IS NULL OR expires_at > ?1
                "#,
            )
            .map_err(|e| Error::Storage(format!("Failed to prepare search: {}", e)))?;
        let rows = stmt
            .query_map(params![now_millis()], |row| {
                let key: String = row.get(0)?;
                let tags: Option<String> = row.get(4)?;
                let facets = EntryFacets {
                    title: row.get(1)?,
                    agent_id: row.get(2)?,
                    timestamp: row.get::<_, Option<i64>>(3)?.map(from_millis),
                    tags: EntryFacets::parse_tags(tags.as_deref()),
                };
                Ok((key, facets))
            })
            .map_err(|e| Error::Storage(format!("Failed to search: {}", e)))?;

        let mut hits = Vec::new();
        for row in rows {
            let (key, facets) =
                row.map_err(|e| Error::Storage(format!("Failed to read row: {}", e)))?;
            hits.push(SearchHit {
                score: score(query, &key, &facets),
                key,
                tier: TierKind::Persistent,
            });
        }
        Ok(rank(hits, query.effective_limit()))
    }

    async fn try_stats(&self) -> Result<ProviderStats> {
        let mut guard = self.db.lock().await;
        let conn = live(&mut guard)?;
        let (count, bytes, oldest, newest) = conn
            .query_row(
                r#"
                SELECT COUNT(*), COALESCE(SUM(size_bytes), 0), MIN(created_at), MAX(created_at)
                FROM cache_entries
                "#,
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                    ))
                },
            )
            .map_err(|e| Error::Storage(format!("Failed to read stats: {}", e)))?;

        let counter = self.counter.lock();
        Ok(ProviderStats {
            total_entries: count.max(0) as usize,
            total_size: bytes.max(0) as usize,
            hit_count: counter.hits(),
            miss_count: counter.misses(),
            hit_rate: counter.hit_rate(),
            avg_access_time: counter.avg_access_ms(),
            oldest_entry: oldest.map(from_millis),
            newest_entry: newest.map(from_millis),
        })
    }

    async fn try_exists(&self, key: &str) -> Result<bool> {
        let mut guard = self.db.lock().await;
        let conn = live(&mut guard)?;
        conn.query_row(
            r#"
            SELECT 1 FROM cache_entries
            WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)
            "#,
            params![key, now_millis()],
            |_| Ok(()),
        )
        .optional()
        .map(|found| found.is_some())
        .map_err(|e| Error::Storage(format!("Failed to check entry: {}", e)))
    }
}

/// SQLite treats a negative LIMIT as "no limit"
fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map(|l| l as i64).unwrap_or(-1)
}

#[async_trait]
impl<V: CacheValue> CacheProvider<V> for PersistentTier<V> {
    fn tier(&self) -> TierKind {
        TierKind::Persistent
    }

    async fn init(&self) -> Result<()> {
        let mut guard = self.db.lock().await;
        if guard.is_none() {
            *guard = Some(Self::connect(&self.location)?);
            debug!("Persistent tier reopened");
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        let mut guard = self.db.lock().await;
        if let Some(conn) = guard.take() {
            conn.close()
                .map_err(|(_, e)| Error::Storage(format!("Failed to close database: {}", e)))?;
        }
        Ok(())
    }

    async fn is_available(&self) -> bool {
        self.db.lock().await.is_some()
    }

    async fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        let started = Instant::now();
        let result = match self.lookup(key).await {
            Ok(found) => found,
            Err(e) => {
                warn!(key = %key, error = %e, "Persistent tier read failed, treating as miss");
                None
            }
        };

        let mut counter = self.counter.lock();
        if result.is_some() {
            counter.record_hit();
        } else {
            counter.record_miss();
        }
        counter.record_latency(started.elapsed());
        result
    }

    async fn set(&self, key: &str, value: V, options: &SetOptions) -> Result<()> {
        let (entry, bytes) = self.build_entry(key, value, options)?;
        if entry.size_bytes > self.target.max_bytes {
            warn!(
                key = %key,
                size = entry.size_bytes,
                max = self.target.max_bytes,
                "Value exceeds persistent tier budget, not stored"
            );
            return Ok(());
        }

        let mut guard = self.db.lock().await;
        let conn = live(&mut guard)?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Storage(format!("Failed to begin transaction: {}", e)))?;
        self.ensure_capacity_logged(&tx, key, entry.size_bytes);
        Self::write_row(&tx, &entry, self.codec.name(), &bytes)?;
        tx.commit()
            .map_err(|e| Error::Storage(format!("Failed to commit entry: {}", e)))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut guard = self.db.lock().await;
        let conn = live(&mut guard)?;
        let removed = conn
            .execute("DELETE FROM cache_entries WHERE key = ?1", params![key])
            .map_err(|e| Error::Storage(format!("Failed to delete entry: {}", e)))?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> bool {
        self.try_exists(key).await.unwrap_or_else(|e| {
            warn!(key = %key, error = %e, "Persistent tier exists check failed");
            false
        })
    }

    async fn clear(&self) -> Result<()> {
        let mut guard = self.db.lock().await;
        let conn = live(&mut guard)?;
        conn.execute("DELETE FROM cache_entries", [])
            .map_err(|e| Error::Storage(format!("Failed to clear entries: {}", e)))?;
        Ok(())
    }

    async fn mset(&self, items: Vec<BatchItem<V>>) -> Result<()> {
        let mut prepared = Vec::with_capacity(items.len());
        for item in items {
            let (entry, bytes) = self.build_entry(&item.key, item.value, &item.options)?;
            if entry.size_bytes > self.target.max_bytes {
                warn!(
                    key = %entry.key,
                    size = entry.size_bytes,
                    "Value exceeds persistent tier budget, not stored"
                );
                continue;
            }
            prepared.push((entry, bytes));
        }

        let mut guard = self.db.lock().await;
        let conn = live(&mut guard)?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Storage(format!("Failed to begin transaction: {}", e)))?;
        for (entry, bytes) in &prepared {
            self.ensure_capacity_logged(&tx, &entry.key, entry.size_bytes);
            Self::write_row(&tx, entry, self.codec.name(), bytes)?;
        }
        tx.commit()
            .map_err(|e| Error::Storage(format!("Failed to commit batch: {}", e)))?;
        Ok(())
    }

    async fn mdelete(&self, keys: &[String]) -> Result<bool> {
        let mut guard = self.db.lock().await;
        let conn = live(&mut guard)?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Storage(format!("Failed to begin transaction: {}", e)))?;
        let mut removed = 0;
        for key in keys {
            removed += tx
                .execute("DELETE FROM cache_entries WHERE key = ?1", params![key])
                .map_err(|e| Error::Storage(format!("Failed to delete entry: {}", e)))?;
        }
        tx.commit()
            .map_err(|e| Error::Storage(format!("Failed to commit batch delete: {}", e)))?;
        Ok(removed > 0)
    }

    async fn list(&self, prefix: &str, limit: Option<usize>) -> Vec<String> {
        self.try_list(prefix, limit).await.unwrap_or_else(|e| {
            warn!(prefix = %prefix, error = %e, "Persistent tier list failed");
            Vec::new()
        })
    }

    async fn search(&self, query: &SearchQuery) -> Vec<SearchHit> {
        self.try_search(query).await.unwrap_or_else(|e| {
            warn!(error = %e, "Persistent tier search failed");
            Vec::new()
        })
    }

    async fn get_stats(&self) -> ProviderStats {
        self.try_stats().await.unwrap_or_else(|e| {
            warn!(error = %e, "Persistent tier stats failed");
            ProviderStats::default()
        })
    }
}
