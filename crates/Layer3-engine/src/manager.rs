//! Cache manager
//!
//! The only component the application talks to. Owns the tiers, decides
//! placement by temperature and moves entries between tiers.
//!
//! ```text
//! get ──► Fast ──miss──► Persistent ──hit──► promote into Fast
//!                             │ miss
//!                             ▼
//!                  preload_related(key)      (get_history: Remote read-through)
//! ```
//!
//! A promoting read suspends between the Persistent read and the Fast write,
//! so a concurrent `delete` of the same key can be undone by the promotion.
//! Callers needing per-key atomicity must serialize externally.

use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::preload::{PassGuard, Preloader};
use crate::temperature::TemperatureClassifier;
use crate::usage::{OptimizeReport, TemperatureDistribution, TierUsage, UsageStats};
use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use sessioncache_foundation::{
    BatchItem, CacheEntry, CacheProvider, CacheValue, EngineConfig, Result, SearchHit,
    SearchQuery, SetOptions, Temperature, TierKind,
};
use sessioncache_remote::{HistoryTransport, HttpHistoryTransport, RemoteTier};
use sessioncache_store::{FastTier, PersistentTier, TemperatureCounts};
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Remote tier with its transport erased
pub type DynRemoteTier<V> = RemoteTier<V, Box<dyn HistoryTransport>>;

/// Builder for [`CacheManager`]
pub struct CacheManagerBuilder<V> {
    config: EngineConfig,
    persistent: Option<PersistentTier<V>>,
    transport: Option<Box<dyn HistoryTransport>>,
    in_memory: bool,
}

impl<V: CacheValue> CacheManagerBuilder<V> {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an already opened Persistent tier
    pub fn persistent(mut self, tier: PersistentTier<V>) -> Self {
        self.persistent = Some(tier);
        self
    }

    /// Keep the Persistent tier in memory (tests, ephemeral sessions)
    pub fn in_memory(mut self) -> Self {
        self.in_memory = true;
        self
    }

    /// Enable the Remote tier over `transport`
    pub fn remote(mut self, transport: impl HistoryTransport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    pub fn build(self) -> Result<CacheManager<V>> {
        let config = self.config;
        config.validate()?;

        let persistent = match self.persistent {
            Some(tier) => tier,
            None if self.in_memory => PersistentTier::in_memory(&config.persistent)?,
            None => PersistentTier::from_config(&config.persistent)?,
        };

        let transport = match self.transport {
            Some(transport) => Some(transport),
            None if config.remote.enabled => {
                let http = HttpHistoryTransport::from_config(&config.remote)?;
                Some(Box::new(http) as Box<dyn HistoryTransport>)
            }
            None => None,
        };
        let remote = transport.map(|t| RemoteTier::new(t, &config.remote));

        info!(
            fast_max_bytes = config.fast.max_bytes,
            persistent_max_bytes = config.persistent.max_bytes,
            remote = remote.is_some(),
            "Cache manager initialized"
        );

        Ok(CacheManager {
            fast: FastTier::new(&config.fast),
            persistent,
            remote,
            classifier: TemperatureClassifier::new(&config.temperature),
            preloader: Mutex::new(Preloader::new(&config.preload)),
            metrics: Mutex::new(EngineMetrics::new(config.metrics.latency_alpha)),
            config,
        })
    }
}

/// Multi-tier cache.
///
/// Constructed explicitly and passed by reference (or `Arc`) to consumers.
pub struct CacheManager<V> {
    config: EngineConfig,
    fast: FastTier<V>,
    persistent: PersistentTier<V>,
    remote: Option<DynRemoteTier<V>>,
    classifier: TemperatureClassifier,
    preloader: Mutex<Preloader>,
    metrics: Mutex<EngineMetrics>,
}

impl<V: CacheValue> CacheManager<V> {
    pub fn builder() -> CacheManagerBuilder<V> {
        CacheManagerBuilder {
            config: EngineConfig::default(),
            persistent: None,
            transport: None,
            in_memory: false,
        }
    }

    /// Manager with an on-disk Persistent tier and no Remote tier unless the
    /// config enables it
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// Manager whose Persistent tier lives in memory
    pub fn in_memory(config: EngineConfig) -> Result<Self> {
        Self::builder().config(config).in_memory().build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn fast(&self) -> &FastTier<V> {
        &self.fast
    }

    pub fn persistent(&self) -> &PersistentTier<V> {
        &self.persistent
    }

    pub fn remote(&self) -> Option<&DynRemoteTier<V>> {
        self.remote.as_ref()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub async fn init(&self) -> Result<()> {
        self.fast.init().await?;
        self.persistent.init().await?;
        if let Some(remote) = &self.remote {
            remote.init().await?;
        }
        Ok(())
    }

    pub async fn destroy(&self) -> Result<()> {
        self.preloader.lock().reset();
        self.fast.destroy().await?;
        self.persistent.destroy().await?;
        if let Some(remote) = &self.remote {
            remote.destroy().await?;
        }
        info!("Cache manager destroyed");
        Ok(())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn get(&self, key: &str) -> Option<V> {
        self.get_entry(key).await.map(|entry| entry.value)
    }

    /// `get` returning the entry's bookkeeping as well
    pub async fn get_entry(&self, key: &str) -> Option<CacheEntry<V>> {
        let started = Instant::now();
        let found = self.fetch_through(key).await;
        self.metrics
            .lock()
            .record_get(found.is_some(), started.elapsed());

        if found.is_none() && self.config.preload.preload_on_miss {
            self.preload_related(key).await;
        }
        found
    }

    /// `get` for explicit history lookups: falls back to the Remote tier and
    /// keeps what it fetched in the Persistent tier as COLD.
    pub async fn get_history(&self, key: &str) -> Option<V> {
        let started = Instant::now();
        let local = self.fetch_through(key).await;
        self.metrics
            .lock()
            .record_get(local.is_some(), started.elapsed());
        if let Some(entry) = local {
            return Some(entry.value);
        }

        let remote = self.remote.as_ref()?;
        let entry = remote.get(key).await?;
        self.metrics.lock().record_remote_fetch();

        let expires_at = self.config.default_ttl().and_then(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .map(|ttl| Utc::now() + ttl)
        });
        let stored = entry
            .clone()
            .moved_to(TierKind::Persistent, Temperature::Cold)
            .with_expiry(expires_at);
        if let Err(e) = self.persistent.put_entry(stored).await {
            warn!(key = %key, error = %e, "Failed to keep remote entry locally");
        }
        Some(entry.value)
    }

    /// Ordered per-key `get`; one result per input key
    pub async fn mget(&self, keys: &[String]) -> Vec<(String, Option<V>)> {
        let results = join_all(keys.iter().map(|key| self.get(key))).await;
        keys.iter().cloned().zip(results).collect()
    }

    /// Fast, then Persistent with promotion. No metrics, no preloading.
    async fn fetch_through(&self, key: &str) -> Option<CacheEntry<V>> {
        if let Some(entry) = self.fast.get(key).await {
            return Some(entry);
        }

        let entry = self.persistent.get(key).await?;
        self.promote_entry(entry.clone());
        Some(entry)
    }

    fn promote_entry(&self, entry: CacheEntry<V>) {
        let key = entry.key.clone();
        match self.fast.put_entry(entry) {
            Ok(()) => {
                debug!(key = %key, "Promoted into fast tier");
                self.metrics.lock().record_promotion();
            }
            Err(e) => warn!(key = %key, error = %e, "Promotion into fast tier failed"),
        }
    }

    // ========================================================================
    // Writes
    // ========================================================================

    pub async fn set(&self, key: &str, value: V, options: SetOptions) -> Result<()> {
        let size = self.fast.size_of(&value)?;
        let temperature = self.classifier.classify(key, size, options.temperature);
        let options = self.effective_options(&options, temperature);
        debug!(key = %key, size, temperature = %temperature, "Cache write");

        match temperature {
            Temperature::Hot => {
                let (fast, persistent) = tokio::join!(
                    self.fast.set(key, value.clone(), &options),
                    self.persistent.set(key, value, &options)
                );
                persistent?;
                fast?;
            }
            Temperature::Warm => {
                let fits = self.fast.has_headroom(size);
                self.persistent.set(key, value.clone(), &options).await?;
                if fits {
                    self.fast.set(key, value, &options).await?;
                } else {
                    self.fast.delete(key).await?;
                }
            }
            Temperature::Cold => {
                self.persistent.set(key, value, &options).await?;
                self.fast.delete(key).await?;
            }
        }
        Ok(())
    }

    /// Batch write: entries are partitioned by temperature and each tier gets
    /// one batch. No cross-entry atomicity.
    pub async fn mset(&self, items: Vec<BatchItem<V>>) -> Result<()> {
        let mut fast_batch = Vec::new();
        let mut persistent_batch = Vec::with_capacity(items.len());
        let mut not_fast = Vec::new();
        let mut placement: HashMap<String, bool> = HashMap::new();
        let usage = self.fast.usage();
        let capacity = self.fast.capacity();
        let mut planned_bytes = usage.bytes;
        let mut planned_entries = usage.entries;

        for item in items {
            let size = self.fast.size_of(&item.value)?;
            let temperature = self
                .classifier
                .classify(&item.key, size, item.options.temperature);
            let options = self.effective_options(&item.options, temperature);

            let to_fast = match temperature {
                Temperature::Hot => true,
                Temperature::Warm => capacity.has_headroom(planned_bytes, planned_entries, size),
                Temperature::Cold => false,
            };
            if to_fast {
                planned_bytes += size;
                planned_entries += 1;
                fast_batch.push(BatchItem::new(
                    item.key.clone(),
                    item.value.clone(),
                    options.clone(),
                ));
            } else {
                not_fast.push(item.key.clone());
            }
            placement.insert(item.key.clone(), to_fast);
            persistent_batch.push(BatchItem::new(item.key, item.value, options));
        }

        // A repeated key is placed by its last occurrence
        fast_batch.retain(|item| placement.get(&item.key).copied().unwrap_or(false));
        not_fast.retain(|key| !placement.get(key).copied().unwrap_or(false));
        not_fast.sort();
        not_fast.dedup();

        debug!(
            fast = fast_batch.len(),
            persistent = persistent_batch.len(),
            "Cache batch write"
        );
        self.persistent.mset(persistent_batch).await?;
        self.fast.mset(fast_batch).await?;
        if !not_fast.is_empty() {
            self.fast.mdelete(&not_fast).await?;
        }
        Ok(())
    }

    /// Delete from every local tier; true if any held the key
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let in_fast = self.fast.delete(key).await?;
        let in_persistent = self.persistent.delete(key).await?;
        Ok(in_fast || in_persistent)
    }

    /// Explicit write options: resolved temperature and an absolute expiry
    fn effective_options(&self, options: &SetOptions, temperature: Temperature) -> SetOptions {
        let now = Utc::now();
        let expires_at = if options.has_expiry() {
            options.resolve_expiry(now)
        } else {
            self.config
                .default_ttl()
                .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
                .map(|ttl| now + ttl)
        };
        SetOptions {
            temperature: Some(temperature),
            expires_at,
            ttl: None,
        }
    }

    // ========================================================================
    // Tier movement
    // ========================================================================

    /// Copy `key` into the Fast tier; false if no local tier holds it
    pub async fn promote_to_fast(&self, key: &str) -> Result<bool> {
        if self.fast.contains(key) {
            return Ok(true);
        }
        let Some(entry) = self.persistent.get(key).await else {
            return Ok(false);
        };
        self.fast.put_entry(entry)?;
        self.metrics.lock().record_promotion();
        Ok(self.fast.contains(key))
    }

    /// Remove `key` from the Fast tier, making sure a Persistent copy exists
    /// first; false if it was not in the Fast tier
    pub async fn demote_from_fast(&self, key: &str) -> Result<bool> {
        let Some(entry) = self.fast.peek(key) else {
            return Ok(false);
        };
        if !self.persistent.exists(key).await {
            self.persistent
                .put_entry(entry.moved_to(TierKind::Persistent, Temperature::Warm))
                .await?;
        }
        self.fast.delete(key).await?;
        self.metrics.lock().record_demotion();
        debug!(key = %key, "Demoted from fast tier");
        Ok(true)
    }

    /// HOT if in the Fast tier, WARM if only in the Persistent tier, COLD
    /// otherwise
    pub async fn get_temperature(&self, key: &str) -> Temperature {
        if self.fast.contains(key) {
            Temperature::Hot
        } else if self.persistent.exists(key).await {
            Temperature::Warm
        } else {
            Temperature::Cold
        }
    }

    // ========================================================================
    // Preloading
    // ========================================================================

    /// Warm the Fast tier with `keys`; returns how many were loaded.
    ///
    /// If a pass is already running the keys are queued for it and 0 is
    /// returned. Dropping this future mid-pass ends the pass and discards
    /// the queued keys.
    pub async fn preload(&self, keys: Vec<String>) -> usize {
        let Some(mut batch) = self.preloader.lock().begin(keys) else {
            debug!("Preload pass running, keys queued");
            return 0;
        };
        let guard = PassGuard::new(&self.preloader);

        let mut loaded = 0;
        loop {
            for key in batch {
                if self.fast.contains(&key) {
                    continue;
                }
                let first_visit = self.preloader.lock().mark_visited(&key);
                if !first_visit {
                    continue;
                }
                if self.fetch_through(&key).await.is_some() {
                    loaded += 1;
                }
            }

            let next = self.preloader.lock().next_batch();
            match next {
                Some(next) => batch = next,
                None => break,
            }
        }
        guard.finish();

        if loaded > 0 {
            debug!(loaded, "Preload pass finished");
        }
        self.metrics.lock().record_preloaded(loaded as u64);
        loaded
    }

    /// Preload Persistent siblings of `key` sharing its prefix
    pub async fn preload_related(&self, key: &str) -> usize {
        let Some(prefix) = self.related_prefix(key) else {
            return 0;
        };
        let mut keys = self
            .persistent
            .list(&prefix, Some(self.config.preload.related_limit + 1))
            .await;
        keys.retain(|k| k != key);
        keys.truncate(self.config.preload.related_limit);
        if keys.is_empty() {
            return 0;
        }
        self.preload(keys).await
    }

    /// Key up to its last `:` when it starts with a configured related prefix
    fn related_prefix(&self, key: &str) -> Option<String> {
        let configured = self
            .config
            .preload
            .related_prefixes
            .iter()
            .find(|p| key.starts_with(p.as_str()))?;
        let cut = key.rfind(':').map(|i| i + 1).unwrap_or(0);
        if cut > configured.len() {
            Some(key[..cut].to_string())
        } else {
            Some(configured.clone())
        }
    }

    // ========================================================================
    // Query
    // ========================================================================

    /// Keys under `prefix` held by any local tier, sorted
    pub async fn list(&self, prefix: &str, limit: Option<usize>) -> Vec<String> {
        let mut keys: Vec<String> = self.fast.list(prefix, None).await;
        keys.extend(self.persistent.list(prefix, None).await);
        keys.sort();
        keys.dedup();
        if let Some(limit) = limit {
            keys.truncate(limit);
        }
        keys
    }

    /// Search the local tiers, and the Remote tier when configured. Each key
    /// appears once, attributed to the highest tier that holds it.
    pub async fn search(&self, query: &SearchQuery) -> Vec<SearchHit> {
        let mut hits = self.fast.search(query).await;
        hits.extend(self.persistent.search(query).await);
        if let Some(remote) = &self.remote {
            hits.extend(remote.search(query).await);
        }

        let mut seen = HashSet::new();
        let mut unique: Vec<SearchHit> = hits
            .into_iter()
            .filter(|hit| seen.insert(hit.key.clone()))
            .collect();
        unique.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.key.cmp(&b.key)));
        unique.truncate(query.effective_limit());
        unique
    }

    // ========================================================================
    // Stats & maintenance
    // ========================================================================

    pub async fn get_usage_stats(&self) -> UsageStats {
        let fast = self.fast.usage();
        let persistent = match self.persistent.usage().await {
            Ok(usage) => usage,
            Err(e) => {
                warn!(error = %e, "Persistent usage unavailable");
                Default::default()
            }
        };
        let counts = match self.persistent.temperature_counts().await {
            Ok(counts) => counts,
            Err(e) => {
                warn!(error = %e, "Temperature counts unavailable");
                TemperatureCounts::default()
            }
        };

        // Persistent HOT rows whose Fast copy was evicted behave as WARM
        let distribution = TemperatureDistribution {
            hot: fast.entries,
            warm: counts.warm + counts.hot.saturating_sub(fast.entries),
            cold: counts.cold,
        };

        UsageStats {
            fast: TierUsage::new(fast.bytes, fast.max_bytes, fast.entries, fast.max_entries),
            persistent: TierUsage::new(
                persistent.bytes,
                persistent.max_bytes,
                persistent.entries,
                persistent.max_entries,
            ),
            distribution,
            hit_rate: self.metrics.lock().hit_rate(),
        }
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.metrics.lock().snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.lock().reset();
    }

    /// Remove expired entries from the local tiers
    pub async fn cleanup(&self) -> Result<usize> {
        let from_fast = self.fast.purge_expired();
        let from_persistent = self.persistent.cleanup().await?;
        Ok(from_fast + from_persistent)
    }

    /// Maintenance pass. Failures of individual steps are logged and the pass
    /// continues.
    pub async fn optimize(&self) -> OptimizeReport {
        let mut report = OptimizeReport::default();

        let (hit_rate, requests) = {
            let metrics = self.metrics.lock();
            (metrics.hit_rate(), metrics.requests())
        };
        if requests > 0 && hit_rate < self.config.metrics.low_hit_rate_threshold {
            warn!(
                hit_rate,
                threshold = self.config.metrics.low_hit_rate_threshold,
                "Cache hit rate below threshold"
            );
            report.low_hit_rate = true;
        }

        match self.cleanup().await {
            Ok(removed) => report.expired_removed = removed,
            Err(e) => warn!(error = %e, "Expired entry cleanup failed"),
        }

        match self.persistent.trim_to_soft_cap().await {
            Ok(trimmed) => report.persistent_trimmed = trimmed,
            Err(e) => warn!(error = %e, "Persistent trim failed"),
        }

        let usage = self.fast.usage();
        if usage.byte_ratio() > self.config.metrics.rebalance_threshold {
            let count =
                (usage.entries as f64 * self.config.metrics.rebalance_fraction).ceil() as usize;
            for key in self.fast.least_recently_used(count) {
                match self.demote_from_fast(&key).await {
                    Ok(true) => report.demoted += 1,
                    Ok(false) => {}
                    Err(e) => warn!(key = %key, error = %e, "Demotion failed"),
                }
            }
        }

        info!(
            low_hit_rate = report.low_hit_rate,
            expired = report.expired_removed,
            trimmed = report.persistent_trimmed,
            demoted = report.demoted,
            "Cache optimized"
        );
        report
    }
}
