//! Read-through Remote tier
//!
//! ```text
//! get(key) ──► conversation_id(key) ──► request cache ──hit──► entry
//!                                            │ miss
//!                                            ▼
//!                                  with_retry(fetch_conversation)
//! ```
//!
//! Mutations are no-ops: the remote service is never written by the engine.

use crate::client::{ConversationSummary, HistoryTransport};
use crate::error::RemoteError;
use crate::retry::{with_retry, RetryPolicy};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use sessioncache_foundation::search::score;
use sessioncache_foundation::{
    encode_payload, AccessCounter, BatchItem, CacheEntry, CacheProvider, CacheValue, Codec,
    EntryFacets, JsonCodec, ProviderStats, RemoteTierConfig, Result, SearchHit, SearchQuery,
    SetOptions, Temperature, TierKind, TtlLruCache,
};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Prefix of keys produced by `list`
pub const DEFAULT_KEY_PREFIX: &str = "conversation:";

/// Remote conversation id for a cache key: its last `:`-separated segment
pub fn conversation_id(key: &str) -> &str {
    key.rsplit(':').next().unwrap_or(key)
}

#[derive(Debug, Clone)]
enum CachedResponse {
    Conversation(Value),
    Summaries(Vec<ConversationSummary>),
}

/// Read-only tier over a [`HistoryTransport`]
pub struct RemoteTier<V, T> {
    transport: T,
    retry: RetryPolicy,
    requests: Mutex<TtlLruCache<String, CachedResponse>>,
    latency: Mutex<AccessCounter>,
    codec: Arc<dyn Codec>,
    key_prefix: String,
    summary_limit: usize,
    avg_message_bytes: usize,
    enabled: AtomicBool,
    _value: PhantomData<fn() -> V>,
}

impl<V: CacheValue, T: HistoryTransport> RemoteTier<V, T> {
    pub fn new(transport: T, config: &RemoteTierConfig) -> Self {
        Self {
            transport,
            retry: RetryPolicy::from_config(config),
            requests: Mutex::new(TtlLruCache::new(
                config.request_cache_entries,
                config.request_cache_ttl(),
            )),
            latency: Mutex::new(AccessCounter::default()),
            codec: Arc::new(JsonCodec),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            summary_limit: config.summary_limit,
            avg_message_bytes: config.avg_message_bytes,
            enabled: AtomicBool::new(true),
            _value: PhantomData,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Drop every cached request so the next read goes to the service
    pub fn clear_request_cache(&self) {
        self.requests.lock().clear();
    }

    fn cached(&self, request_key: &str) -> Option<CachedResponse> {
        self.requests.lock().get(&request_key.to_string()).cloned()
    }

    fn remember(&self, request_key: String, response: CachedResponse) {
        self.requests.lock().insert(request_key, response);
    }

    fn record_latency(&self, elapsed: Duration) {
        self.latency.lock().record_latency(elapsed);
    }

    /// Raw conversation payload, through the request cache
    async fn fetch_conversation(&self, id: &str) -> std::result::Result<Value, RemoteError> {
        let request_key = format!("conversation:{}", id);
        if let Some(CachedResponse::Conversation(value)) = self.cached(&request_key) {
            debug!(id = %id, "Request cache hit");
            return Ok(value);
        }

        let started = Instant::now();
        let result = with_retry(&self.retry, "fetch_conversation", || {
            self.transport.fetch_conversation(id)
        })
        .await;
        self.record_latency(started.elapsed());

        let value = result?;
        self.remember(request_key, CachedResponse::Conversation(value.clone()));
        Ok(value)
    }

    /// Summary listing, through the request cache
    async fn summaries(&self) -> std::result::Result<Vec<ConversationSummary>, RemoteError> {
        let limit = self.summary_limit;
        let request_key = format!("summaries:{}", limit);
        if let Some(CachedResponse::Summaries(items)) = self.cached(&request_key) {
            return Ok(items);
        }

        let started = Instant::now();
        let result = with_retry(&self.retry, "list_summaries", || {
            self.transport.list_summaries(limit)
        })
        .await;
        self.record_latency(started.elapsed());

        let items = result?;
        self.remember(request_key, CachedResponse::Summaries(items.clone()));
        Ok(items)
    }

    /// Summaries, empty on failure
    async fn summaries_or_empty(&self, operation: &str) -> Vec<ConversationSummary> {
        match self.summaries().await {
            Ok(items) => items,
            Err(e) => {
                warn!(operation, error = %e, "Remote summary listing failed");
                Vec::new()
            }
        }
    }

    fn key_for(&self, summary: &ConversationSummary) -> String {
        format!("{}{}", self.key_prefix, summary.id)
    }

    fn build_entry(&self, key: &str, raw: Value) -> Option<CacheEntry<V>> {
        let facets = EntryFacets::from_payload(&raw);
        let value: V = match serde_json::from_value(raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Remote payload does not match the cached type");
                return None;
            }
        };
        let size = match encode_payload(self.codec.as_ref(), &value) {
            Ok(payload) => payload.size(),
            Err(e) => {
                warn!(key = %key, error = %e, "Remote payload could not be encoded");
                return None;
            }
        };

        Some(
            CacheEntry::new(key, value, size, Temperature::Cold, TierKind::Remote, Utc::now())
                .with_facets(facets),
        )
    }

    fn refuse_write(&self, operation: &str, key: &str) {
        warn!(
            operation,
            key = %key,
            "Remote tier is read-only, ignoring write"
        );
    }
}

#[async_trait]
impl<V: CacheValue, T: HistoryTransport> CacheProvider<V> for RemoteTier<V, T> {
    fn tier(&self) -> TierKind {
        TierKind::Remote
    }

    async fn init(&self) -> Result<()> {
        self.enabled.store(true, Ordering::Release);
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.enabled.store(false, Ordering::Release);
        self.clear_request_cache();
        Ok(())
    }

    async fn is_available(&self) -> bool {
        self.enabled.load(Ordering::Acquire) && self.transport.health().await
    }

    async fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        if !self.enabled.load(Ordering::Acquire) {
            return None;
        }
        let id = conversation_id(key);
        if id.is_empty() {
            return None;
        }

        match self.fetch_conversation(id).await {
            Ok(raw) => self.build_entry(key, raw),
            Err(e) if e.is_not_found() => {
                debug!(key = %key, "Conversation not found remotely");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Remote read failed, treating as miss");
                None
            }
        }
    }

    async fn set(&self, key: &str, _value: V, _options: &SetOptions) -> Result<()> {
        self.refuse_write("set", key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.refuse_write("delete", key);
        Ok(false)
    }

    async fn exists(&self, key: &str) -> bool {
        if !self.enabled.load(Ordering::Acquire) {
            return false;
        }
        let id = conversation_id(key);
        self.summaries_or_empty("exists")
            .await
            .iter()
            .any(|s| s.id == id)
    }

    async fn clear(&self) -> Result<()> {
        self.refuse_write("clear", "*");
        Ok(())
    }

    async fn mset(&self, items: Vec<BatchItem<V>>) -> Result<()> {
        for item in &items {
            self.refuse_write("mset", &item.key);
        }
        Ok(())
    }

    async fn mdelete(&self, keys: &[String]) -> Result<bool> {
        for key in keys {
            self.refuse_write("mdelete", key);
        }
        Ok(false)
    }

    async fn list(&self, prefix: &str, limit: Option<usize>) -> Vec<String> {
        if !self.enabled.load(Ordering::Acquire) {
            return Vec::new();
        }
        let mut keys: Vec<String> = self
            .summaries_or_empty("list")
            .await
            .iter()
            .map(|s| self.key_for(s))
            .filter(|k| k.starts_with(prefix))
            .collect();
        keys.sort();
        keys.dedup();
        if let Some(limit) = limit {
            keys.truncate(limit);
        }
        keys
    }

    async fn search(&self, query: &SearchQuery) -> Vec<SearchHit> {
        if !self.enabled.load(Ordering::Acquire) {
            return Vec::new();
        }
        let summaries = self.summaries_or_empty("search").await;

        // Ties go to the busier conversation
        let mut scored: Vec<(SearchHit, u64)> = summaries
            .iter()
            .map(|s| {
                let key = self.key_for(s);
                let hit = SearchHit {
                    score: score(query, &key, &s.facets()),
                    key,
                    tier: TierKind::Remote,
                };
                (hit, s.message_count)
            })
            .filter(|(hit, _)| hit.score > 0)
            .collect();
        scored.sort_by(|a, b| {
            b.0.score
                .cmp(&a.0.score)
                .then_with(|| b.1.cmp(&a.1))
                .then_with(|| a.0.key.cmp(&b.0.key))
        });
        scored.truncate(query.effective_limit());
        scored.into_iter().map(|(hit, _)| hit).collect()
    }

    async fn get_stats(&self) -> ProviderStats {
        let summaries = if self.enabled.load(Ordering::Acquire) {
            self.summaries_or_empty("get_stats").await
        } else {
            Vec::new()
        };
        let messages: u64 = summaries.iter().map(|s| s.message_count).sum();

        ProviderStats {
            total_entries: summaries.len(),
            total_size: messages as usize * self.avg_message_bytes,
            // Outcomes are not cached locally, only raw requests
            hit_count: 0,
            miss_count: 0,
            hit_rate: 0.0,
            avg_access_time: self.latency.lock().avg_access_ms(),
            oldest_entry: summaries.iter().filter_map(|s| s.updated_at).min(),
            newest_entry: summaries.iter().filter_map(|s| s.updated_at).max(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    /// In-process stand-in for the history service
    #[derive(Default)]
    struct FakeTransport {
        conversations: HashMap<String, Value>,
        summaries: Vec<ConversationSummary>,
        /// Fail this many fetches with a 503 before answering
        failures: AtomicUsize,
        fetches: AtomicUsize,
        listings: AtomicUsize,
    }

    impl FakeTransport {
        fn with_conversation(mut self, id: &str, payload: Value) -> Self {
            self.conversations.insert(id.to_string(), payload);
            self
        }

        fn with_summary(mut self, id: &str, title: &str, message_count: u64) -> Self {
            self.summaries.push(ConversationSummary {
                id: id.to_string(),
                title: Some(title.to_string()),
                agent_id: None,
                updated_at: Some(Utc::now()),
                message_count,
                tags: Vec::new(),
            });
            self
        }
    }

    #[async_trait]
    impl HistoryTransport for FakeTransport {
        async fn fetch_conversation(&self, id: &str) -> std::result::Result<Value, RemoteError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(RemoteError::from_http_status(503, "unavailable", None));
            }
            self.conversations
                .get(id)
                .cloned()
                .ok_or_else(|| RemoteError::NotFound(id.to_string()))
        }

        async fn list_summaries(
            &self,
            limit: usize,
        ) -> std::result::Result<Vec<ConversationSummary>, RemoteError> {
            self.listings.fetch_add(1, Ordering::SeqCst);
            Ok(self.summaries.iter().take(limit).cloned().collect())
        }

        async fn health(&self) -> bool {
            true
        }
    }

    fn remote(transport: FakeTransport) -> RemoteTier<Value, FakeTransport> {
        RemoteTier::new(transport, &RemoteTierConfig::default()).with_retry_policy(RetryPolicy {
            base_delay_ms: 1,
            ..Default::default()
        })
    }

    #[test]
    fn test_conversation_id_is_last_segment() {
        assert_eq!(conversation_id("history:user:abc"), "abc");
        assert_eq!(conversation_id("abc"), "abc");
        assert_eq!(conversation_id("trailing:"), "");
    }

    #[tokio::test]
    async fn test_writes_are_no_ops() {
        let tier = remote(
            FakeTransport::default().with_conversation("c1", json!({"title": "Original"})),
        );

        tier.set("history:c1", json!({"title": "Changed"}), &SetOptions::new())
            .await
            .unwrap();
        assert!(!tier.delete("history:c1").await.unwrap());
        tier.clear().await.unwrap();

        let entry = tier.get("history:c1").await.unwrap();
        assert_eq!(entry.value, json!({"title": "Original"}));
        assert_eq!(entry.owning_tier, TierKind::Remote);
        assert_eq!(entry.temperature, Temperature::Cold);
    }

    #[tokio::test]
    async fn test_request_cache_avoids_second_fetch() {
        let tier = remote(FakeTransport::default().with_conversation("c1", json!({"n": 1})));

        tier.get("history:c1").await.unwrap();
        tier.get("other:c1").await.unwrap();
        assert_eq!(tier.transport().fetches.load(Ordering::SeqCst), 1);

        tier.clear_request_cache();
        tier.get("history:c1").await.unwrap();
        assert_eq!(tier.transport().fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let transport = FakeTransport::default().with_conversation("c1", json!({"n": 1}));
        transport.failures.store(2, Ordering::SeqCst);
        let tier = remote(transport);

        assert!(tier.get("history:c1").await.is_some());
        assert_eq!(tier.transport().fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_a_miss() {
        let transport = FakeTransport::default().with_conversation("c1", json!({"n": 1}));
        transport.failures.store(5, Ordering::SeqCst);
        let tier = remote(transport);

        assert!(tier.get("history:c1").await.is_none());
        assert_eq!(tier.transport().fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let tier = remote(FakeTransport::default());
        assert!(tier.get("history:missing").await.is_none());
        assert_eq!(tier.transport().fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_summary_backed_operations() {
        let tier = remote(
            FakeTransport::default()
                .with_summary("c1", "Invoice #1", 3)
                .with_summary("c2", "Receipt", 10)
                .with_summary("c3", "Invoice #2", 8),
        );

        assert!(tier.exists("anything:c2").await);
        assert!(!tier.exists("anything:c9").await);
        assert_eq!(
            tier.list("conversation:", Some(2)).await,
            vec!["conversation:c1".to_string(), "conversation:c2".to_string()]
        );

        let hits = tier.search(&SearchQuery::new().text("invoice")).await;
        let keys: Vec<_> = hits.iter().map(|h| h.key.as_str()).collect();
        // Equal scores, busier conversation first
        assert_eq!(keys, vec!["conversation:c3", "conversation:c1"]);

        // One listing served every call above
        assert_eq!(tier.transport().listings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stats_estimate_size_without_hit_counts() {
        let tier = remote(
            FakeTransport::default()
                .with_summary("c1", "a", 2)
                .with_summary("c2", "b", 3),
        );
        tier.get("history:c1").await;

        let stats = tier.get_stats().await;
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.total_size, 5 * 512);
        assert_eq!(stats.hit_count, 0);
        assert_eq!(stats.miss_count, 0);
    }
}
