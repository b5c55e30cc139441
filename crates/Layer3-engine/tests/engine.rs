//! End-to-end behaviour of the cache manager over real tiers

use async_trait::async_trait;
use serde_json::{json, Value};
use sessioncache_engine::{
    BatchItem, CacheManager, EngineConfig, SearchQuery, SetOptions, Temperature,
};
use sessioncache_foundation::{CacheProvider, FastTierConfig};
use sessioncache_remote::{ConversationSummary, HistoryTransport, RemoteError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn manager() -> CacheManager<Value> {
    CacheManager::in_memory(EngineConfig::minimal()).unwrap()
}

fn manager_with_fast(max_bytes: usize, max_entries: usize) -> CacheManager<Value> {
    let mut config = EngineConfig::minimal();
    config.fast = FastTierConfig {
        max_bytes,
        max_entries,
        eviction_target_ratio: 0.8,
    };
    CacheManager::in_memory(config).unwrap()
}

fn keys(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[derive(Default)]
struct FakeHistory {
    conversations: HashMap<String, Value>,
    fetches: Arc<AtomicUsize>,
}

#[async_trait]
impl HistoryTransport for FakeHistory {
    async fn fetch_conversation(&self, id: &str) -> Result<Value, RemoteError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.conversations
            .get(id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }

    async fn list_summaries(&self, _limit: usize) -> Result<Vec<ConversationSummary>, RemoteError> {
        Ok(self
            .conversations
            .keys()
            .map(|id| ConversationSummary {
                id: id.clone(),
                title: None,
                agent_id: None,
                updated_at: None,
                message_count: 1,
                tags: Vec::new(),
            })
            .collect())
    }

    async fn health(&self) -> bool {
        true
    }
}

// ============================================================================
// Reads and writes
// ============================================================================

#[tokio::test]
async fn test_set_then_get_counts_exactly_one_hit() {
    let cache = manager();
    cache.set("user:1", json!({"name": "Ada"}), SetOptions::new()).await.unwrap();

    let before = cache.get_metrics().hits;
    assert_eq!(cache.get("user:1").await, Some(json!({"name": "Ada"})));
    assert_eq!(cache.get_metrics().hits, before + 1);
}

#[tokio::test]
async fn test_expired_entry_is_not_found_and_removed() {
    let cache = manager();
    let past = chrono::Utc::now() - chrono::Duration::milliseconds(1);
    cache
        .set("user:2", json!(1), SetOptions::new().expires_at(past))
        .await
        .unwrap();

    assert_eq!(cache.get("user:2").await, None);
    assert_eq!(cache.get_metrics().hits, 0);
    assert!(!cache.fast().contains("user:2"));
    assert!(!cache.persistent().exists("user:2").await);
}

#[tokio::test]
async fn test_hit_rate_is_exact() {
    let cache = manager();
    cache.set("k", json!(1), SetOptions::new()).await.unwrap();
    for _ in 0..6 {
        cache.get("k").await;
    }
    for i in 0..4 {
        cache.get(&format!("missing{}", i)).await;
    }

    let metrics = cache.get_metrics();
    assert_eq!((metrics.hits, metrics.misses), (6, 4));
    assert_eq!(metrics.hit_rate, 6.0 / 10.0);
}

#[tokio::test]
async fn test_mget_is_ordered_and_complete() {
    let cache = manager();
    cache.set("a", json!("A"), SetOptions::new()).await.unwrap();
    cache.set("c", json!("C"), SetOptions::new()).await.unwrap();

    let results = cache.mget(&keys(&["a", "b", "c", "d", "e"])).await;
    assert_eq!(
        results,
        vec![
            ("a".to_string(), Some(json!("A"))),
            ("b".to_string(), None),
            ("c".to_string(), Some(json!("C"))),
            ("d".to_string(), None),
            ("e".to_string(), None),
        ]
    );
}

#[tokio::test]
async fn test_delete_reports_presence() {
    let cache = manager();
    cache.set("k", json!(1), SetOptions::new()).await.unwrap();
    assert!(cache.delete("k").await.unwrap());
    assert!(!cache.delete("k").await.unwrap());
    assert_eq!(cache.get("k").await, None);
}

#[tokio::test]
async fn test_search_matches_title_text() {
    let cache = manager();
    cache.set("k1", json!({"title": "Invoice #1"}), SetOptions::new()).await.unwrap();
    cache.set("k2", json!({"title": "Receipt"}), SetOptions::new()).await.unwrap();
    cache.set("k3", json!({"title": "Invoice #2"}), SetOptions::new()).await.unwrap();

    let hits = cache.search(&SearchQuery::new().text("invoice")).await;
    let found: Vec<_> = hits.iter().map(|h| h.key.as_str()).collect();
    assert_eq!(found, vec!["k1", "k3"]);
}

// ============================================================================
// Placement
// ============================================================================

#[tokio::test]
async fn test_temperature_follows_placement() {
    let cache = manager();
    cache.set("hot", json!(1), SetOptions::new().temperature(Temperature::Hot)).await.unwrap();
    cache.set("cold", json!(1), SetOptions::new().temperature(Temperature::Cold)).await.unwrap();

    assert_eq!(cache.get_temperature("hot").await, Temperature::Hot);
    assert!(cache.persistent().exists("hot").await);
    assert_eq!(cache.get_temperature("cold").await, Temperature::Warm);
    assert_eq!(cache.get_temperature("nowhere").await, Temperature::Cold);
}

#[tokio::test]
async fn test_warm_write_skips_full_fast_tier() {
    // 80-byte eviction target; a ~90 byte value has no headroom
    let cache = manager_with_fast(100, 10);
    let value = json!("x".repeat(88));
    cache
        .set("warm", value, SetOptions::new().temperature(Temperature::Warm))
        .await
        .unwrap();
    assert_eq!(cache.get_temperature("warm").await, Temperature::Warm);

    cache
        .set("small", json!(1), SetOptions::new().temperature(Temperature::Warm))
        .await
        .unwrap();
    assert_eq!(cache.get_temperature("small").await, Temperature::Hot);
}

#[tokio::test]
async fn test_cold_rewrite_drops_stale_fast_copy() {
    let cache = manager();
    cache.set("k", json!("v1"), SetOptions::new()).await.unwrap();
    cache
        .set("k", json!("v2"), SetOptions::new().temperature(Temperature::Cold))
        .await
        .unwrap();

    assert!(!cache.fast().contains("k"));
    assert_eq!(cache.get("k").await, Some(json!("v2")));
}

#[tokio::test]
async fn test_key_markers_classify_hot() {
    let mut config = EngineConfig::minimal();
    config.temperature.hot_max_bytes = 1;
    config.temperature.warm_max_bytes = 2;
    let cache: CacheManager<Value> = CacheManager::in_memory(config).unwrap();

    cache.set("session:current", json!("large enough"), SetOptions::new()).await.unwrap();
    cache.set("session:old", json!("large enough"), SetOptions::new()).await.unwrap();

    assert_eq!(cache.get_temperature("session:current").await, Temperature::Hot);
    assert_eq!(cache.get_temperature("session:old").await, Temperature::Warm);
}

#[tokio::test]
async fn test_fast_overflow_evicts_lowest_score() {
    // "xxxxxxxx" encodes to 10 bytes
    let cache = manager_with_fast(100, 100);
    for i in 0..10 {
        cache.set(&format!("k{}", i), json!("xxxxxxxx"), SetOptions::new()).await.unwrap();
    }
    for i in (0..10).filter(|i| *i != 3) {
        cache.get(&format!("k{}", i)).await.unwrap();
    }

    cache.set("k10", json!("xxxxxxxx"), SetOptions::new()).await.unwrap();

    let usage = cache.fast().usage();
    assert!(usage.bytes <= 80);
    assert!(!cache.fast().contains("k3"));
    // Evicted from Fast only
    assert_eq!(cache.get_temperature("k3").await, Temperature::Warm);
}

#[tokio::test]
async fn test_mset_partitions_by_temperature() {
    let cache = manager();
    cache
        .mset(vec![
            BatchItem::new("h", json!(1), SetOptions::new().temperature(Temperature::Hot)),
            BatchItem::new("w", json!(2), SetOptions::new().temperature(Temperature::Warm)),
            BatchItem::new("c", json!(3), SetOptions::new().temperature(Temperature::Cold)),
        ])
        .await
        .unwrap();

    assert_eq!(cache.get_temperature("h").await, Temperature::Hot);
    assert_eq!(cache.get_temperature("w").await, Temperature::Hot);
    assert_eq!(cache.get_temperature("c").await, Temperature::Warm);
    assert_eq!(cache.persistent().usage().await.unwrap().entries, 3);
}

#[tokio::test]
async fn test_mset_repeated_key_follows_last_write() {
    let cache = manager();
    cache
        .mset(vec![
            BatchItem::new("k", json!("old"), SetOptions::new().temperature(Temperature::Cold)),
            BatchItem::new("k", json!("new"), SetOptions::new().temperature(Temperature::Hot)),
            BatchItem::new("j", json!("old"), SetOptions::new().temperature(Temperature::Hot)),
            BatchItem::new("j", json!("new"), SetOptions::new().temperature(Temperature::Cold)),
        ])
        .await
        .unwrap();

    assert_eq!(cache.get_temperature("k").await, Temperature::Hot);
    assert_eq!(cache.fast().peek("k").map(|e| e.value), Some(json!("new")));
    assert_eq!(cache.get_temperature("j").await, Temperature::Warm);
    assert_eq!(cache.get("j").await, Some(json!("new")));
}

// ============================================================================
// Tier movement
// ============================================================================

#[tokio::test]
async fn test_persistent_hit_is_promoted() {
    let cache = manager();
    cache.set("k", json!(1), SetOptions::new().temperature(Temperature::Cold)).await.unwrap();
    assert!(!cache.fast().contains("k"));

    assert_eq!(cache.get("k").await, Some(json!(1)));
    assert!(cache.fast().contains("k"));
    assert_eq!(cache.get_metrics().promotions, 1);
}

#[tokio::test]
async fn test_explicit_promote_and_demote() {
    let cache = manager();
    cache.set("k", json!(1), SetOptions::new().temperature(Temperature::Cold)).await.unwrap();

    assert!(cache.promote_to_fast("k").await.unwrap());
    assert_eq!(cache.get_temperature("k").await, Temperature::Hot);

    assert!(cache.demote_from_fast("k").await.unwrap());
    assert_eq!(cache.get_temperature("k").await, Temperature::Warm);
    assert!(!cache.demote_from_fast("k").await.unwrap());
    assert!(!cache.promote_to_fast("missing").await.unwrap());
}

#[tokio::test]
async fn test_demote_never_loses_data() {
    let cache = manager();
    cache.set("k", json!("v"), SetOptions::new()).await.unwrap();
    // Simulate a Fast-only entry
    cache.persistent().delete("k").await.unwrap();

    assert!(cache.demote_from_fast("k").await.unwrap());
    assert_eq!(cache.get("k").await, Some(json!("v")));
}

// ============================================================================
// Preloading
// ============================================================================

#[tokio::test]
async fn test_preload_warms_fast_tier_once() {
    let cache = manager();
    let cold = || SetOptions::new().temperature(Temperature::Cold);
    cache.set("session:1000", json!(1), cold()).await.unwrap();
    cache.set("session:2000", json!(2), cold()).await.unwrap();
    cache.set("session:current:5", json!(3), cold()).await.unwrap();

    let all = keys(&["session:1000", "session:2000", "session:current:5", "session:none"]);
    assert_eq!(cache.preload(all.clone()).await, 3);
    assert!(cache.fast().contains("session:1000"));

    // Resident or already visited
    assert_eq!(cache.preload(all).await, 0);
    assert_eq!(cache.get_metrics().preloaded, 3);
}

#[tokio::test]
async fn test_miss_preloads_related_keys() {
    let cache = manager();
    let cold = || SetOptions::new().temperature(Temperature::Cold);
    cache.set("session:a", json!(1), cold()).await.unwrap();
    cache.set("session:b", json!(2), cold()).await.unwrap();
    cache.set("other:c", json!(3), cold()).await.unwrap();

    assert_eq!(cache.get("session:missing").await, None);

    assert!(cache.fast().contains("session:a"));
    assert!(cache.fast().contains("session:b"));
    assert!(!cache.fast().contains("other:c"));
}

#[tokio::test]
async fn test_abandoned_preload_does_not_block_later_passes() {
    let cache = manager();
    let cold = || SetOptions::new().temperature(Temperature::Cold);
    let mut batch = Vec::new();
    for i in 0..400 {
        batch.push(BatchItem::new(format!("session:{}", i), json!(i), cold()));
    }
    batch.push(BatchItem::new("session:late", json!("late"), cold()));
    cache.mset(batch).await.unwrap();

    let keys: Vec<String> = (0..400).map(|i| format!("session:{}", i)).collect();
    let _ = tokio::time::timeout(std::time::Duration::from_nanos(1), cache.preload(keys)).await;

    assert_eq!(cache.preload(vec!["session:late".to_string()]).await, 1);
    assert!(cache.fast().contains("session:late"));
}

// ============================================================================
// Remote tier
// ============================================================================

#[tokio::test]
async fn test_remote_writes_are_ignored() {
    let mut history = FakeHistory::default();
    history.conversations.insert("c1".into(), json!({"title": "Original"}));
    let cache: CacheManager<Value> = CacheManager::builder()
        .config(EngineConfig::minimal())
        .in_memory()
        .remote(history)
        .build()
        .unwrap();

    let remote = cache.remote().unwrap();
    remote.set("history:c1", json!({"title": "Changed"}), &SetOptions::new()).await.unwrap();
    remote.delete("history:c1").await.unwrap();
    assert_eq!(
        remote.get("history:c1").await.map(|e| e.value),
        Some(json!({"title": "Original"}))
    );
}

#[tokio::test]
async fn test_history_read_through_is_kept_locally() {
    let mut history = FakeHistory::default();
    history.conversations.insert("c1".into(), json!({"title": "Chat"}));
    let fetches = history.fetches.clone();
    let cache: CacheManager<Value> = CacheManager::builder()
        .config(EngineConfig::minimal())
        .in_memory()
        .remote(history)
        .build()
        .unwrap();

    // Plain get never reaches the Remote tier
    assert_eq!(cache.get("history:c1").await, None);
    assert_eq!(fetches.load(Ordering::SeqCst), 0);

    assert_eq!(cache.get_history("history:c1").await, Some(json!({"title": "Chat"})));
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    assert_eq!(cache.get_metrics().remote_fetches, 1);

    // Now served locally
    assert_eq!(cache.get("history:c1").await, Some(json!({"title": "Chat"})));
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    assert_eq!(cache.get_history("history:missing").await, None);
}

// ============================================================================
// Maintenance
// ============================================================================

#[tokio::test]
async fn test_usage_stats_distribution() {
    let cache = manager();
    cache.set("h1", json!(1), SetOptions::new().temperature(Temperature::Hot)).await.unwrap();
    cache.set("h2", json!(2), SetOptions::new().temperature(Temperature::Hot)).await.unwrap();
    cache.set("c1", json!(3), SetOptions::new().temperature(Temperature::Cold)).await.unwrap();

    let stats = cache.get_usage_stats().await;
    assert_eq!(stats.distribution.hot, 2);
    assert_eq!(stats.distribution.warm, 0);
    assert_eq!(stats.distribution.cold, 1);
    assert_eq!(stats.persistent.entries, 3);
    assert!(stats.fast.percent > 0.0);
}

#[tokio::test]
async fn test_optimize_rebalances_full_fast_tier() {
    let cache = manager_with_fast(100, 100);
    for i in 0..9 {
        cache.set(&format!("k{}", i), json!("xxxxxxxx"), SetOptions::new()).await.unwrap();
    }
    assert_eq!(cache.fast().usage().bytes, 90);

    let report = cache.optimize().await;
    assert!(!report.low_hit_rate);
    assert_eq!(report.demoted, 2);
    assert_eq!(cache.fast().len(), 7);
    assert_eq!(cache.persistent().usage().await.unwrap().entries, 9);
    assert_eq!(cache.get_metrics().demotions, 2);

    for i in 0..3 {
        cache.get(&format!("missing{}", i)).await;
    }
    assert!(cache.optimize().await.low_hit_rate);
}

#[tokio::test]
async fn test_cleanup_counts_both_tiers() {
    let cache = manager();
    let past = chrono::Utc::now() - chrono::Duration::seconds(1);
    cache.set("gone", json!(1), SetOptions::new().expires_at(past)).await.unwrap();
    cache.set("kept", json!(2), SetOptions::new()).await.unwrap();

    // HOT write: one row in each tier
    assert_eq!(cache.cleanup().await.unwrap(), 2);
    assert_eq!(cache.get("kept").await, Some(json!(2)));
}

#[tokio::test]
async fn test_reset_metrics() {
    let cache = manager();
    cache.get("missing").await;
    cache.reset_metrics();
    assert_eq!(cache.get_metrics().misses, 0);
}

#[tokio::test]
async fn test_on_disk_cache_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::minimal();
    config.persistent.path = Some(dir.path().join("cache.db"));

    {
        let cache: CacheManager<Value> = CacheManager::new(config.clone()).unwrap();
        cache.set("durable", json!({"n": 1}), SetOptions::new()).await.unwrap();
        cache.destroy().await.unwrap();
    }

    let cache: CacheManager<Value> = CacheManager::new(config).unwrap();
    assert_eq!(cache.get_temperature("durable").await, Temperature::Warm);
    assert_eq!(cache.get("durable").await, Some(json!({"n": 1})));
}
