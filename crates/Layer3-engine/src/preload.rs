//! Preload scheduling
//!
//! One pass runs at a time. Keys that arrive while a pass is running are
//! queued by priority (up to `queue_cap`) and drained by the running pass once
//! its own batch is done. A pass that is dropped before finishing releases the
//! running flag through [`PassGuard`].

use parking_lot::Mutex;
use sessioncache_foundation::PreloadConfig;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use tracing::debug;

/// Priority of a key waiting to be preloaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadCandidate {
    /// Key carries a "current" marker
    pub current: bool,
    /// Millisecond timestamp embedded in the key, 0 if none
    pub timestamp: i64,
    pub key: String,
}

impl PreloadCandidate {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            current: key.to_ascii_lowercase().contains("current"),
            timestamp: embedded_timestamp(&key).unwrap_or(0),
            key,
        }
    }
}

impl Ord for PreloadCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.current
            .cmp(&other.current)
            .then_with(|| self.timestamp.cmp(&other.timestamp))
            // Max-heap: smaller keys pop first on ties
            .then_with(|| other.key.cmp(&self.key))
    }
}

impl PartialOrd for PreloadCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Last all-digit `:`-separated segment of `key`
pub fn embedded_timestamp(key: &str) -> Option<i64> {
    key.rsplit(':')
        .find(|segment| !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|segment| segment.parse().ok())
}

/// Keys in preload order: "current" first, then newest embedded timestamp
pub fn preload_order(keys: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut candidates: Vec<PreloadCandidate> =
        keys.into_iter().map(PreloadCandidate::new).collect();
    candidates.sort_by(|a, b| b.cmp(a));
    candidates.into_iter().map(|c| c.key).collect()
}

/// Running flag, pending queue and lifetime dedupe set
#[derive(Debug)]
pub struct Preloader {
    running: bool,
    queue: BinaryHeap<PreloadCandidate>,
    visited: HashSet<String>,
    visited_cap: usize,
    queue_cap: usize,
}

impl Preloader {
    pub fn new(config: &PreloadConfig) -> Self {
        Self {
            running: false,
            queue: BinaryHeap::new(),
            visited: HashSet::new(),
            visited_cap: config.visited_cap.max(1),
            queue_cap: config.queue_cap,
        }
    }

    /// Start a pass over `keys`.
    ///
    /// Returns the ordered batch when no pass is running; otherwise queues the
    /// keys for the running pass and returns `None`.
    pub fn begin(&mut self, keys: Vec<String>) -> Option<Vec<String>> {
        if self.running {
            let room = self.queue_cap.saturating_sub(self.queue.len());
            if keys.len() > room {
                debug!(dropped = keys.len() - room, "Preload queue full");
            }
            self.queue.extend(keys.into_iter().take(room).map(PreloadCandidate::new));
            return None;
        }
        self.running = true;
        Some(preload_order(keys))
    }

    /// Everything queued since the last call, in priority order. Ends the pass
    /// when the queue is empty.
    pub fn next_batch(&mut self) -> Option<Vec<String>> {
        if self.queue.is_empty() {
            self.running = false;
            return None;
        }
        let mut batch = Vec::with_capacity(self.queue.len());
        while let Some(candidate) = self.queue.pop() {
            batch.push(candidate.key);
        }
        Some(batch)
    }

    /// Record a visit; false if `key` was already visited. The set is cleared
    /// once it reaches its cap.
    pub fn mark_visited(&mut self, key: &str) -> bool {
        if self.visited.contains(key) {
            return false;
        }
        if self.visited.len() >= self.visited_cap {
            self.visited.clear();
        }
        self.visited.insert(key.to_string());
        true
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn visited(&self) -> usize {
        self.visited.len()
    }

    /// End the current pass without draining the queue
    pub fn abort_pass(&mut self) {
        self.running = false;
        self.queue.clear();
    }

    /// Abandon the current pass, e.g. on shutdown
    pub fn reset(&mut self) {
        self.running = false;
        self.queue.clear();
        self.visited.clear();
    }
}

/// Ends the pass on drop unless [`PassGuard::finish`] was called
pub struct PassGuard<'a> {
    preloader: &'a Mutex<Preloader>,
    finished: bool,
}

impl<'a> PassGuard<'a> {
    pub fn new(preloader: &'a Mutex<Preloader>) -> Self {
        Self {
            preloader,
            finished: false,
        }
    }

    /// The pass ended through `next_batch`
    pub fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!("Preload pass dropped before finishing");
            self.preloader.lock().abort_pass();
        }
    }
}

impl Default for Preloader {
    fn default() -> Self {
        Self::new(&PreloadConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_embedded_timestamp() {
        assert_eq!(embedded_timestamp("session:1700000000000"), Some(1_700_000_000_000));
        assert_eq!(embedded_timestamp("session:42:messages"), Some(42));
        assert_eq!(embedded_timestamp("session:abc"), None);
    }

    #[test]
    fn test_order_current_first_then_newest() {
        let ordered = preload_order(keys(&[
            "session:100",
            "session:300",
            "session:current:1",
            "session:200",
        ]));
        assert_eq!(
            ordered,
            keys(&["session:current:1", "session:300", "session:200", "session:100"])
        );
    }

    #[test]
    fn test_second_caller_queues_while_running() {
        let mut preloader = Preloader::default();
        assert!(preloader.begin(keys(&["a:1"])).is_some());
        assert!(preloader.begin(keys(&["b:5", "b:9"])).is_none());
        assert_eq!(preloader.pending(), 2);

        assert_eq!(preloader.next_batch(), Some(keys(&["b:9", "b:5"])));
        assert!(preloader.is_running());
        assert_eq!(preloader.next_batch(), None);
        assert!(!preloader.is_running());
    }

    #[test]
    fn test_queue_is_capped() {
        let mut preloader = Preloader::new(&PreloadConfig {
            queue_cap: 2,
            ..Default::default()
        });
        preloader.begin(keys(&["a"]));
        preloader.begin(keys(&["b:1", "b:2", "b:3"]));
        assert_eq!(preloader.pending(), 2);
        preloader.begin(keys(&["c"]));
        assert_eq!(preloader.pending(), 2);
    }

    #[test]
    fn test_dropped_guard_ends_pass() {
        let preloader = Mutex::new(Preloader::default());
        {
            let _guard = PassGuard::new(&preloader);
            assert!(preloader.lock().begin(keys(&["a"])).is_some());
            preloader.lock().begin(keys(&["b"]));
        }
        assert!(!preloader.lock().is_running());
        assert_eq!(preloader.lock().pending(), 0);
        assert!(preloader.lock().begin(keys(&["c"])).is_some());
    }

    #[test]
    fn test_finished_guard_leaves_state() {
        let preloader = Mutex::new(Preloader::default());
        preloader.lock().begin(keys(&["a"]));
        PassGuard::new(&preloader).finish();
        assert!(preloader.lock().is_running());
    }

    #[test]
    fn test_visited_set_is_capped() {
        let mut preloader = Preloader::new(&PreloadConfig {
            visited_cap: 2,
            ..Default::default()
        });
        assert!(preloader.mark_visited("a"));
        assert!(!preloader.mark_visited("a"));
        assert!(preloader.mark_visited("b"));
        // Cap reached: cleared before inserting c
        assert!(preloader.mark_visited("c"));
        assert_eq!(preloader.visited(), 1);
        assert!(preloader.mark_visited("a"));
    }
}
