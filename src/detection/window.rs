//! # Window Tracker
//!
//! Per-key sliding window of failure timestamps. Each key owns a queue that
//! is appended at the tail and evicted from the head, so `observe` costs
//! O(1) amortized.
//!
//! Eviction is lazy: a key's queue is only trimmed against the timestamp
//! that just arrived for that key, never against wall-clock time.
//!
//! Timestamps for one key are assumed to arrive non-decreasing, as they do
//! in a log tail. A timestamp older than the current head is still appended
//! at the tail and nothing is re-sorted, so entries behind it may outlive the
//! window until a newer timestamp evicts them.
//!
//! The key map grows with the number of distinct keys. A feed presenting
//! unbounded distinct keys grows it without bound unless `evict_idle` is
//! called.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};

/// Sliding-window failure counts for every key seen so far.
#[derive(Debug)]
pub struct WindowTracker {
    /// Retained timestamps per key, oldest first.
    windows: HashMap<String, VecDeque<DateTime<Utc>>>,

    /// Trailing window length. Never negative.
    window: Duration,
}

impl WindowTracker {
    /// Create an empty tracker. `window` must not be negative.
    pub fn new(window: Duration) -> Self {
        debug_assert!(window >= Duration::zero());
        Self {
            windows: HashMap::new(),
            window,
        }
    }

    /// Record a failure for `key` at `timestamp` and return how many of the
    /// key's failures now fall inside the window ending at `timestamp`.
    ///
    /// A failure exactly `window` old is kept; anything older is evicted.
    pub fn observe(&mut self, key: &str, timestamp: DateTime<Utc>) -> usize {
        let queue = self.windows.entry(key.to_string()).or_default();
        queue.push_back(timestamp);

        while let Some(&oldest) = queue.front() {
            if timestamp - oldest > self.window {
                queue.pop_front();
            } else {
                break;
            }
        }

        queue.len()
    }

    /// Current number of retained timestamps for `key` (0 if never seen).
    pub fn count(&self, key: &str) -> usize {
        self.windows.get(key).map_or(0, VecDeque::len)
    }

    /// Number of keys with window state.
    pub fn key_count(&self) -> usize {
        self.windows.len()
    }

    /// Total timestamps retained across all keys.
    pub fn retained(&self) -> usize {
        self.windows.values().map(VecDeque::len).sum()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Head of the key's window: the oldest failure still counted.
    pub fn oldest(&self, key: &str) -> Option<DateTime<Utc>> {
        self.windows.get(key).and_then(|q| q.front().copied())
    }

    /// Drop the state of every key whose newest timestamp is more than
    /// `idle` before `now`. Returns the removed keys.
    ///
    /// With `idle >= window`, a removed key's entries would have been evicted
    /// by its next observation anyway, provided that observation is not older
    /// than `now`. Timestamps that run backwards across keys (a syslog year
    /// rollover, merged hosts with skewed clocks) break that proviso, and an
    /// expired key then restarts its count from 1.
    pub fn evict_idle(&mut self, now: DateTime<Utc>, idle: Duration) -> Vec<String> {
        let mut removed = Vec::new();
        self.windows.retain(|key, queue| {
            let keep = queue.back().is_some_and(|&newest| now - newest <= idle);
            if !keep {
                removed.push(key.clone());
            }
            keep
        });
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn tracker(window_secs: i64) -> WindowTracker {
        WindowTracker::new(Duration::seconds(window_secs))
    }

    #[test]
    fn test_counts_grow_inside_window() {
        let mut w = tracker(60);
        assert_eq!(w.observe("1.2.3.4", t(0)), 1);
        assert_eq!(w.observe("1.2.3.4", t(10)), 2);
        assert_eq!(w.observe("1.2.3.4", t(20)), 3);
    }

    #[test]
    fn test_entry_exactly_window_old_is_kept() {
        let mut w = tracker(60);
        w.observe("k", t(0));
        assert_eq!(w.observe("k", t(60)), 2);
    }

    #[test]
    fn test_entry_one_second_past_window_is_evicted() {
        let mut w = tracker(60);
        w.observe("k", t(0));
        assert_eq!(w.observe("k", t(61)), 1);
        assert_eq!(w.count("k"), 1);
    }

    #[test]
    fn test_eviction_drops_several_heads() {
        let mut w = tracker(60);
        for s in [0, 20, 45] {
            w.observe("10.0.0.5", t(s));
        }
        // 120 - 45 = 75 > 60, everything before goes
        assert_eq!(w.observe("10.0.0.5", t(120)), 1);
    }

    #[test]
    fn test_zero_window_counts_identical_timestamps() {
        let mut w = tracker(0);
        assert_eq!(w.observe("k", t(5)), 1);
        assert_eq!(w.observe("k", t(5)), 2);
        assert_eq!(w.observe("k", t(5)), 3);
        assert_eq!(w.observe("k", t(6)), 1);
    }

    #[test]
    fn test_keys_are_independent() {
        let mut w = tracker(60);
        assert_eq!(w.observe("a", t(0)), 1);
        assert_eq!(w.observe("b", t(1)), 1);
        assert_eq!(w.observe("a", t(2)), 2);
        // A far-future observation for b must not evict a
        assert_eq!(w.observe("b", t(500)), 1);
        assert_eq!(w.count("a"), 2);
        assert_eq!(w.observe("a", t(3)), 3);
    }

    #[test]
    fn test_keys_are_case_sensitive_and_untrimmed() {
        let mut w = tracker(60);
        w.observe("host", t(0));
        w.observe("HOST", t(0));
        w.observe(" host", t(0));
        assert_eq!(w.key_count(), 3);
        assert_eq!(w.count("host"), 1);
    }

    #[test]
    fn test_matches_reference_count() {
        // Deterministic pseudo-random non-decreasing sequence
        let mut w = tracker(30);
        let mut seen: Vec<i64> = Vec::new();
        let mut now = 0i64;
        let mut state = 0x2545_f491_u64;
        for _ in 0..500 {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            now += ((state >> 33) % 12) as i64;
            seen.push(now);
            let expected = seen.iter().filter(|&&s| now - s <= 30).count();
            assert_eq!(w.observe("k", t(now)), expected);
        }
    }

    #[test]
    fn test_out_of_order_timestamp_is_not_resorted() {
        let mut w = tracker(60);
        w.observe("k", t(100));
        // Older than the head: appended at the tail, nothing evicted
        assert_eq!(w.observe("k", t(10)), 2);
        // t=10 is 80s older than t=90 but sits behind a newer head, so it stays
        assert_eq!(w.observe("k", t(90)), 3);
        // Once the head is stale the whole run behind it drains
        assert_eq!(w.observe("k", t(161)), 1);
    }

    #[test]
    fn test_key_map_grows_with_distinct_keys() {
        let mut w = tracker(60);
        for i in 0..1000 {
            w.observe(&format!("10.0.{}.{}", i / 256, i % 256), t(0));
        }
        assert_eq!(w.key_count(), 1000);
        assert_eq!(w.retained(), 1000);
    }

    #[test]
    fn test_evict_idle_removes_only_silent_keys() {
        let mut w = tracker(60);
        w.observe("old", t(0));
        w.observe("fresh", t(500));
        let removed = w.evict_idle(t(500), Duration::seconds(120));
        assert_eq!(removed, vec!["old".to_string()]);
        assert_eq!(w.count("old"), 0);
        assert_eq!(w.count("fresh"), 1);
        assert_eq!(w.key_count(), 1);
    }

    #[test]
    fn test_evict_idle_ignores_keys_newer_than_now() {
        let mut w = tracker(60);
        w.observe("ahead", t(10_000));
        w.observe("behind", t(0));
        // A sweep at an older instant never removes keys that are ahead of it
        assert!(w.evict_idle(t(5), Duration::seconds(60)).is_empty());
        assert_eq!(w.key_count(), 2);
    }

    #[test]
    fn test_oldest_is_window_head() {
        let mut w = tracker(60);
        assert_eq!(w.oldest("k"), None);
        w.observe("k", t(0));
        w.observe("k", t(30));
        assert_eq!(w.oldest("k"), Some(t(0)));
        w.observe("k", t(80));
        assert_eq!(w.oldest("k"), Some(t(30)));
    }

    #[test]
    fn test_unseen_key_count_is_zero() {
        let w = tracker(60);
        assert_eq!(w.count("nobody"), 0);
        assert_eq!(w.key_count(), 0);
        assert_eq!(w.window(), Duration::seconds(60));
    }
}
