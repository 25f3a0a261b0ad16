//! # Detection Engine
//!
//! The detection engine drives a record stream through a normalizer and a
//! `WindowTracker`, and decides per observation whether to alert.
//!
//! One engine serves one ordered input stream. Independent inputs each get
//! their own engine; the tracker is not meant to be shared between threads.
//!
//! By default there is no deduplication: a key that stays at or above the
//! threshold alerts on every further failure. An opt-in cooldown suppresses
//! repeats, which changes alert cardinality.

pub mod window;

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::log_sources::{Normalized, Normalizer};
use crate::{Alert, AuthEvent, DetectionConfig, WatchError, WatchResult};

pub use window::WindowTracker;

/// How many observations pass between idle-key sweeps.
const IDLE_SWEEP_INTERVAL: u64 = 1024;

/// Running counters for one engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Records handed to the engine, relevant or not.
    pub records: u64,

    /// Records the normalizer discarded.
    pub discarded: u64,

    /// Failures fed to the window tracker.
    pub failures: u64,

    /// Alerts emitted.
    pub alerts: u64,

    /// Alerts withheld by the cooldown.
    pub suppressed: u64,

    /// Keys dropped by idle expiry.
    pub keys_expired: u64,
}

/// The detection engine. Owns the window tracker and the run's fixed
/// threshold, window and label.
#[derive(Debug)]
pub struct DetectionEngine {
    tracker: WindowTracker,
    threshold: usize,
    window_secs: u64,
    label: String,

    /// Minimum spacing between alerts for the same key, if enabled.
    cooldown: Option<Duration>,

    /// Timestamp of the last emitted alert per key (cooldown only).
    last_alert: HashMap<String, DateTime<Utc>>,

    /// Silence after which a key's state is dropped, if enabled.
    idle_expiry: Option<Duration>,

    /// Failure totals per key, for the run summary. Expired keys leave
    /// this map together with their window state.
    totals: HashMap<String, u64>,

    stats: EngineStats,
}

impl DetectionEngine {
    /// Create an engine alerting when a key reaches `threshold` failures
    /// within `window`.
    ///
    /// Rejects a zero threshold and a negative window.
    pub fn new(threshold: u32, window: Duration, label: impl Into<String>) -> WatchResult<Self> {
        if threshold == 0 {
            return Err(WatchError::Config("threshold must be at least 1".to_string()));
        }
        if window < Duration::zero() {
            return Err(WatchError::Config(format!(
                "window must not be negative, got {}s",
                window.num_seconds()
            )));
        }

        Ok(Self {
            tracker: WindowTracker::new(window),
            threshold: threshold as usize,
            window_secs: window.num_seconds().unsigned_abs(),
            label: label.into(),
            cooldown: None,
            last_alert: HashMap::new(),
            idle_expiry: None,
            totals: HashMap::new(),
            stats: EngineStats::default(),
        })
    }

    /// Build an engine from the `[detection]` config section.
    pub fn from_config(config: &DetectionConfig, label: impl Into<String>) -> WatchResult<Self> {
        let window = seconds(config.window_secs)?;
        let mut engine = Self::new(config.threshold, window, label)?;
        if let Some(cooldown) = config.alert_cooldown_secs {
            engine = engine.with_cooldown(seconds(cooldown)?);
        }
        if let Some(idle) = config.idle_key_expiry_secs {
            engine = engine.with_idle_expiry(seconds(idle)?)?;
        }
        Ok(engine)
    }

    /// Suppress alerts for a key until `cooldown` has passed since its last
    /// alert (measured in event time).
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    /// Periodically drop keys that have been silent for `idle`. Must not be
    /// shorter than the window.
    pub fn with_idle_expiry(mut self, idle: Duration) -> WatchResult<Self> {
        if idle < self.tracker.window() {
            return Err(WatchError::Config(format!(
                "idle key expiry ({}s) must not be shorter than the window ({}s)",
                idle.num_seconds(),
                self.window_secs
            )));
        }
        self.idle_expiry = Some(idle);
        Ok(self)
    }

    /// Feed one normalized record. Discards are counted and ignored.
    pub fn ingest(&mut self, normalized: Normalized) -> Option<Alert> {
        self.stats.records += 1;
        match normalized.timestamp {
            Some(timestamp) => self.observe(&AuthEvent::new(timestamp, normalized.key)),
            None => {
                self.stats.discarded += 1;
                None
            }
        }
    }

    /// Record one failure and return an alert if its key is now at or above
    /// the threshold.
    pub fn observe(&mut self, event: &AuthEvent) -> Option<Alert> {
        let count = self.tracker.observe(&event.key, event.timestamp);
        self.stats.failures += 1;
        *self.totals.entry(event.key.clone()).or_insert(0) += 1;

        if self.stats.failures % IDLE_SWEEP_INTERVAL == 0 {
            self.sweep_idle_keys(event.timestamp);
        }

        if count < self.threshold {
            return None;
        }

        if let Some(cooldown) = self.cooldown {
            if let Some(&last) = self.last_alert.get(&event.key) {
                if event.timestamp - last < cooldown {
                    self.stats.suppressed += 1;
                    return None;
                }
            }
            self.last_alert.insert(event.key.clone(), event.timestamp);
        }

        self.stats.alerts += 1;
        Some(Alert {
            label: self.label.clone(),
            key: event.key.clone(),
            count,
            window_secs: self.window_secs,
            first_seen: self.tracker.oldest(&event.key).unwrap_or(event.timestamp),
            timestamp: event.timestamp,
        })
    }

    /// Lazily run `records` through `normalizer`, yielding alerts as they
    /// fire. The stream ends when `records` ends; an endless record source
    /// makes an endless stream.
    pub fn run<I, N>(&mut self, records: I, normalizer: N) -> AlertStream<'_, I::IntoIter, N>
    where
        I: IntoIterator,
        N: Normalizer<I::Item>,
    {
        AlertStream {
            engine: self,
            records: records.into_iter(),
            normalizer,
        }
    }

    /// Expire keys silent for longer than the idle limit, measured back
    /// from `now`, the timestamp of the observation that triggered the sweep.
    fn sweep_idle_keys(&mut self, now: DateTime<Utc>) {
        let Some(idle) = self.idle_expiry else {
            return;
        };
        let removed = self.tracker.evict_idle(now, idle);
        if removed.is_empty() {
            return;
        }
        for key in &removed {
            self.totals.remove(key);
            self.last_alert.remove(key);
        }
        self.stats.keys_expired += removed.len() as u64;
        log::debug!(
            "Expired {} idle keys ({} still tracked)",
            removed.len(),
            self.tracker.key_count()
        );
    }

    /// The `n` keys with the most failures over the whole run, most first,
    /// ties broken by key. With idle expiry enabled only keys that have not
    /// expired are ranked.
    pub fn top_keys(&self, n: usize) -> Vec<(String, u64)> {
        let mut totals: Vec<(String, u64)> = self
            .totals
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        totals.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        totals.truncate(n);
        totals
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn tracker(&self) -> &WindowTracker {
        &self.tracker
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

fn seconds(secs: u64) -> WatchResult<Duration> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| WatchError::Config(format!("duration of {}s is out of range", secs)))
}

/// Lazy alert sequence produced by `DetectionEngine::run`.
///
/// Pulls records only as far as needed to produce the next alert.
pub struct AlertStream<'e, I, N> {
    engine: &'e mut DetectionEngine,
    records: I,
    normalizer: N,
}

impl<'e, I, N> Iterator for AlertStream<'e, I, N>
where
    I: Iterator,
    N: Normalizer<I::Item>,
{
    type Item = Alert;

    fn next(&mut self) -> Option<Alert> {
        for record in self.records.by_ref() {
            let normalized = self.normalizer.normalize(&record);
            if let Some(alert) = self.engine.ingest(normalized) {
                return Some(alert);
            }
        }
        None
    }
}
