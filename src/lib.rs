//! # authwatch - Core Library
//!
//! Brute-force login detector for Linux auth logs and Windows security
//! event exports.
//!
//! authwatch reads authentication-failure records, attributes each one to an
//! origin key (usually the source address), and raises an alert whenever a
//! single key accumulates `threshold` failures inside a trailing window of
//! `window_secs` seconds.
//!
//! ## Pipeline
//! ```text
//! raw record -> Normalizer -> (timestamp, key) | discard
//!            -> WindowTracker::observe -> count
//!            -> DetectionEngine threshold check -> AlertSink
//! ```
//!
//! Detection and alerting only. Nothing is blocked and no window state
//! survives a restart.

pub mod detection;
pub mod log_sources;
pub mod response;
pub mod scan;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::log_sources::SourceMode;

/// Key used for failures whose origin could not be extracted.
pub const UNKNOWN_KEY: &str = "unknown";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Unified error type for authwatch.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Input source error: {0}")]
    Source(String),

    #[error("Alert delivery failed: {0}")]
    Alert(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type WatchResult<T> = Result<T, WatchError>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Top-level configuration for authwatch.
///
/// Loaded from `authwatch.toml` in the working directory or a path supplied
/// via CLI flag. Command-line flags override individual values.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WatchConfig {
    /// Window and threshold tuning.
    pub detection: DetectionConfig,

    /// Where records come from and how to read them.
    pub source: SourceConfig,

    /// Where alerts go.
    pub alerts: AlertConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum failures inside the window that raise an alert. Must be >= 1.
    pub threshold: u32,

    /// Trailing window length in seconds. Zero is legal.
    pub window_secs: u64,

    /// Suppress repeat alerts for the same key for this many seconds after
    /// an alert. `None` alerts on every observation at or above threshold.
    pub alert_cooldown_secs: Option<u64>,

    /// Drop the window state of keys that have been silent this long.
    /// Must be >= `window_secs`. `None` keeps every key for the whole run.
    pub idle_key_expiry_secs: Option<u64>,

    /// Label printed in alerts. Defaults to the source mode label.
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Which adapter interprets the input.
    pub mode: SourceMode,

    /// Input files. Each path gets its own detection engine.
    pub paths: Vec<PathBuf>,

    /// Keep reading as the file grows (linux mode only).
    pub follow: bool,

    /// In follow mode, skip what the file already holds and only read
    /// lines written after start.
    pub start_at_end: bool,

    /// How often a followed file is polled for new lines.
    pub poll_interval_ms: u64,

    /// Year stamped onto syslog timestamps. `None` = current year.
    pub assume_year: Option<i32>,

    /// Substrings that mark a syslog line as an authentication failure.
    pub failure_markers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Append-only alert log. `None` disables the file sink.
    pub alert_log_path: Option<PathBuf>,

    /// Line format of the alert log.
    pub alert_format: AlertFormat,

    /// Print alerts to stdout.
    pub console: bool,

    /// Optional webhook receiving each alert as JSON.
    pub webhook_url: Option<String>,
}

/// On-disk representation of an alert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlertFormat {
    /// `[ALERT] ...` text line.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
    /// Burst rows: `label,key,first_seen,last_seen,count,window_secs`,
    /// with a header line when the file is new.
    Csv,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            window_secs: 60,
            alert_cooldown_secs: None,
            idle_key_expiry_secs: None,
            label: None,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            mode: SourceMode::Linux,
            paths: vec![],
            follow: false,
            start_at_end: false,
            poll_interval_ms: 1000,
            assume_year: None,
            failure_markers: log_sources::syslog::DEFAULT_FAILURE_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            alert_log_path: Some(PathBuf::from("alerts.txt")),
            alert_format: AlertFormat::Text,
            console: true,
            webhook_url: None,
        }
    }
}

impl WatchConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> WatchResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: WatchConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Write the default configuration to a TOML file.
    pub fn write_default(path: &Path) -> WatchResult<()> {
        let config = Self::default();
        let content =
            toml::to_string_pretty(&config).map_err(|e| WatchError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings that would make a run meaningless. Called before any
    /// input is opened.
    pub fn validate(&self) -> WatchResult<()> {
        let d = &self.detection;
        if d.threshold == 0 {
            return Err(WatchError::Config(
                "threshold must be at least 1".to_string(),
            ));
        }
        if let Some(idle) = d.idle_key_expiry_secs {
            if idle < d.window_secs {
                return Err(WatchError::Config(format!(
                    "idle_key_expiry_secs ({}) must not be shorter than window_secs ({})",
                    idle, d.window_secs
                )));
            }
        }

        let s = &self.source;
        if s.paths.is_empty() {
            return Err(WatchError::Config("no input path given".to_string()));
        }
        if s.follow && s.mode != SourceMode::Linux {
            return Err(WatchError::Config(format!(
                "follow mode is only supported for linux logs, not {}",
                s.mode
            )));
        }
        if s.start_at_end && !s.follow {
            return Err(WatchError::Config(
                "start_at_end only applies in follow mode".to_string(),
            ));
        }
        if s.follow && s.poll_interval_ms == 0 {
            return Err(WatchError::Config(
                "poll_interval_ms must be positive in follow mode".to_string(),
            ));
        }
        if s.mode == SourceMode::Linux && s.failure_markers.iter().all(|m| m.is_empty()) {
            return Err(WatchError::Config(
                "at least one non-empty failure marker is required".to_string(),
            ));
        }

        if let Some(ref url) = self.alerts.webhook_url {
            response::alerter::validate_webhook_url(url)?;
        }
        Ok(())
    }

    /// Alert label for this run.
    pub fn label(&self) -> String {
        self.detection
            .label
            .clone()
            .unwrap_or_else(|| self.source.mode.label().to_string())
    }
}

// ---------------------------------------------------------------------------
// Core Types
// ---------------------------------------------------------------------------

/// A single authentication failure attributed to an origin key.
///
/// This is the atomic unit of observation. Normalizers produce these;
/// the detection engine consumes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEvent {
    /// When the failure happened.
    pub timestamp: DateTime<Utc>,

    /// Origin of the failure, `UNKNOWN_KEY` when it could not be extracted.
    pub key: String,
}

impl AuthEvent {
    /// Build an event, substituting `UNKNOWN_KEY` for an absent or empty key.
    pub fn new(timestamp: DateTime<Utc>, key: Option<String>) -> Self {
        let key = match key {
            Some(k) if !k.is_empty() => k,
            _ => UNKNOWN_KEY.to_string(),
        };
        Self { timestamp, key }
    }
}

/// A brute-force alert for one key at one observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    /// Which input family raised it (e.g. `LINUX`, `WINDOWS`).
    pub label: String,

    /// The key whose window crossed the threshold.
    pub key: String,

    /// Failures in the window including the triggering one.
    pub count: usize,

    /// Window length in seconds.
    pub window_secs: u64,

    /// Oldest failure still inside the window, i.e. where the burst starts.
    pub first_seen: DateTime<Utc>,

    /// Timestamp of the triggering failure.
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    /// ISO-8601 timestamp without offset, fractional seconds only when present.
    pub fn iso_timestamp(&self) -> String {
        iso(&self.timestamp)
    }

    pub fn iso_first_seen(&self) -> String {
        iso(&self.first_seen)
    }

    /// The alert as a single-line JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "label": self.label,
            "key": self.key,
            "count": self.count,
            "window_secs": self.window_secs,
            "first_seen": self.iso_first_seen(),
            "timestamp": self.iso_timestamp(),
            "message": self.to_string(),
        })
    }
}

fn iso(ts: &DateTime<Utc>) -> String {
    ts.naive_utc().format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[ALERT] {} possible brute force: key={} count={} window={}s at {}",
            self.label,
            self.key,
            self.count,
            self.window_secs,
            self.iso_timestamp(),
        )
    }
}
