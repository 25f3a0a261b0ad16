//! # Alert Sinks
//!
//! Concrete destinations for alerts:
//! - `ConsoleSink`: the alert line on stdout
//! - `FileSink`: append-only alert log, text lines, JSON lines or CSV rows
//! - `WebhookSink`: HTTP POST of the alert as JSON (via ureq)
//! - `MemorySink`: keeps alerts in memory, for tests and embedding
//!
//! Every sink serializes its own writes, so one sink can be shared by
//! engines running on different threads without interleaving records.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::response::AlertSink;
use crate::{Alert, AlertFormat, WatchError, WatchResult};

/// Header of a CSV alert log.
pub const CSV_HEADER: &str = "label,key,first_seen,last_seen,count,window_secs";

fn poisoned(sink: &str) -> WatchError {
    WatchError::Alert(format!("{} sink lock poisoned", sink))
}

// ---------------------------------------------------------------------------
// Console
// ---------------------------------------------------------------------------

/// Prints each alert line to stdout.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl AlertSink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    fn emit(&self, alert: &Alert) -> WatchResult<()> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        writeln!(out, "{}", alert)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Alert log file
// ---------------------------------------------------------------------------

/// Appends one line per alert to a file.
///
/// The file and its parent directories are created on construction, so an
/// unwritable location fails before any input is read.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    format: AlertFormat,
    file: Mutex<File>,
}

impl FileSink {
    pub fn open(path: &Path, format: AlertFormat) -> WatchResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if format == AlertFormat::Csv && file.metadata()?.len() == 0 {
            writeln!(file, "{}", CSV_HEADER)?;
        }
        log::info!("Alert log: {} ({:?})", path.display(), format);

        Ok(Self {
            path: path.to_path_buf(),
            format,
            file: Mutex::new(file),
        })
    }

    fn render(&self, alert: &Alert) -> WatchResult<String> {
        match self.format {
            AlertFormat::Text => Ok(alert.to_string()),
            AlertFormat::Json => Ok(serde_json::to_string(&alert.to_json())?),
            AlertFormat::Csv => {
                let mut wtr = csv::WriterBuilder::new()
                    .has_headers(false)
                    .from_writer(Vec::new());
                wtr.write_record([
                    alert.label.as_str(),
                    alert.key.as_str(),
                    alert.iso_first_seen().as_str(),
                    alert.iso_timestamp().as_str(),
                    alert.count.to_string().as_str(),
                    alert.window_secs.to_string().as_str(),
                ])?;
                let bytes = wtr
                    .into_inner()
                    .map_err(|e| WatchError::Alert(format!("csv buffer: {}", e)))?;
                Ok(String::from_utf8_lossy(&bytes).trim_end().to_string())
            }
        }
    }
}

impl AlertSink for FileSink {
    fn name(&self) -> &str {
        "alert-log"
    }

    fn emit(&self, alert: &Alert) -> WatchResult<()> {
        let line = self.render(alert)?;

        let mut file = self.file.lock().map_err(|_| poisoned(self.name()))?;
        writeln!(file, "{}", line)
            .and_then(|_| file.flush())
            .map_err(|e| {
                log::error!("Failed to write alert to {}: {}", self.path.display(), e);
                WatchError::Alert(format!("{}: {}", self.path.display(), e))
            })
    }
}

// ---------------------------------------------------------------------------
// Webhook
// ---------------------------------------------------------------------------

/// Check that a webhook URL uses http or https.
pub fn validate_webhook_url(url: &str) -> WatchResult<()> {
    if !url.starts_with("https://") && !url.starts_with("http://") {
        return Err(WatchError::Config(format!(
            "Webhook URL must start with http:// or https://, got: {}",
            url
        )));
    }
    Ok(())
}

/// POSTs each alert as JSON. Compatible with Slack-style incoming webhooks
/// (the `text` field) and generic JSON receivers.
///
/// Timeout: 5 seconds. A failed delivery is an error like any other sink
/// failure.
pub struct WebhookSink {
    url: String,
    agent: ureq::Agent,
}

impl WebhookSink {
    pub fn new(url: &str) -> WatchResult<Self> {
        validate_webhook_url(url)?;
        let agent = ureq::AgentBuilder::new()
            .timeout(std::time::Duration::from_secs(5))
            .build();
        Ok(Self {
            url: url.to_string(),
            agent,
        })
    }

    fn payload(alert: &Alert) -> serde_json::Value {
        let mut payload = alert.to_json();
        payload["text"] = serde_json::Value::String(alert.to_string());
        payload
    }
}

impl AlertSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    fn emit(&self, alert: &Alert) -> WatchResult<()> {
        let body = serde_json::to_string(&Self::payload(alert))?;
        match self
            .agent
            .post(&self.url)
            .set("Content-Type", "application/json")
            .send_string(&body)
        {
            Ok(response) => {
                log::debug!(
                    "[WEBHOOK] POST to {} succeeded (status {}): {}",
                    self.url,
                    response.status(),
                    alert.key,
                );
                Ok(())
            }
            Err(e) => {
                log::error!("[WEBHOOK] POST to {} failed: {}", self.url, e);
                Err(WatchError::Alert(format!("webhook {}: {}", self.url, e)))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Collects alerts in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    alerts: Mutex<Vec<Alert>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().map(|a| a.clone()).unwrap_or_default()
    }

    /// Alert lines as they would appear in a text alert log.
    pub fn messages(&self) -> Vec<String> {
        self.alerts().iter().map(Alert::to_string).collect()
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AlertSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn emit(&self, alert: &Alert) -> WatchResult<()> {
        self.alerts
            .lock()
            .map_err(|_| poisoned(self.name()))?
            .push(alert.clone());
        Ok(())
    }
}
