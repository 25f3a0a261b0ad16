//! # Alert Delivery
//!
//! Alerts leave the detection engine through the `AlertSink` trait. The
//! engine never touches a file or the console itself, so callers choose
//! where alerts go and tests can capture them in memory.
//!
//! Delivery failures are errors, not warnings: an alert that cannot be
//! recorded stops the run.

pub mod alerter;

use crate::{Alert, AlertConfig, WatchError, WatchResult};

/// A destination for alerts.
///
/// `emit` takes `&self` and implementations serialize their own writes, so
/// a single sink can be shared by engines on several threads.
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;
    fn emit(&self, alert: &Alert) -> WatchResult<()>;
}

/// Delivers every alert to each of a list of sinks.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn AlertSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the sinks named by the `[alerts]` config section.
    ///
    /// The alert log is opened here, so an unwritable path fails before
    /// any input is read.
    pub fn from_config(config: &AlertConfig) -> WatchResult<Self> {
        let mut fanout = Self::new();
        if config.console {
            fanout.add(Box::new(alerter::ConsoleSink));
        }
        if let Some(ref path) = config.alert_log_path {
            fanout.add(Box::new(alerter::FileSink::open(path, config.alert_format)?));
        }
        if let Some(ref url) = config.webhook_url {
            fanout.add(Box::new(alerter::WebhookSink::new(url)?));
        }
        if fanout.is_empty() {
            log::warn!("No alert sinks configured; alerts will only be counted");
        }
        Ok(fanout)
    }

    pub fn add(&mut self, sink: Box<dyn AlertSink>) {
        log::info!("Registered alert sink: {}", sink.name());
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl AlertSink for FanoutSink {
    fn name(&self) -> &str {
        "fanout"
    }

    /// Every sink is attempted; the first failure is returned.
    fn emit(&self, alert: &Alert) -> WatchResult<()> {
        let mut first_error: Option<WatchError> = None;
        for sink in &self.sinks {
            if let Err(e) = sink.emit(alert) {
                log::error!("[ALERT] {} sink failed for {}: {}", sink.name(), alert.key, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
