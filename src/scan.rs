//! # Scan Orchestration
//!
//! Wires a `WatchConfig` to its inputs, one `DetectionEngine` per input
//! path, and a shared `AlertSink`.
//!
//! Order of work:
//! 1. Validate the configuration
//! 2. Build every engine and open every input (nothing is read yet)
//! 3. Drain each input through its engine, on its own scoped thread when
//!    there is more than one
//!
//! Steps 1 and 2 finish before any record is processed, so a bad setting
//! or a missing file never leaves a partial run behind.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::detection::{DetectionEngine, EngineStats};
use crate::log_sources::security_csv::{self, EventRow, SecurityEventNormalizer};
use crate::log_sources::syslog::SyslogNormalizer;
use crate::log_sources::tail::{FollowOptions, TailLines};
use crate::log_sources::SourceMode;
use crate::response::AlertSink;
use crate::{WatchConfig, WatchError, WatchResult};

/// Number of keys listed in a run summary.
pub const TOP_KEYS: usize = 5;

/// Outcome of scanning one input path.
#[derive(Debug, Clone)]
pub struct ScanSummary {
    pub path: PathBuf,
    pub stats: EngineStats,

    /// Keys still holding window state at the end of the run.
    pub keys_tracked: usize,

    /// Keys with the most failures over the whole run, most first.
    pub top_keys: Vec<(String, u64)>,
}

impl ScanSummary {
    fn from_engine(path: &Path, engine: &DetectionEngine) -> Self {
        Self {
            path: path.to_path_buf(),
            stats: engine.stats(),
            keys_tracked: engine.tracker().key_count(),
            top_keys: engine.top_keys(TOP_KEYS),
        }
    }
}

/// An opened input, ready to be drained.
enum Input {
    Lines(TailLines),
    Rows(Box<dyn Iterator<Item = EventRow> + Send>),
}

struct Job {
    path: PathBuf,
    input: Input,
    engine: DetectionEngine,
}

/// Run a complete scan and return one summary per input path, in the order
/// the paths were configured.
///
/// `shutdown` is checked before every record: once raised, each input stops
/// where it is and the summaries cover what was read so far. It is also
/// raised when any input fails, so the remaining inputs stop instead of
/// following forever.
pub fn run_scan(
    config: &WatchConfig,
    sink: &dyn AlertSink,
    shutdown: Arc<AtomicBool>,
) -> WatchResult<Vec<ScanSummary>> {
    config.validate()?;

    let jobs = prepare(config, &shutdown)?;
    info_banner(config, jobs.len());

    let summaries = if jobs.len() == 1 {
        jobs.into_iter()
            .map(|job| drain(job, config, sink, &shutdown))
            .collect::<WatchResult<Vec<_>>>()?
    } else {
        std::thread::scope(|s| {
            let handles: Vec<_> = jobs
                .into_iter()
                .map(|job| {
                    let shutdown = &shutdown;
                    s.spawn(move || drain(job, config, sink, shutdown))
                })
                .collect();

            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| {
                        Err(WatchError::Source("scan thread panicked".to_string()))
                    })
                })
                .collect::<WatchResult<Vec<_>>>()
        })?
    };

    for summary in &summaries {
        log_summary(summary);
    }
    Ok(summaries)
}

fn info_banner(config: &WatchConfig, inputs: usize) {
    let d = &config.detection;
    log::info!(
        "Scanning {} input(s) in {} mode: threshold={} window={}s follow={}",
        inputs,
        config.source.mode,
        d.threshold,
        d.window_secs,
        config.source.follow,
    );
    if let Some(cooldown) = d.alert_cooldown_secs {
        log::info!("Alert cooldown enabled: {}s per key", cooldown);
    }
    if let Some(idle) = d.idle_key_expiry_secs {
        log::info!("Idle key expiry enabled: {}s", idle);
    }
}

/// Build engines and open inputs for every configured path.
fn prepare(config: &WatchConfig, shutdown: &Arc<AtomicBool>) -> WatchResult<Vec<Job>> {
    let source = &config.source;
    let follow = source.follow.then(|| FollowOptions {
        poll_interval: Duration::from_millis(source.poll_interval_ms),
        shutdown: shutdown.clone(),
    });

    source
        .paths
        .iter()
        .map(|path| {
            let engine = DetectionEngine::from_config(&config.detection, config.label())?;
            let mut input = open_input(path, source.mode, follow.clone())?;
            if let Input::Lines(ref mut lines) = input {
                if source.start_at_end {
                    lines.seek_to_end()?;
                    log::info!("Skipped existing content of {} ({} bytes)", path.display(), lines.offset());
                }
            }
            Ok(Job {
                path: path.clone(),
                input,
                engine,
            })
        })
        .collect()
}

fn open_input(path: &Path, mode: SourceMode, follow: Option<FollowOptions>) -> WatchResult<Input> {
    let opened = match mode {
        SourceMode::Linux => TailLines::open(path, follow).map(Input::Lines),
        SourceMode::Windows => security_csv::read_rows(path)
            .map(|rows| Input::Rows(Box::new(rows) as Box<dyn Iterator<Item = EventRow> + Send>)),
    };
    opened.map_err(|e| {
        log::error!("Cannot open {} input {}: {}", mode, path.display(), e);
        WatchError::Source(format!("{}: {}", path.display(), e))
    })
}

fn drain(
    job: Job,
    config: &WatchConfig,
    sink: &dyn AlertSink,
    shutdown: &AtomicBool,
) -> WatchResult<ScanSummary> {
    let Job {
        path,
        input,
        mut engine,
    } = job;
    log::info!("Reading {}", path.display());

    let result = match input {
        Input::Lines(lines) => {
            let normalizer = SyslogNormalizer::with_markers(
                config.source.failure_markers.clone(),
                config.source.assume_year,
            );
            emit_all(engine.run(lines.take_while(|_| !shutdown.load(Ordering::SeqCst)), normalizer), sink)
        }
        Input::Rows(rows) => emit_all(
            engine.run(
                rows.take_while(|_| !shutdown.load(Ordering::SeqCst)),
                SecurityEventNormalizer::new(),
            ),
            sink,
        ),
    };
    if shutdown.load(Ordering::SeqCst) {
        log::info!("Stopped reading {} on shutdown", path.display());
    }

    if let Err(e) = result {
        shutdown.store(true, Ordering::SeqCst);
        return Err(e);
    }
    Ok(ScanSummary::from_engine(&path, &engine))
}

fn emit_all(alerts: impl Iterator<Item = crate::Alert>, sink: &dyn AlertSink) -> WatchResult<()> {
    for alert in alerts {
        sink.emit(&alert)?;
    }
    Ok(())
}

fn log_summary(summary: &ScanSummary) {
    let s = &summary.stats;
    log::info!(
        "{}: {} records, {} discarded, {} failures, {} alerts ({} suppressed), {} keys tracked",
        summary.path.display(),
        s.records,
        s.discarded,
        s.failures,
        s.alerts,
        s.suppressed,
        summary.keys_tracked,
    );
    for (key, total) in &summary.top_keys {
        log::info!("  {:>6}  {}", total, key);
    }
}
