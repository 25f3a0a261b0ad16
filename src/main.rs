//! # authwatch - CLI Entry Point
//!
//! Command-line interface for the authwatch brute-force detector.
//!
//! Commands:
//! - `scan`        - Read auth logs or event exports and raise alerts
//! - `init-config` - Generate a default configuration file

use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use authwatch::log_sources::SourceMode;
use authwatch::response::FanoutSink;
use authwatch::scan::{self, ScanSummary};
use authwatch::{AlertFormat, WatchConfig, WatchError, WatchResult};

/// authwatch - brute-force login detector.
///
/// Counts authentication failures per source address in a sliding window
/// and alerts when one address crosses the threshold. Detection only.
#[derive(Parser, Debug)]
#[command(name = "authwatch")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "authwatch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan one or more inputs for brute-force bursts.
    Scan(ScanArgs),

    /// Generate a default configuration file.
    InitConfig,
}

/// Flags that override the configuration file for one run.
#[derive(clap::Args, Debug, Default)]
struct ScanArgs {
    /// Input format: linux (syslog auth log) or windows (security event CSV).
    #[arg(short, long)]
    mode: Option<SourceMode>,

    /// Input file. Repeat for several inputs; each gets its own window state.
    #[arg(short, long = "path")]
    paths: Vec<PathBuf>,

    /// Failures within the window that raise an alert.
    #[arg(short, long)]
    threshold: Option<u32>,

    /// Window length in seconds.
    #[arg(short, long)]
    window: Option<u64>,

    /// Year for syslog timestamps (default: current year).
    #[arg(long)]
    year: Option<i32>,

    /// Keep reading as the log grows, until Ctrl-C.
    #[arg(short, long)]
    follow: bool,

    /// With --follow, ignore existing content and only read new lines.
    #[arg(long)]
    from_end: bool,

    /// Alert log file.
    #[arg(long)]
    alert_log: Option<PathBuf>,

    /// Alert log line format: text, json or csv.
    #[arg(long, value_parser = parse_format)]
    format: Option<AlertFormat>,

    /// Do not print alerts to stdout.
    #[arg(short, long)]
    quiet: bool,
}

fn parse_format(s: &str) -> Result<AlertFormat, String> {
    match s.to_ascii_lowercase().as_str() {
        "text" => Ok(AlertFormat::Text),
        "json" => Ok(AlertFormat::Json),
        "csv" => Ok(AlertFormat::Csv),
        other => Err(format!("unknown format '{}' (expected text, json or csv)", other)),
    }
}

fn main() -> WatchResult<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan(args) => cmd_scan(&cli.config, args),
        Commands::InitConfig => cmd_init_config(&cli.config),
    }
}

/// Load the config file if present, else defaults.
fn load_config(config_path: &Path) -> WatchResult<WatchConfig> {
    if config_path.exists() {
        info!("Loading configuration from: {}", config_path.display());
        WatchConfig::from_file(config_path)
    } else {
        info!("No config file found, using defaults. Run 'init-config' to generate one.");
        Ok(WatchConfig::default())
    }
}

/// Command-line flags win over file values.
fn apply_overrides(config: &mut WatchConfig, args: ScanArgs) {
    if let Some(mode) = args.mode {
        config.source.mode = mode;
    }
    if !args.paths.is_empty() {
        config.source.paths = args.paths;
    }
    if let Some(threshold) = args.threshold {
        config.detection.threshold = threshold;
    }
    if let Some(window) = args.window {
        config.detection.window_secs = window;
    }
    if args.year.is_some() {
        config.source.assume_year = args.year;
    }
    if args.follow {
        config.source.follow = true;
    }
    if args.from_end {
        config.source.start_at_end = true;
    }
    if args.alert_log.is_some() {
        config.alerts.alert_log_path = args.alert_log;
    }
    if let Some(format) = args.format {
        config.alerts.alert_format = format;
    }
    if args.quiet {
        config.alerts.console = false;
    }
}

/// Scan the configured inputs.
///
/// 1. Load configuration and apply flag overrides
/// 2. Validate (before any file is touched)
/// 3. Build the alert sinks
/// 4. Install the Ctrl-C handler that stops the scan
/// 5. Run the scan and print a summary per input
fn cmd_scan(config_path: &Path, args: ScanArgs) -> WatchResult<()> {
    let mut config = load_config(config_path)?;
    apply_overrides(&mut config, args);
    config.validate()?;

    let sink = FanoutSink::from_config(&config.alerts)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!("Could not install signal handler: {}. Use kill to stop.", e);
    }

    if config.source.follow {
        info!("Following input; press Ctrl-C to stop.");
    }

    let summaries = scan::run_scan(&config, &sink, shutdown.clone())?;

    if shutdown.load(Ordering::SeqCst) {
        info!("Shutdown signal received. Stopped.");
    }
    for summary in &summaries {
        print_summary(summary);
    }
    Ok(())
}

fn print_summary(summary: &ScanSummary) {
    let s = &summary.stats;
    println!();
    println!("Summary for {}", summary.path.display());
    println!("  Records read:      {}", s.records);
    println!("  Records discarded: {}", s.discarded);
    println!("  Failures observed: {}", s.failures);
    println!("  Alerts emitted:    {}", s.alerts);
    if s.suppressed > 0 {
        println!("  Alerts suppressed: {}", s.suppressed);
    }
    println!("  Keys tracked:      {}", summary.keys_tracked);
    if s.keys_expired > 0 {
        println!("  Keys expired:      {}", s.keys_expired);
    }
    if !summary.top_keys.is_empty() {
        println!("  Top keys:");
        for (key, total) in &summary.top_keys {
            println!("    {:>6}  {}", total, key);
        }
    }
}

/// Generate a default configuration file.
fn cmd_init_config(config_path: &Path) -> WatchResult<()> {
    if config_path.exists() {
        return Err(WatchError::Config(format!(
            "Configuration file already exists: {}. Remove it first or use a different path.",
            config_path.display()
        )));
    }

    WatchConfig::write_default(config_path)?;
    println!("Default configuration written to: {}", config_path.display());
    println!("Edit this file to point authwatch at your logs and tune detection.");
    println!();
    println!("Key settings to configure:");
    println!("  [source]    - mode (linux/windows) and paths of the logs to scan");
    println!("  [detection] - threshold (default 3) and window_secs (default 60)");
    println!("  [alerts]    - alert_log_path, alert_format (text/json/csv), webhook_url");

    Ok(())
}
