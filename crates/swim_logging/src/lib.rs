//! Shared logging setup for SWIM binaries.
//!
//! Installs a `tracing` registry with two outputs: a daily log file under
//! `$SWIM_HOME/logs` written through a non-blocking worker, and stderr.
//! `RUST_LOG` overrides the default filter.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "swim_dispatcher=info,swim_logging=info";
const VERBOSE_LOG_FILTER: &str = "swim_dispatcher=debug,swim_logging=debug";
const DEFAULT_MAX_LOG_FILES: usize = 14;

/// Logging configuration shared by SWIM binaries.
#[derive(Debug, Clone)]
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Debug output on stderr regardless of `RUST_LOG`.
    pub verbose: bool,
    /// Overrides the log directory (defaults to `$SWIM_HOME/logs`).
    pub log_dir: Option<PathBuf>,
    /// Daily files kept before the oldest is removed.
    pub max_log_files: usize,
}

impl<'a> LogConfig<'a> {
    pub fn new(app_name: &'a str) -> Self {
        Self {
            app_name,
            verbose: false,
            log_dir: None,
            max_log_files: DEFAULT_MAX_LOG_FILES,
        }
    }
}

/// Keeps the background log writer alive. Buffered lines are flushed when
/// it is dropped, so hold it until the process exits.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    _worker: WorkerGuard,
}

/// Initialize tracing with a daily log file and stderr output.
pub fn init_logging(config: LogConfig<'_>) -> Result<LoggingGuard> {
    let log_dir = match config.log_dir {
        Some(dir) => dir,
        None => ensure_logs_dir()?,
    };
    let appender = file_appender(&log_dir, config.app_name, config.max_log_files)?;
    let (file_writer, worker) = tracing_appender::non_blocking(appender);

    let default_filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };
    let console_filter = if config.verbose {
        EnvFilter::new(VERBOSE_LOG_FILTER)
    } else {
        default_filter()
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(true)
                .with_filter(default_filter()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Global tracing subscriber already installed")?;

    Ok(LoggingGuard { _worker: worker })
}

/// Daily rotated `<app>.<date>.log` files in `dir`.
fn file_appender(dir: &Path, app_name: &str, max_log_files: usize) -> Result<RollingFileAppender> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(file_prefix(app_name))
        .filename_suffix("log")
        .max_log_files(max_log_files.max(1))
        .build(dir)
        .with_context(|| format!("Failed to open log file in {}", dir.display()))
}

/// SWIM home directory: `$SWIM_HOME` or `~/.swim`.
pub fn swim_home() -> PathBuf {
    match std::env::var_os("SWIM_HOME") {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".swim"),
    }
}

pub fn logs_dir() -> PathBuf {
    swim_home().join("logs")
}

/// Create the logs directory if needed and return it.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

/// App name usable as a file name prefix.
fn file_prefix(app_name: &str) -> String {
    let prefix: String = app_name
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .map(|ch| match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => ch,
            _ => '_',
        })
        .collect();
    if prefix.trim_matches('_').is_empty() {
        "swim".to_string()
    } else {
        prefix
    }
}
