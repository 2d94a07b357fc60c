//! Shared logging utilities for Runwatch binaries.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "runwatch_sentinel=info,runwatch_store=info";
const VERBOSE_LOG_FILTER: &str = "runwatch_sentinel=debug,runwatch_store=debug,info";
const MAX_LOG_FILES: usize = 7;

/// Logging configuration shared by Runwatch binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
    /// Directory for daily rolling log files. Console only when `None`.
    pub log_dir: Option<&'a Path>,
}

/// Keeps the non-blocking file writer alive. Drop it last in `main`.
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Initialize tracing with stderr output and an optional rolling file writer.
///
/// `RUST_LOG` overrides the default filter for both layers.
pub fn init_logging(config: LogConfig<'_>) -> Result<LogGuard> {
    let base_filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(if config.verbose {
                VERBOSE_LOG_FILTER
            } else {
                DEFAULT_LOG_FILTER
            })
        })
    };

    let (file_layer, guard) = match config.log_dir {
        Some(dir) => {
            let appender = rolling_appender(dir, config.app_name)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(base_filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(base_filter()),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(LogGuard { _file: guard })
}

fn rolling_appender(dir: &Path, app_name: &str) -> Result<RollingFileAppender> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create logs directory: {}", dir.display()))?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(sanitize_name(app_name))
        .filename_suffix("log")
        .max_log_files(MAX_LOG_FILES)
        .build(dir)
        .with_context(|| format!("Failed to open log file for {}", app_name))
}

/// Default log directory under the Runwatch home.
pub fn default_logs_dir() -> PathBuf {
    runwatch_home().join("logs")
}

/// `$RUNWATCH_HOME`, or `./.runwatch` when unset.
pub fn runwatch_home() -> PathBuf {
    std::env::var_os("RUNWATCH_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".runwatch"))
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("runwatch-sentinel"), "runwatch-sentinel");
        assert_eq!(sanitize_name("a b/c"), "a_b_c");
    }

    #[test]
    fn test_rolling_appender_creates_dir() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().join("nested").join("logs");
        let _appender = rolling_appender(&dir, "sentinel").unwrap();
        assert!(dir.is_dir());
    }
}
