//! Tracing setup.
//!
//! jobwatch never logs to the terminal: stdout carries query results (often
//! JSON) and the HTTP server has no console. Everything goes to a daily
//! rolling file under `$XDG_STATE_HOME/jobwatch/`.

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const FALLBACK_LEVEL: &str = "info";

/// Keeps the background writer alive. Dropping it flushes buffered lines.
pub struct LoggingGuard {
    _writer: WorkerGuard,
}

/// Install the global subscriber, writing under [`Config::state_dir`].
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    init_in(&Config::state_dir(), config)
}

/// Install the global subscriber, writing `jobwatch.log.<date>` into `dir`.
///
/// `RUST_LOG` wins over the configured level. A level string that does not
/// parse falls back to `info` and is reported once the subscriber is up.
pub fn init_in(dir: &Path, config: &LoggingConfig) -> Result<LoggingGuard> {
    std::fs::create_dir_all(dir)?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("jobwatch.log")
        .max_log_files(config.max_files.max(1))
        .build(dir)
        .map_err(|e| Error::Config(format!("failed to create log appender: {}", e)))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let env = std::env::var("RUST_LOG").ok();
    let (filter, rejected) = build_filter(env.as_deref(), &config.level);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_line_number(true),
        )
        .try_init()
        .map_err(|e| Error::Config(format!("logging already initialized: {}", e)))?;

    if let Some(level) = rejected {
        tracing::warn!(%level, fallback = FALLBACK_LEVEL, "Ignoring invalid log level");
    }
    tracing::info!(dir = %dir.display(), "Logging to file");

    Ok(LoggingGuard { _writer: guard })
}

/// Filter from `RUST_LOG` if set and valid, else from the configured level.
///
/// Returns the configured level alongside the filter when it had to be
/// replaced with the fallback.
fn build_filter(env: Option<&str>, level: &str) -> (EnvFilter, Option<String>) {
    if let Some(filter) = env.and_then(|directives| EnvFilter::try_new(directives).ok()) {
        return (filter, None);
    }
    match EnvFilter::try_new(level) {
        Ok(filter) => (filter, None),
        Err(_) => (EnvFilter::new(FALLBACK_LEVEL), Some(level.to_string())),
    }
}
