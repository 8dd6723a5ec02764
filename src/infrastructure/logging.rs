//! Tracing subscriber setup.
//!
//! Stdout layer in the configured format plus an optional daily-rotated JSON
//! file under the data directory. The returned guard must live as long as
//! the process so the non-blocking writer flushes on shutdown.

use anyhow::{anyhow, Result};
use std::io;
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use super::config::LoggingConfig;

/// Keeps the file writer alive; hold onto it in `main`.
pub struct LogGuard {
    _guard: Option<WorkerGuard>,
}

/// Initialize the global subscriber. Call once, early.
pub fn init(config: &LoggingConfig, log_dir: &Path) -> Result<LogGuard> {
    let default_level = parse_log_level(&config.level)?;
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let (file_layer, guard) = if config.file {
        let appender = rolling::daily(log_dir, "cos.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let stdout_layer = match config.format.as_str() {
        "json" => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(io::stdout)
            .with_target(true)
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .with_writer(io::stdout)
            .with_target(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    Ok(LogGuard { _guard: guard })
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(anyhow!("unknown log level: {other}")),
    }
}
