//! Tracing setup shared by every tasklet binary.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{LogConfig, paths};

const LOG_FILE_PREFIX: &str = "tasklet.log";

/// Builds the filter: `RUST_LOG` if set and valid, else the configured level.
fn build_filter(configured: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber.
///
/// With `log.file` enabled, events go to a daily-rolling file under
/// `$TASKLET_HOME/logs`; the returned guard must live until exit so buffered
/// lines are flushed. Otherwise events go to stderr and no guard is returned.
///
/// Calling this twice is harmless: the second subscriber is dropped.
///
/// # Errors
/// Returns an error if the log directory cannot be created.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(&config.level);

    if config.file {
        let (writer, guard) = file_writer(&paths::logs_dir())?;
        let _ = fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(writer)
            .try_init();
        return Ok(Some(guard));
    }

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
    Ok(None)
}

fn file_writer(dir: &Path) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    Ok(tracing_appender::non_blocking(appender))
}
