//! Structured logging setup using `tracing-subscriber` and
//! `tracing-appender`.
//!
//! Two modes:
//! - **Production** ([`init_production`]): JSON file layer with daily
//!   rotation plus a human-readable console layer
//! - **Embedded/CLI** ([`init_cli`]): console only
//!
//! The run's own audit record lives in the state telemetry; this module
//! only configures the operational log stream.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Holds the non-blocking writer guard for file logging.
///
/// Keep this alive for the duration of the process; dropping it flushes
/// pending entries and closes the file.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialise production logging.
///
/// Writes JSON logs to `{logs_dir}/armitage.log.YYYY-MM-DD` with daily
/// rotation and mirrors human-readable output to stderr. Verbosity is
/// controlled by `RUST_LOG` (default `info`).
///
/// # Errors
///
/// Fails when the logs directory cannot be created.
pub fn init_production(logs_dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir).map_err(|e| {
        anyhow::anyhow!("failed to create logs directory {}: {e}", logs_dir.display())
    })?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, "armitage.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().json().with_writer(non_blocking))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(LoggingGuard { _guard: guard })
}

/// Initialise console-only logging for embedded or one-shot use.
///
/// Controlled by `RUST_LOG` (default `info`).
pub fn init_cli() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}
