//! Structured logging setup using `tracing-subscriber` and `tracing-appender`.
//!
//! Two modes:
//! - **Daemon** ([`init_daemon`]): console layer, plus a JSON file layer with
//!   daily rotation while debug logging is enabled
//! - **CLI** ([`init_cli`]): console-only for one-shot subcommands

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// File name prefix for rotated debug logs.
pub const LOG_FILE_PREFIX: &str = "ifguard.log";

/// Holds the non-blocking writer guard for file logging.
///
/// Must be kept alive for the duration of the process. Dropping it flushes
/// pending log entries and closes the file.
pub struct LoggingGuard {
    _guard: Option<WorkerGuard>,
}

impl LoggingGuard {
    /// Whether a file layer is attached.
    pub fn writes_file(&self) -> bool {
        self._guard.is_some()
    }
}

/// Build the filter: `RUST_LOG` wins, then the configured level.
///
/// Debug mode raises the configured level to at least `debug`.
pub fn filter_directive(level: &str, debug: bool) -> String {
    if debug && matches!(level, "error" | "warn" | "info") {
        "debug".to_owned()
    } else {
        level.to_owned()
    }
}

/// Initialise logging for the `run` subcommand.
///
/// Always emits human-readable output to stderr. When `debug` is set, also
/// writes JSON lines to `{logs_dir}/ifguard.log.YYYY-MM-DD`.
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created or a global
/// subscriber is already installed.
pub fn init_daemon(logs_dir: &Path, level: &str, debug: bool) -> anyhow::Result<LoggingGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(level, debug)));

    let (json_layer, guard) = if debug {
        std::fs::create_dir_all(logs_dir).map_err(|e| {
            anyhow::anyhow!(
                "failed to create logs directory {}: {e}",
                logs_dir.display()
            )
        })?;

        let file_appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_thread_names(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install subscriber: {e}"))?;

    Ok(LoggingGuard { _guard: guard })
}

/// Initialise minimal logging for one-shot subcommands.
///
/// Emits human-readable output to stderr only. Controlled by `RUST_LOG`
/// (default: `info`).
pub fn init_cli() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}
