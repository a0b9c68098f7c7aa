//! Tracing setup for the harness binaries and tests.

use std::io;
use std::sync::Once;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// When set, logs are also written to a daily rolling file in this directory.
const LOG_DIR_ENV_NAME: &str = "LOG_DIR";

/// Set to `1` or `true` to see harness logs while running tests.
const ENABLE_TRACING_ENV_NAME: &str = "ENABLE_TRACING";

const DEFAULT_FILTER: &str = "info";

static INIT_TEST_TRACING: Once = Once::new();

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to bridge `log` records into tracing: {0}")]
    LogBridge(#[from] tracing_log::log::SetLoggerError),

    #[error("failed to install the global subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),

    #[error("failed to prepare log directory: {0}")]
    LogDirectory(#[from] io::Error),
}

/// Keeps the background file writer alive; buffered lines are flushed on drop.
#[must_use = "dropping the flusher stops file logging"]
pub struct LogFlusher {
    _guard: Option<WorkerGuard>,
}

/// Installs the global subscriber for a binary.
///
/// Filtering follows `RUST_LOG` and defaults to `info`. `log` records emitted by
/// dependencies are forwarded to tracing.
pub fn init_tracing(service_name: &str) -> Result<LogFlusher, TracingError> {
    tracing_log::LogTracer::init()?;

    let stdout_layer = fmt::layer()
        .with_target(true)
        .with_filter(env_filter());

    let (file_layer, guard) = match std::env::var(LOG_DIR_ENV_NAME) {
        Ok(directory) => {
            std::fs::create_dir_all(&directory)?;
            let appender = tracing_appender::rolling::daily(&directory, format!("{service_name}.log"));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(env_filter());

            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(service = service_name, "tracing initialized");

    Ok(LogFlusher { _guard: guard })
}

/// Installs a test-writer subscriber once per process when `ENABLE_TRACING` is set.
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        let enabled = std::env::var(ENABLE_TRACING_ENV_NAME)
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        if !enabled {
            return;
        }

        let _ = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_test_writer()
                    .with_filter(env_filter()),
            )
            .try_init();
    });
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_can_be_requested_repeatedly() {
        init_test_tracing();
        init_test_tracing();
    }
}
