//! Logging setup
//!
//! Console output is pretty by default, JSON with `STREAMVAULT_LOG_FORMAT=json`.
//! `logging.directory` adds a daily-rolling JSON file.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_FILTER: &str = "streamvault=info";
const LOG_FORMAT_ENV: &str = "STREAMVAULT_LOG_FORMAT";
const LOG_FILE_PREFIX: &str = "streamvault.log";

/// Keeps the file writer flushing; hold it for the process lifetime
#[derive(Debug)]
pub struct TelemetryGuard {
    _guard: Option<WorkerGuard>,
}

pub fn init_tracing(log_dir: Option<&Path>) -> TelemetryGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let console = match std::env::var(LOG_FORMAT_ENV).as_deref() {
        // Production: JSON structured logging
        Ok("json") => fmt::layer().json().boxed(),
        _ => fmt::layer().pretty().boxed(),
    };

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            if let Err(e) = std::fs::create_dir_all(dir) {
                eprintln!("Warning: failed to create log directory {}: {}", dir.display(), e);
            }
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().json().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    if tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .with(env_filter)
        .try_init()
        .is_err()
    {
        return TelemetryGuard { _guard: None };
    }

    TelemetryGuard { _guard: guard }
}
