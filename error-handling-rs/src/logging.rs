//! # Structured Logging
//!
//! Installs the global `tracing` subscriber: an env filter, a console layer
//! (JSON or human readable) and an optional daily rolling file.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

use crate::types::{Error, ErrorKind, Result};

// Flag to track if logging has been initialized
static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Configuration for the logging system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// The log level to use (trace, debug, info, warn, error)
    pub level: String,
    /// The service name, also used as the log file prefix
    pub service_name: String,
    /// Whether to use JSON formatting on the console
    pub json_format: bool,
    /// Directory for the daily rolling log file, if any
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            service_name: "health-monitor".to_string(),
            json_format: false,
            log_dir: None,
        }
    }
}

/// Initializes the structured logging system.
///
/// Returns the guard of the non-blocking file writer when a log directory is
/// configured; the caller must keep it alive for buffered lines to be
/// flushed. Calling this more than once is a no-op returning `Ok(None)`.
pub fn init_logging(config: LoggingConfig) -> Result<Option<WorkerGuard>> {
    if LOGGING_INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(None);
    }

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},hyper=warn,reqwest=warn", config.level)));

    let json_layer = config.json_format.then(|| {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true)
    });

    let text_layer = (!config.json_format).then(|| fmt::layer().with_target(true));

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                Error::new(
                    ErrorKind::Initialization,
                    format!("Failed to create log directory {}: {}", dir.display(), e),
                )
                .cause(e)
            })?;

            let appender = RollingFileAppender::new(
                Rotation::DAILY,
                dir,
                format!("{}.log", config.service_name),
            );
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);

            let layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = Registry::default()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer);

    tracing::subscriber::set_global_default(subscriber).map_err(|e| {
        Error::new(
            ErrorKind::Initialization,
            format!("Failed to set global subscriber: {}", e),
        )
    })?;

    tracing::info!(
        service = %config.service_name,
        level = %config.level,
        json = %config.json_format,
        log_dir = ?config.log_dir,
        "Structured logging initialized"
    );

    Ok(guard)
}
