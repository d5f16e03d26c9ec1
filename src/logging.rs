//! Tracing setup.
//!
//! Two layers: a debug log file at `<logging.dir>/llkms.log` and a terse
//! stderr layer (`warn`, or `debug` with `--verbose`). `RUST_LOG` overrides
//! the stderr filter.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LoggingConfig;

pub const LOG_FILE_NAME: &str = "llkms.log";

pub fn log_file_path(config: &LoggingConfig) -> PathBuf {
    config.dir.join(LOG_FILE_NAME)
}

/// Install the global subscriber.
///
/// If the log file cannot be opened, logging continues on stderr only.
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let stderr_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(stderr_filter);

    let (file_layer, file_error) = match open_log_file(config) {
        Ok(file) => {
            let file_filter = EnvFilter::try_new(format!("warn,llkms={}", config.level))
                .with_context(|| format!("Invalid logging.level: {}", config.level))?;
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .with_filter(file_filter);
            (Some(layer), None)
        }
        Err(e) => (None, Some(e)),
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    if let Some(e) = file_error {
        tracing::warn!(error = %format!("{:#}", e), "file logging disabled");
    }
    Ok(())
}

fn open_log_file(config: &LoggingConfig) -> Result<std::fs::File> {
    std::fs::create_dir_all(&config.dir)
        .with_context(|| format!("Failed to create log directory: {}", config.dir.display()))?;
    let path = log_file_path(config);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))
}
