// file: src/logging/logger.rs
// version: 2.0.0
// guid: j0k1l2m3-n4o5-6789-0123-456789jklmno

//! Logger initialization and configuration

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{BootstrapError, Result};
use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use super::rotation::rotate_if_needed;

/// Timestamps from a monotonic clock anchored at the wall-clock start time.
/// Successive values never decrease, even if the system clock is stepped.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicTime {
    wall_start: DateTime<Utc>,
    start: Instant,
}

impl MonotonicTime {
    pub fn new() -> Self {
        Self {
            wall_start: Utc::now(),
            start: Instant::now(),
        }
    }

    /// Current timestamp on this clock
    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.start.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.wall_start + elapsed
    }
}

impl Default for MonotonicTime {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatTime for MonotonicTime {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", self.now().format("%Y-%m-%dT%H:%M:%S%.6fZ"))
    }
}

/// Initialize the logging system
///
/// Rotates the log file if it has grown past the configured size, then
/// installs a console layer on stderr and an append-only file layer. When the log
/// file cannot be opened and `require_file` is false, logging continues on
/// the console only and `Ok(None)` is returned.
pub fn init_logger(config: &LoggingConfig, quiet: bool, require_file: bool) -> Result<Option<PathBuf>> {
    let level = if quiet { "error" } else { config.level.as_str() };
    let timer = MonotonicTime::new();

    let (file_layer, log_path) = match open_log_file(config) {
        Ok(file) => {
            let layer = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_timer(timer)
                .with_writer(Arc::new(file))
                .with_filter(EnvFilter::new(config.level.as_str()));
            (Some(layer), Some(config.file.clone()))
        }
        Err(e) if !require_file => {
            eprintln!(
                "warning: log file {} unavailable ({}); logging to console only",
                config.file.display(),
                e
            );
            (None, None)
        }
        Err(e) => return Err(e),
    };

    let (compact, json) = match config.format {
        LogFormat::Compact => (
            Some(
                fmt::layer()
                    .with_target(false)
                    .with_timer(timer)
                    .with_writer(std::io::stderr)
                    .compact()
                    .with_filter(EnvFilter::new(level)),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                fmt::layer()
                    .json()
                    .with_timer(timer)
                    .with_writer(std::io::stderr)
                    .with_filter(EnvFilter::new(level)),
            ),
        ),
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(compact)
        .with(json)
        .try_init()
        .map_err(|e| BootstrapError::config(format!("Failed to initialize logger: {}", e)))?;

    if let Some(path) = &log_path {
        tracing::debug!("Logging to console and {}", path.display());
    }
    Ok(log_path)
}

fn open_log_file(config: &LoggingConfig) -> Result<fs::File> {
    if let Some(parent) = config.file.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    rotate_if_needed(&config.file, config.max_size_mb * 1024 * 1024, config.keep_archives)?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.file)
        .map_err(|e| {
            BootstrapError::config(format!(
                "Failed to open log file {}: {}",
                config.file.display(),
                e
            ))
        })?;
    Ok(file)
}
