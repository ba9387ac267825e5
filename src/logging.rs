//! Tracing subscriber setup.
//!
//! Human-readable logs go to stderr so they never mix with command output on
//! stdout. When enabled, a second layer writes daily-rolled files under
//! `.conductor/logs/`, optionally as JSON lines.

use crate::conductor_config::LoggingSection;
use anyhow::Result;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

/// Environment variable holding a filter directive for conductor.
pub const LOG_ENV: &str = "CONDUCTOR_LOG";

#[derive(Debug, Clone)]
pub struct LoggingOptions {
    pub level: String,
    pub verbose: bool,
    pub json: bool,
    /// Directory for the rolling log file; `None` disables file logging
    pub log_dir: Option<PathBuf>,
}

impl LoggingOptions {
    pub fn from_section(section: &LoggingSection, verbose: bool, log_dir: PathBuf) -> Self {
        Self {
            level: section.level.clone(),
            verbose,
            json: section.json,
            log_dir: section.file.then_some(log_dir),
        }
    }
}

/// Default directive when neither `CONDUCTOR_LOG` nor `RUST_LOG` is set.
pub fn default_directive(level: &str, verbose: bool) -> String {
    if verbose {
        "conductor=debug".to_string()
    } else {
        format!("conductor={}", level.trim().to_lowercase())
    }
}

fn build_filter(options: &LoggingOptions) -> EnvFilter {
    let fallback = default_directive(&options.level, options.verbose);
    if options.verbose {
        return EnvFilter::new(fallback);
    }
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Install the global subscriber. Keep the returned guard alive for the
/// life of the process so buffered file logs are flushed.
pub fn init(options: &LoggingOptions) -> Result<Option<WorkerGuard>> {
    let stderr_layer = fmt::layer()
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match &options.log_dir {
        Some(dir) if std::fs::create_dir_all(dir).is_ok() => {
            let appender = tracing_appender::rolling::daily(dir, "conductor.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = if options.json {
                fmt::layer().json().with_writer(writer).boxed()
            } else {
                fmt::layer().with_ansi(false).with_writer(writer).boxed()
            };
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(build_filter(options))
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(guard)
}
