use anyhow::{anyhow, Result};
use std::io;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::domain::models::config::{LogFormat, LoggingConfig, RotationPolicy};

/// Keeps the non-blocking file writer alive for the lifetime of the process.
pub struct LogGuard {
    _guard: Option<WorkerGuard>,
}

/// Initialize the global tracing subscriber from the logging configuration.
///
/// Stdout always gets a layer in the configured format; when `log_dir` is
/// set, a rotating JSON file layer is added as well. Returns a guard that
/// must be held for file logging to flush.
///
/// # Errors
///
/// Fails when the level is unknown or a subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<LogGuard> {
    let default_level = parse_log_level(&config.level)?;
    let env_filter = || {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    };

    let guard = if let Some(ref log_dir) = config.log_dir {
        let file_appender = match config.rotation {
            RotationPolicy::Daily => rolling::daily(log_dir, "scarab.log"),
            RotationPolicy::Hourly => rolling::hourly(log_dir, "scarab.log"),
            RotationPolicy::Never => rolling::never(log_dir, "scarab.log"),
        };
        let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

        // File output is always JSON for structured processing.
        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking_file)
            .with_ansi(false)
            .with_target(true)
            .with_filter(env_filter());

        match config.format {
            LogFormat::Json => {
                let stdout_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(io::stdout)
                    .with_target(true)
                    .with_filter(env_filter());
                tracing_subscriber::registry().with(file_layer).with(stdout_layer).try_init()?;
            }
            LogFormat::Pretty => {
                let stdout_layer = tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(io::stdout)
                    .with_filter(env_filter());
                tracing_subscriber::registry().with(file_layer).with(stdout_layer).try_init()?;
            }
        }
        Some(guard)
    } else {
        match config.format {
            LogFormat::Json => {
                let stdout_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(io::stdout)
                    .with_target(true)
                    .with_filter(env_filter());
                tracing_subscriber::registry().with(stdout_layer).try_init()?;
            }
            LogFormat::Pretty => {
                let stdout_layer = tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(io::stdout)
                    .with_filter(env_filter());
                tracing_subscriber::registry().with(stdout_layer).try_init()?;
            }
        }
        None
    };

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_levels_parse_case_insensitively() {
        assert_eq!(parse_log_level("INFO").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
        assert!(parse_log_level("loud").is_err());
    }
}
