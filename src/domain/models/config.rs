//! Configuration model.
//!
//! Pure data consumed by the figment loader in `infrastructure::config` and
//! by `Simulation::new`. Defaults here are the programmatic baseline that
//! config files and `SCARAB_*` environment variables override.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub simulation: SimulationConfig,
    pub logging: LoggingConfig,
}

/// Driver and sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub sink: SinkConfig,
    /// Capacity of the broadcast channel between the router and the sink.
    pub event_channel_capacity: usize,
    /// How long the driver sleeps between control checks while paused (ms).
    pub idle_poll_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            sink: SinkConfig::default(),
            event_channel_capacity: 1024,
            idle_poll_ms: 250,
        }
    }
}

/// WebSocket sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Whether to start the WebSocket server at all. Disabled leaves a
    /// fully functional in-process simulator.
    pub enabled: bool,
    pub host: String,
    /// Port to listen on; 0 binds an ephemeral port.
    pub port: u16,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self { enabled: true, host: "127.0.0.1".to_string(), port: 12345 }
    }
}

/// Logging output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Log file rotation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    Daily,
    Hourly,
    Never,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level directive: trace, debug, info, warn, error.
    pub level: String,
    pub format: LogFormat,
    /// When set, logs are also written to rotating JSON files in this
    /// directory.
    pub log_dir: Option<PathBuf>,
    pub rotation: RotationPolicy,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            log_dir: None,
            rotation: RotationPolicy::Daily,
        }
    }
}
