use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid event_channel_capacity: {0}. Must be at least 1")]
    InvalidChannelCapacity(usize),

    #[error("Invalid idle_poll_ms: {0}. Must be at least 1")]
    InvalidIdlePoll(u64),

    #[error("Sink host cannot be empty")]
    EmptySinkHost,
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .scarab/config.yaml (project config)
    /// 3. .scarab/local.yaml (project local overrides, optional)
    /// 4. Environment variables (SCARAB_* prefix, highest priority)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".scarab/config.yaml"))
            .merge(Yaml::file(".scarab/local.yaml"))
            .merge(Env::prefixed("SCARAB_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context("Failed to extract configuration from file")?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &Config) -> Result<(), ConfigError> {
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        if config.simulation.event_channel_capacity == 0 {
            return Err(ConfigError::InvalidChannelCapacity(
                config.simulation.event_channel_capacity,
            ));
        }
        if config.simulation.idle_poll_ms == 0 {
            return Err(ConfigError::InvalidIdlePoll(config.simulation.idle_poll_ms));
        }
        if config.simulation.sink.host.is_empty() {
            return Err(ConfigError::EmptySinkHost);
        }
        Ok(())
    }
}
