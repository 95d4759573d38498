//! Configuration management for dicechain
//!
//! Settings come from a TOML file (or the built-in defaults), then
//! `DICECHAIN_*` environment variables, then validation:
//!
//! ```toml
//! [transport]
//! relay_url = "ws://localhost:8080"
//!
//! [transport.retry]
//! initial = "500ms"
//! max = "5s"
//! multiplier = 1.5
//!
//! [game]
//! label = "friday night"
//!
//! [logging]
//! level = "info"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::constants::PROTOCOL_VERSION;
use crate::transport::RetrySchedule;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(String),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid value for {var}: {value:?}")]
    Env { var: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "CONFIG_IO",
            Self::Parse(_) => "CONFIG_PARSE",
            Self::Env { .. } => "CONFIG_ENV",
            Self::Invalid(_) => "CONFIG_INVALID",
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transport: TransportConfig,
    pub game: GameConfig,
    pub logging: LoggingConfig,
}

/// Relay connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub relay_url: String,
    pub retry: RetryConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://localhost:8080".to_string(),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry timing for unacknowledged messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    #[serde(with = "humantime_serde")]
    pub initial: Duration,
    #[serde(with = "humantime_serde")]
    pub max: Duration,
    /// 1.0 retries at a fixed interval
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(5),
            multiplier: 1.0,
        }
    }
}

impl RetryConfig {
    pub fn schedule(&self) -> RetrySchedule {
        if self.multiplier <= 1.0 {
            RetrySchedule::Fixed(self.initial)
        } else {
            RetrySchedule::Backoff {
                initial: self.initial,
                max: self.max,
                multiplier: self.multiplier,
            }
        }
    }
}

/// Settings every participant of a game must agree on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Agreed out of band; distinguishes games among the same players
    pub label: String,
    pub protocol_version: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            label: String::new(),
            protocol_version: PROTOCOL_VERSION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global level or filter directive (trace, debug, info, warn, error)
    pub level: String,
    /// Per-module levels, e.g. `"dicechain::transport" = "debug"`
    pub module_levels: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            module_levels: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load from `path` if given (defaults otherwise), apply environment
    /// overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.override_from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        fs::write(path, contents).map_err(|e| ConfigError::Io(e.to_string()))
    }

    /// Override configuration with environment variables
    pub fn override_from_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| env::var(name).ok())
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(val) = lookup("DICECHAIN_RELAY_URL") {
            self.transport.relay_url = val;
        }

        if let Some(val) = lookup("DICECHAIN_RETRY_INITIAL_MS") {
            let ms: u64 = val.parse().map_err(|_| ConfigError::Env {
                var: "DICECHAIN_RETRY_INITIAL_MS",
                value: val.clone(),
            })?;
            self.transport.retry.initial = Duration::from_millis(ms);
        }

        if let Some(val) = lookup("DICECHAIN_LOG") {
            self.logging.level = val;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let retry = &self.transport.retry;
        if self.transport.relay_url.trim().is_empty() {
            return Err(ConfigError::Invalid("relay URL cannot be empty".to_string()));
        }

        if retry.initial.is_zero() {
            return Err(ConfigError::Invalid("retry interval must be > 0".to_string()));
        }

        if retry.max < retry.initial {
            return Err(ConfigError::Invalid(
                "maximum retry interval must be >= the initial one".to_string(),
            ));
        }

        if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid("retry multiplier must be >= 1".to_string()));
        }

        if self.game.protocol_version != PROTOCOL_VERSION {
            return Err(ConfigError::Invalid(format!(
                "unsupported protocol version {}",
                self.game.protocol_version
            )));
        }

        Ok(())
    }
}
