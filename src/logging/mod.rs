//! Logging setup
//!
//! The library only emits `tracing` events; installing a subscriber is up to
//! the binary (or an embedding application).

use tracing_subscriber::EnvFilter;

use crate::config::{ConfigError, LoggingConfig};

/// Build the filter for `config`: the global level plus per-module levels.
///
/// `RUST_LOG`, when set, replaces the configured global level.
pub fn filter(config: &LoggingConfig) -> Result<EnvFilter, ConfigError> {
    let base = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| config.level.clone());
    let mut filter = EnvFilter::try_new(&base)
        .map_err(|e| ConfigError::Invalid(format!("log level {:?}: {}", base, e)))?;

    for (module, level) in &config.module_levels {
        let directive = format!("{}={}", module, level)
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("log directive for {}: {}", module, e)))?;
        filter = filter.add_directive(directive);
    }
    Ok(filter)
}

/// Install a human-readable subscriber on stderr.
///
/// Fails if the configuration is invalid or a global subscriber is already
/// installed.
pub fn init(config: &LoggingConfig) -> Result<(), ConfigError> {
    tracing_subscriber::fmt()
        .with_env_filter(filter(config)?)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| ConfigError::Invalid(format!("logging already initialised: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_accepts_module_levels() {
        let mut config = LoggingConfig::default();
        config.module_levels.insert("dicechain::transport".into(), "debug".into());
        assert!(filter(&config).is_ok());
    }

    #[test]
    fn test_filter_rejects_bad_directive() {
        let mut config = LoggingConfig::default();
        config.module_levels.insert("dicechain".into(), "loud".into());
        assert!(filter(&config).is_err());
    }
}
