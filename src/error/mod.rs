//! Error types and handling for dicechain
//!
//! Every component reports failures as a small categorical enum (one variant
//! per validation point). The crate-level [`Error`] wraps them so callers that
//! do not care about the component can use a single `Result` alias.

use thiserror::Error;

pub use crate::config::ConfigError;
pub use crate::crypto::CryptoError;
pub use crate::gaming::game_orchestrator::OrchestratorError;
pub use crate::gaming::turn_engine::TurnError;
pub use crate::protocol::consensus::chain::LogError;
pub use crate::protocol::consensus::commit_reveal::RoundError;
pub use crate::transport::TransportError;

/// Result type alias for dicechain operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network and transport layer errors
    Network,
    /// Cryptographic and security errors
    Security,
    /// Block log and commit-reveal errors
    Consensus,
    /// Turn rule violations
    Gaming,
    /// Configuration and setup errors
    Configuration,
    /// Internal system errors
    Internal,
}

impl ErrorCategory {
    /// Get the monitoring severity level for this category
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Security | Self::Consensus => ErrorSeverity::Critical,
            Self::Network | Self::Internal => ErrorSeverity::High,
            Self::Gaming => ErrorSeverity::Medium,
            Self::Configuration => ErrorSeverity::Low,
        }
    }
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Crate-level error wrapping the per-component tags
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Randomness round error: {0}")]
    Round(#[from] RoundError),

    #[error("Block log error: {0}")]
    Log(#[from] LogError),

    #[error("Turn error: {0}")]
    Turn(#[from] TurnError),

    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Task failed: {0}")]
    Task(String),
}

impl Error {
    /// Categorical tag for telemetry, e.g. `"INVALID_SIGNATURE"`
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Crypto(e) => e.code(),
            Self::Round(e) => e.code(),
            Self::Log(e) => e.code(),
            Self::Turn(e) => e.code(),
            Self::Orchestrator(e) => e.code(),
            Self::Transport(e) => e.code(),
            Self::Config(e) => e.code(),
            Self::Task(_) => "TASK_FAILED",
        }
    }

    /// Get the error category for monitoring
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Io(_) | Self::Transport(_) => ErrorCategory::Network,
            Self::Serialization(_) | Self::Task(_) => ErrorCategory::Internal,
            Self::Crypto(_) => ErrorCategory::Security,
            Self::Round(_) | Self::Log(_) => ErrorCategory::Consensus,
            Self::Turn(_) => ErrorCategory::Gaming,
            Self::Orchestrator(e) => match e {
                OrchestratorError::AuthorisationFailure => ErrorCategory::Security,
                OrchestratorError::Log(_)
                | OrchestratorError::Round(_)
                | OrchestratorError::ParkingFull => ErrorCategory::Consensus,
                _ => ErrorCategory::Gaming,
            },
            Self::Config(_) => ErrorCategory::Configuration,
        }
    }

    /// Get the error severity for alerting
    pub fn severity(&self) -> ErrorSeverity {
        self.category().severity()
    }
}
