//! Dicechain - serverless multi-party Yahtzee
//!
//! Players share no server and trust no one. Every move is a signed block in
//! a replicated log, concurrent blocks are merged deterministically, and dice
//! come from commit-reveal rounds that no single player can bias.
//!
//! - protocol: block format, the authenticated log and commit-reveal rounds
//! - crypto: canonical hashing and ed25519 identities
//! - transport: relay connections and the reliable (acked, deduplicated) channel
//! - gaming: scoring, the turn engine and the per-replica orchestrator
//! - config / logging: ambient setup for the binary and embedders

pub mod config;
pub mod crypto;
pub mod error;
pub mod gaming;
pub mod logging;
pub mod protocol;
pub mod transport;

// Re-export commonly used types for easy access
pub use config::Config;
pub use crypto::{hash, Fingerprint, Hash, Identity, PeerKey};
pub use error::{Error, Result};
pub use gaming::{Category, GameSession, GameState, Orchestrator, PhaseKind};
pub use protocol::{AuthenticatedLog, Block, RandomnessRound};
pub use transport::{LocalRelay, ReliableChannel, RetrySchedule};
