//! Consensus primitives for a serverless game
//!
//! Replicas never vote. Agreement comes from two mechanisms:
//! - an append-only log of signed blocks whose concurrent siblings are merged
//!   into one canonically ordered generation ([`chain`])
//! - commit-reveal rounds whose XOR-combined output no single participant can
//!   bias ([`commit_reveal`])

pub mod chain;
pub mod commit_reveal;

pub use chain::{AuthenticatedLog, CommitOutcome, LogError};
pub use commit_reveal::{LocalSecrets, RandomnessRound, Reveal, RoundError};
