//! Protocol layer: the signed block format, the replicated block log and the
//! commit-reveal randomness rounds that every replica runs in lockstep.

pub mod block;
pub mod constants;
pub mod consensus;

pub use block::{Block, Genesis, Generation};
pub use consensus::chain::{AuthenticatedLog, CommitOutcome, LogError};
pub use consensus::commit_reveal::{
    to_die, to_dice, LocalSecrets, RandomValue, RandomnessRound, Reveal, RoundError, Seed,
};
pub use constants::PROTOCOL_VERSION;
