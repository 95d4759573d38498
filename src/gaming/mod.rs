//! Yahtzee on top of the protocol layer
//!
//! - [`scorecard`]: categories and scoring
//! - [`turn_engine`]: the pure game state machine
//! - [`game_orchestrator`]: one replica's phase machine over the block log
//! - [`session`]: an orchestrator wired to its reliable channel

pub mod game_orchestrator;
pub mod scorecard;
pub mod session;
pub mod turn_engine;

pub use game_orchestrator::{
    BlockSink, GameObserver, Move, NoopObserver, Orchestrator, OrchestratorError, Phase, PhaseKind,
    Reception,
};
pub use scorecard::{Category, Scorecard, Totals};
pub use session::{GameSession, SessionSnapshot};
pub use turn_engine::{Dice, GameState, TurnAction, TurnError};
