//! Game orchestrator
//!
//! Drives one participant's replica through the phases of a game:
//!
//! 1. `AwaitingTurnOrder`: a commit-reveal round with one slot per
//!    participant decides the order of play.
//! 2. `AwaitingRoll`: whenever the player on turn has empty dice and rolls
//!    left, a commit-reveal round with one slot per empty die produces the
//!    roll.
//! 3. `AwaitingTurnAction`: the player on turn selects dice to re-roll or
//!    records a category.
//! 4. `Finished`: every scorecard is full.
//!
//! Local actions are applied, committed to the log and published through a
//! [`BlockSink`]. Remote blocks go through the log's validation; a block
//! whose predecessor has not arrived yet is parked until it has.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use super::scorecard::Category;
use super::turn_engine::{Dice, GameState, TurnAction, TurnError};
use crate::crypto::{hash, Fingerprint, Hash, Identity, PeerKey};
use crate::protocol::block::Block;
use crate::protocol::consensus::chain::{preceding_hash, AuthenticatedLog, CommitOutcome, LogError};
use crate::protocol::consensus::commit_reveal::{
    to_dice, LocalSecrets, RandomnessRound, Reveal, RoundError,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Round(#[from] RoundError),

    #[error(transparent)]
    Turn(#[from] TurnError),

    #[error("move was signed by a different player than it names")]
    AuthorisationFailure,

    #[error("move does not fit the current phase {0}")]
    UnexpectedMove(PhaseKind),

    #[error("a game needs at least two participants, got {0}")]
    TooFewParticipants(usize),

    #[error("too many blocks are waiting for their predecessor")]
    ParkingFull,
}

impl OrchestratorError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Log(e) => e.code(),
            Self::Round(e) => e.code(),
            Self::Turn(e) => e.code(),
            Self::AuthorisationFailure => "AUTHORISATION_FAILURE",
            Self::UnexpectedMove(_) => "UNEXPECTED_MOVE",
            Self::TooFewParticipants(_) => "TOO_FEW_PARTICIPANTS",
            Self::ParkingFull => "PARKING_FULL",
        }
    }
}

/// Block payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Move {
    DicecupHashes { player: Fingerprint, hashes: Vec<Hash> },
    DicecupValues { player: Fingerprint, reveals: Vec<Reveal> },
    Select { player: Fingerprint, dice: Dice },
    Record { player: Fingerprint, category: Category },
}

impl Move {
    /// The player the move claims to be made by
    pub fn player(&self) -> &Fingerprint {
        match self {
            Self::DicecupHashes { player, .. }
            | Self::DicecupValues { player, .. }
            | Self::Select { player, .. }
            | Self::Record { player, .. } => player,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseKind {
    AwaitingTurnOrder,
    AwaitingRoll,
    AwaitingTurnAction,
    Finished,
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitingTurnOrder => "awaiting-turn-order",
            Self::AwaitingRoll => "awaiting-roll",
            Self::AwaitingTurnAction => "awaiting-turn-action",
            Self::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// Current phase, with the randomness round it is waiting on
#[derive(Debug, Clone)]
pub enum Phase {
    AwaitingTurnOrder(RandomnessRound),
    AwaitingRoll(RandomnessRound),
    AwaitingTurnAction,
    Finished,
}

impl Phase {
    pub fn kind(&self) -> PhaseKind {
        match self {
            Self::AwaitingTurnOrder(_) => PhaseKind::AwaitingTurnOrder,
            Self::AwaitingRoll(_) => PhaseKind::AwaitingRoll,
            Self::AwaitingTurnAction => PhaseKind::AwaitingTurnAction,
            Self::Finished => PhaseKind::Finished,
        }
    }

    pub fn round(&self) -> Option<&RandomnessRound> {
        match self {
            Self::AwaitingTurnOrder(round) | Self::AwaitingRoll(round) => Some(round),
            _ => None,
        }
    }
}

/// Where committed local blocks are published
pub trait BlockSink {
    fn publish(&self, block: &Value);
}

impl<T: BlockSink + ?Sized> BlockSink for std::sync::Arc<T> {
    fn publish(&self, block: &Value) {
        (**self).publish(block)
    }
}

/// Hooks for presenting a game; every method defaults to doing nothing.
pub trait GameObserver: Send {
    fn phase_changed(&mut self, _phase: PhaseKind, _game: Option<&GameState>) {}

    fn dice_rolled(&mut self, _player: &Fingerprint, _dice: &[u8]) {}

    fn block_committed(&mut self, _block: &Block<Move>) {}

    fn block_rejected(&mut self, _error: &OrchestratorError) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl GameObserver for NoopObserver {}

/// What happened to a received block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reception {
    Committed,
    Duplicate,
    /// Held back until its predecessor commits
    Parked,
}

/// Most blocks held back waiting for their predecessor at any time
pub const MAX_PARKED: usize = 256;

/// Effect of a move on the active state machine, computed before anything
/// is committed.
enum Applied {
    Round(RandomnessRound),
    Game(GameState),
}

fn apply_move(
    phase: &Phase,
    game: Option<&GameState>,
    mv: &Move,
) -> Result<Applied, OrchestratorError> {
    match (mv, phase) {
        (
            Move::DicecupHashes { player, hashes },
            Phase::AwaitingTurnOrder(round) | Phase::AwaitingRoll(round),
        ) => {
            let mut round = round.clone();
            round.submit_commitments(player, hashes)?;
            Ok(Applied::Round(round))
        }
        (
            Move::DicecupValues { player, reveals },
            Phase::AwaitingTurnOrder(round) | Phase::AwaitingRoll(round),
        ) => {
            let mut round = round.clone();
            round.submit_reveals(player, reveals)?;
            Ok(Applied::Round(round))
        }
        (Move::Select { player, dice }, Phase::AwaitingTurnAction) => {
            let game = game.ok_or(OrchestratorError::UnexpectedMove(phase.kind()))?;
            let action = TurnAction::Select { player: *player, dice: *dice };
            Ok(Applied::Game(game.apply(&action)?))
        }
        (Move::Record { player, category }, Phase::AwaitingTurnAction) => {
            let game = game.ok_or(OrchestratorError::UnexpectedMove(phase.kind()))?;
            let action = TurnAction::Record { player: *player, category: *category };
            Ok(Applied::Game(game.apply(&action)?))
        }
        _ => Err(OrchestratorError::UnexpectedMove(phase.kind())),
    }
}

/// One participant's view of a game
pub struct Orchestrator<S> {
    log: AuthenticatedLog<Move>,
    phase: Phase,
    game: Option<GameState>,
    secrets: Option<LocalSecrets>,
    parked: HashMap<Hash, Vec<Value>>,
    rng: Box<dyn RngCore + Send>,
    observer: Box<dyn GameObserver>,
    sink: S,
}

impl<S: BlockSink> Orchestrator<S> {
    /// Set up a replica for `identity` playing against `peers`.
    ///
    /// Nothing is published until [`start`](Self::start) is called.
    pub fn new(
        identity: Identity,
        peers: impl IntoIterator<Item = PeerKey>,
        label: &str,
        sink: S,
    ) -> Result<Self, OrchestratorError> {
        let log = AuthenticatedLog::new(identity, peers, label);
        let participants = log.participants();
        if participants.len() < 2 {
            return Err(OrchestratorError::TooFewParticipants(participants.len()));
        }

        let opening = RandomnessRound::new(participants.len(), participants);
        Ok(Self {
            log,
            phase: Phase::AwaitingTurnOrder(opening),
            game: None,
            secrets: None,
            parked: HashMap::new(),
            rng: Box::new(OsRng),
            observer: Box::new(NoopObserver),
            sink,
        })
    }

    pub fn with_rng(mut self, rng: impl RngCore + Send + 'static) -> Self {
        self.rng = Box::new(rng);
        self
    }

    pub fn with_observer(mut self, observer: impl GameObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn owner(&self) -> Fingerprint {
        self.log.owner()
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn game(&self) -> Option<&GameState> {
        self.game.as_ref()
    }

    pub fn log(&self) -> &AuthenticatedLog<Move> {
        &self.log
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn parked_count(&self) -> usize {
        self.parked.values().map(Vec::len).sum()
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Finished)
    }

    /// Whether the local player is expected to select or record
    pub fn is_my_turn(&self) -> bool {
        matches!(self.phase, Phase::AwaitingTurnAction)
            && self.game.as_ref().and_then(GameState::current_player) == Some(self.owner())
    }

    /// Take the opening actions.
    pub fn start(&mut self) -> Result<(), OrchestratorError> {
        self.observer.phase_changed(self.phase.kind(), None);
        self.step()?;
        self.drain_parked();
        Ok(())
    }

    /// Keep `dice` and re-roll the empty slots.
    pub fn select(&mut self, dice: Dice) -> Result<(), OrchestratorError> {
        let player = self.owner();
        self.act(Move::Select { player, dice })
    }

    /// Score the current dice into `category`.
    pub fn record(&mut self, category: Category) -> Result<(), OrchestratorError> {
        let player = self.owner();
        self.act(Move::Record { player, category })
    }

    fn act(&mut self, mv: Move) -> Result<(), OrchestratorError> {
        self.dispatch_own(mv)?;
        self.step()?;
        self.drain_parked();
        Ok(())
    }

    /// Handle a block received from a peer.
    ///
    /// Validation failures are returned and reported to the observer; a
    /// block with an unknown predecessor is parked instead.
    pub fn receive_block(&mut self, candidate: &Value) -> Result<Reception, OrchestratorError> {
        let reception = self.accept(candidate)?;
        if reception == Reception::Committed {
            self.step()?;
            self.drain_parked();
        }
        Ok(reception)
    }

    fn state_binding(&self) -> Hash {
        hash(&self.game)
    }

    fn accept(&mut self, candidate: &Value) -> Result<Reception, OrchestratorError> {
        let state = self.state_binding();
        let mut accepted = None;
        let (phase, game) = (&self.phase, self.game.as_ref());

        let result = self.log.commit_foreign(&state, candidate, |block: &Block<Move>| {
            if *block.payload.player() != block.author {
                return Err(OrchestratorError::AuthorisationFailure);
            }
            let applied = apply_move(phase, game, &block.payload)?;
            accepted = Some((applied, block.clone()));
            Ok(())
        });

        match result {
            Ok(CommitOutcome::Duplicate) => Ok(Reception::Duplicate),
            Ok(outcome) => {
                if let Some((applied, block)) = accepted {
                    self.install(applied);
                    self.observer.block_committed(&block);
                }
                tracing::debug!(
                    ?outcome,
                    head = %self.log.head_hash().short(),
                    "committed foreign block"
                );
                Ok(Reception::Committed)
            }
            Err(OrchestratorError::Log(LogError::IncompatibleBlock)) => {
                match preceding_hash(candidate) {
                    Some(predecessor) if !self.log.is_known_generation(&predecessor) => {
                        match self.park(predecessor, candidate) {
                            Ok(()) => Ok(Reception::Parked),
                            Err(e) => Err(self.reject(e)),
                        }
                    }
                    _ => Err(self.reject(LogError::IncompatibleBlock.into())),
                }
            }
            Err(e) => Err(self.reject(e)),
        }
    }

    /// Hold back an authentic block until `predecessor` commits.
    fn park(&mut self, predecessor: Hash, candidate: &Value) -> Result<(), OrchestratorError> {
        let block = self.log.authenticate(candidate)?;
        if *block.payload.player() != block.author {
            return Err(OrchestratorError::AuthorisationFailure);
        }
        if self.parked_count() >= MAX_PARKED {
            return Err(OrchestratorError::ParkingFull);
        }

        tracing::debug!(
            predecessor = %predecessor.short(),
            "parking block with unknown predecessor"
        );
        self.parked.entry(predecessor).or_default().push(candidate.clone());
        Ok(())
    }

    fn reject(&mut self, error: OrchestratorError) -> OrchestratorError {
        tracing::warn!(code = error.code(), %error, "rejected block");
        self.observer.block_rejected(&error);
        error
    }

    /// Retry parked blocks that now extend the log, until none do.
    fn drain_parked(&mut self) {
        loop {
            let ready = [Some(self.log.head_hash()), self.log.previous_hash()]
                .into_iter()
                .flatten()
                .find_map(|h| self.parked.remove(&h));
            let Some(blocks) = ready else { break };

            for candidate in blocks {
                match self.accept(&candidate) {
                    Ok(Reception::Committed) => {
                        if let Err(e) = self.step() {
                            tracing::warn!(
                                code = e.code(),
                                %e,
                                "local step failed after parked block"
                            );
                        }
                    }
                    Ok(_) => {}
                    Err(e) => tracing::debug!(code = e.code(), "dropped parked block"),
                }
            }
        }
    }

    fn dispatch_own(&mut self, mv: Move) -> Result<(), OrchestratorError> {
        let applied = apply_move(&self.phase, self.game.as_ref(), &mv)?;
        let block = self.log.commit_own(self.state_binding(), mv)?;
        self.install(applied);

        match block.to_value() {
            Ok(value) => self.sink.publish(&value),
            Err(e) => tracing::warn!(%e, "failed to encode own block"),
        }
        self.observer.block_committed(&block);
        Ok(())
    }

    fn install(&mut self, applied: Applied) {
        match applied {
            Applied::Round(round) => match &mut self.phase {
                Phase::AwaitingTurnOrder(current) | Phase::AwaitingRoll(current) => {
                    *current = round
                }
                _ => {}
            },
            Applied::Game(game) => self.game = Some(game),
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        let kind = phase.kind();
        tracing::info!(phase = %kind, "phase changed");
        self.phase = phase;
        self.secrets = None;
        self.observer.phase_changed(kind, self.game.as_ref());
    }

    /// Advance through every transition the current state allows, taking
    /// the local player's automatic commit and reveal actions on the way.
    fn step(&mut self) -> Result<(), OrchestratorError> {
        let me = self.owner();
        loop {
            match &self.phase {
                Phase::AwaitingTurnOrder(round) | Phase::AwaitingRoll(round) => {
                    if round.is_complete() {
                        self.finish_round()?;
                    } else if round.can_commit(&me) {
                        let secrets = LocalSecrets::generate(round.arity(), &mut self.rng);
                        let hashes = secrets.commitments();
                        self.secrets = Some(secrets);
                        self.dispatch_own(Move::DicecupHashes { player: me, hashes })?;
                    } else if round.can_reveal(&me) {
                        let reveals = match &self.secrets {
                            Some(secrets) => secrets.reveals().to_vec(),
                            // Nothing to reveal without the secrets behind our commitment
                            None => return Ok(()),
                        };
                        self.dispatch_own(Move::DicecupValues { player: me, reveals })?;
                    } else {
                        return Ok(());
                    }
                }
                Phase::AwaitingTurnAction => match &self.game {
                    Some(game) if game.is_finished() => self.set_phase(Phase::Finished),
                    Some(game) if game.needs_roll() => {
                        let round = RandomnessRound::new(game.rolling_dice(), game.players.clone());
                        self.set_phase(Phase::AwaitingRoll(round));
                    }
                    _ => return Ok(()),
                },
                Phase::Finished => return Ok(()),
            }
        }
    }

    fn finish_round(&mut self) -> Result<(), OrchestratorError> {
        let Some(round) = self.phase.round() else {
            return Ok(());
        };
        let numbers = round.result()?;

        match self.phase.kind() {
            PhaseKind::AwaitingTurnOrder => {
                let mut order: Vec<(Fingerprint, i32)> =
                    round.participants().iter().copied().zip(numbers).collect();
                order.sort_by_key(|(_, n)| *n);
                let players = order.into_iter().map(|(p, _)| p).collect();
                self.game = Some(GameState::new(players));
                tracing::info!("turn order decided");
            }
            _ => {
                let game = self
                    .game
                    .as_ref()
                    .ok_or(OrchestratorError::UnexpectedMove(PhaseKind::AwaitingRoll))?;
                let player = game.current_player().ok_or(TurnError::GameFinished)?;
                let dice = to_dice(&numbers);
                self.game = Some(game.apply(&TurnAction::Roll { player, dice: dice.clone() })?);
                self.observer.dice_rolled(&player, &dice);
                tracing::debug!(player = %player.short(), ?dice, "dice rolled");
            }
        }
        self.set_phase(Phase::AwaitingTurnAction);
        Ok(())
    }
}
