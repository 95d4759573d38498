//! Turn rules as a pure reducer
//!
//! [`apply`] takes a game state and one action and returns the next state,
//! or the reason the action is not allowed. The input state is never
//! modified, so a rejected action leaves nothing behind.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use super::scorecard::{Category, Scorecard, Totals};
use crate::crypto::Fingerprint;
use crate::protocol::constants::{DICE_COUNT, DIE_FACES, MAX_ATTEMPTS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TurnError {
    #[error("player is not on turn")]
    NotOnTurn,

    #[error("no dice are selected for rolling")]
    NoDiceSelected,

    #[error("roll does not fill the empty dice")]
    InvalidRoll,

    #[error("game is finished")]
    GameFinished,

    #[error("no rolls left this turn")]
    RollsExceeded,

    #[error("dice are already selected")]
    AlreadySelected,

    #[error("selection is malformed")]
    InvalidSelection,

    #[error("selection keeps dice that were not rolled")]
    IncompatibleSelection,

    #[error("dice have not been rolled")]
    NoDiceRolled,

    #[error("category already recorded")]
    CategoryAlreadyRecorded,
}

impl TurnError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotOnTurn => "NOT_ON_TURN",
            Self::NoDiceSelected => "NO_DICE_SELECTED",
            Self::InvalidRoll => "INVALID_ROLL",
            Self::GameFinished => "GAME_FINISHED",
            Self::RollsExceeded => "ROLLS_EXCEEDED",
            Self::AlreadySelected => "ALREADY_SELECTED",
            Self::InvalidSelection => "INVALID_SELECTION",
            Self::IncompatibleSelection => "INCOMPATIBLE_SELECTION",
            Self::NoDiceRolled => "NO_DICE_ROLLED",
            Self::CategoryAlreadyRecorded => "CATEGORY_ALREADY_RECORDED",
        }
    }
}

/// Dice slots; `None` is an empty slot waiting to be rolled
pub type Dice = [Option<u8>; DICE_COUNT];

/// Turn actions, each carrying the acting player
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnAction {
    /// Fill the empty slots, in slot order
    Roll { player: Fingerprint, dice: Vec<u8> },
    /// Keep the `Some` slots and clear the rest for re-rolling
    Select { player: Fingerprint, dice: Dice },
    /// Score the dice into a category and pass the turn
    Record { player: Fingerprint, category: Category },
}

impl TurnAction {
    pub fn player(&self) -> &Fingerprint {
        match self {
            Self::Roll { player, .. }
            | Self::Select { player, .. }
            | Self::Record { player, .. } => player,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub players: Vec<Fingerprint>,
    pub on_turn: Option<usize>,
    pub attempt: u8,
    pub dice: Dice,
    pub scorecards: BTreeMap<Fingerprint, Scorecard>,
}

impl GameState {
    /// Fresh game with `players` in turn order
    pub fn new(players: Vec<Fingerprint>) -> Self {
        let scorecards = players.iter().map(|p| (*p, Scorecard::new())).collect();
        Self {
            on_turn: if players.is_empty() { None } else { Some(0) },
            players,
            attempt: 0,
            dice: [None; DICE_COUNT],
            scorecards,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.on_turn.is_none()
    }

    pub fn current_player(&self) -> Option<Fingerprint> {
        self.on_turn.and_then(|i| self.players.get(i).copied())
    }

    /// Number of empty dice slots
    pub fn rolling_dice(&self) -> usize {
        self.dice.iter().filter(|d| d.is_none()).count()
    }

    /// Whether a roll is due: the turn has rolls left and some slots are empty
    pub fn needs_roll(&self) -> bool {
        !self.is_finished() && self.attempt < MAX_ATTEMPTS && self.rolling_dice() > 0
    }

    /// All five dice, if every slot is filled
    pub fn full_dice(&self) -> Option<[u8; DICE_COUNT]> {
        let mut out = [0u8; DICE_COUNT];
        for (slot, die) in out.iter_mut().zip(self.dice) {
            *slot = die?;
        }
        Some(out)
    }

    pub fn scorecard(&self, player: &Fingerprint) -> Option<&Scorecard> {
        self.scorecards.get(player)
    }

    /// Players with their totals, best first
    pub fn standings(&self) -> Vec<(Fingerprint, Totals)> {
        let mut standings: Vec<_> = self
            .players
            .iter()
            .filter_map(|p| self.scorecards.get(p).map(|card| (*p, card.totals())))
            .collect();
        standings.sort_by(|a, b| b.1.total.cmp(&a.1.total));
        standings
    }

    pub fn apply(&self, action: &TurnAction) -> Result<GameState, TurnError> {
        apply(self, action)
    }

    fn ensure_on_turn(&self, player: &Fingerprint) -> Result<usize, TurnError> {
        let on_turn = self.on_turn.ok_or(TurnError::GameFinished)?;
        if self.players.get(on_turn) != Some(player) {
            return Err(TurnError::NotOnTurn);
        }
        Ok(on_turn)
    }
}

/// Apply one action to `state`.
pub fn apply(state: &GameState, action: &TurnAction) -> Result<GameState, TurnError> {
    match action {
        TurnAction::Roll { player, dice } => roll(state, player, dice),
        TurnAction::Select { player, dice } => select(state, player, dice),
        TurnAction::Record { player, category } => record(state, player, *category),
    }
}

fn is_face(d: u8) -> bool {
    (1..=DIE_FACES).contains(&d)
}

fn roll(state: &GameState, player: &Fingerprint, rolled: &[u8]) -> Result<GameState, TurnError> {
    state.ensure_on_turn(player)?;
    let empty = state.rolling_dice();
    if empty == 0 {
        return Err(TurnError::NoDiceSelected);
    }
    if rolled.len() != empty || !rolled.iter().copied().all(is_face) {
        return Err(TurnError::InvalidRoll);
    }

    let mut next = state.clone();
    let mut faces = rolled.iter().copied();
    for slot in next.dice.iter_mut().filter(|d| d.is_none()) {
        *slot = faces.next();
    }
    next.attempt += 1;
    Ok(next)
}

fn select(
    state: &GameState,
    player: &Fingerprint,
    selection: &Dice,
) -> Result<GameState, TurnError> {
    state.ensure_on_turn(player)?;
    if state.attempt >= MAX_ATTEMPTS {
        return Err(TurnError::RollsExceeded);
    }
    let current = state.full_dice().ok_or(TurnError::AlreadySelected)?;
    if selection.iter().all(Option::is_some) || !selection.iter().flatten().copied().all(is_face) {
        return Err(TurnError::InvalidSelection);
    }

    // Kept dice must be drawn from the current dice as a multiset
    let mut available = [0u8; DIE_FACES as usize + 1];
    for d in current {
        available[d as usize] += 1;
    }
    for d in selection.iter().flatten() {
        let count = &mut available[*d as usize];
        if *count == 0 {
            return Err(TurnError::IncompatibleSelection);
        }
        *count -= 1;
    }

    let mut next = state.clone();
    next.dice = *selection;
    Ok(next)
}

fn record(
    state: &GameState,
    player: &Fingerprint,
    category: Category,
) -> Result<GameState, TurnError> {
    let on_turn = state.ensure_on_turn(player)?;
    let dice = state.full_dice().ok_or(TurnError::NoDiceRolled)?;
    if state.scorecards.get(player).is_some_and(|c| c.is_recorded(category)) {
        return Err(TurnError::CategoryAlreadyRecorded);
    }

    let mut next = state.clone();
    next.scorecards
        .entry(*player)
        .or_default()
        .record(category, category.score(&dice));

    let n = next.players.len();
    next.on_turn = (1..=n)
        .map(|step| (on_turn + step) % n)
        .find(|&i| {
            next.scorecards
                .get(&next.players[i])
                .map_or(true, |card| !card.is_full())
        });
    next.attempt = 0;
    next.dice = [None; DICE_COUNT];
    Ok(next)
}
