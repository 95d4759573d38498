//! A game session: one orchestrator wired to its reliable channel
//!
//! The channel delivers every payload from the relay to the orchestrator,
//! and the orchestrator publishes its own blocks through the channel.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;

use super::game_orchestrator::{BlockSink, Orchestrator, OrchestratorError, PhaseKind};
use super::scorecard::Category;
use super::turn_engine::{Dice, GameState};
use crate::crypto::Fingerprint;
use crate::protocol::constants::{DICE_COUNT, DIE_FACES, MAX_ATTEMPTS};
use crate::transport::{Delivery, ReliableChannel};

/// Scores at or above this end the turn early in [`GameSession::play_turn`]
const GOOD_SCORE: u16 = 25;

/// Point-in-time view of a session, for display
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub owner: Fingerprint,
    pub phase: PhaseKind,
    pub game: Option<GameState>,
    pub generations: usize,
    pub parked: usize,
}

impl BlockSink for ReliableChannel {
    fn publish(&self, block: &Value) {
        self.fan_out(block);
    }
}

type Shared = Arc<Mutex<Orchestrator<ReliableChannel>>>;

pub struct GameSession {
    orchestrator: Shared,
    channel: ReliableChannel,
}

impl GameSession {
    /// Route the channel's payloads into `orchestrator` and take its opening
    /// actions.
    pub fn start(orchestrator: Orchestrator<ReliableChannel>) -> Result<Self, OrchestratorError> {
        let channel = orchestrator.sink().clone();
        let orchestrator: Shared = Arc::new(Mutex::new(orchestrator));

        // Open before taking any buffered peer blocks, so the opening
        // commitment extends genesis like everybody else's
        orchestrator.lock().start()?;

        // The channel is owned by the orchestrator; a strong reference back
        // would keep both alive forever.
        let weak: Weak<Mutex<Orchestrator<ReliableChannel>>> = Arc::downgrade(&orchestrator);
        channel.on_receive(move |payload: &Value| {
            if let Some(orchestrator) = weak.upgrade() {
                if let Err(e) = orchestrator.lock().receive_block(payload) {
                    tracing::debug!(code = e.code(), "block not applied");
                }
            }
            // Invalid blocks will never become valid; retrying them is pointless
            Delivery::Processed
        });

        Ok(Self { orchestrator, channel })
    }

    pub fn channel(&self) -> &ReliableChannel {
        &self.channel
    }

    pub fn owner(&self) -> Fingerprint {
        self.orchestrator.lock().owner()
    }

    pub fn is_finished(&self) -> bool {
        self.orchestrator.lock().is_finished()
    }

    pub fn is_my_turn(&self) -> bool {
        self.orchestrator.lock().is_my_turn()
    }

    pub fn select(&self, dice: Dice) -> Result<(), OrchestratorError> {
        self.orchestrator.lock().select(dice)
    }

    pub fn record(&self, category: Category) -> Result<(), OrchestratorError> {
        self.orchestrator.lock().record(category)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let orchestrator = self.orchestrator.lock();
        SessionSnapshot {
            owner: orchestrator.owner(),
            phase: orchestrator.phase().kind(),
            game: orchestrator.game().cloned(),
            generations: orchestrator.log().len(),
            parked: orchestrator.parked_count(),
        }
    }

    /// Take one simple automatic turn action if it is our turn.
    ///
    /// Records the best open category once it scores well or no rolls are
    /// left; otherwise keeps the most common face and re-rolls the rest.
    /// Returns whether an action was taken.
    pub fn play_turn(&self) -> Result<bool, OrchestratorError> {
        let mut orchestrator = self.orchestrator.lock();
        if !orchestrator.is_my_turn() {
            return Ok(false);
        }
        let owner = orchestrator.owner();
        let Some(game) = orchestrator.game() else {
            return Ok(false);
        };
        let (Some(dice), Some(card)) = (game.full_dice(), game.scorecard(&owner)) else {
            return Ok(false);
        };

        let best = card
            .open_categories()
            .map(|c| (c, c.score(&dice)))
            .max_by_key(|(_, score)| *score);
        let Some((category, score)) = best else {
            return Ok(false);
        };

        let keep = keep_most_common(&dice);
        if game.attempt < MAX_ATTEMPTS && score < GOOD_SCORE && keep.iter().any(Option::is_none) {
            tracing::debug!(?keep, "re-rolling");
            orchestrator.select(keep)?;
        } else {
            tracing::debug!(%category, score, "recording");
            orchestrator.record(category)?;
        }
        Ok(true)
    }

    /// Play automatically until the game finishes, checking every `poll`.
    pub async fn autoplay(&self, poll: Duration) -> Result<(), OrchestratorError> {
        while !self.is_finished() {
            if !self.play_turn()? {
                tokio::time::sleep(poll).await;
            }
        }
        Ok(())
    }
}

/// Keep every die showing the most common face (highest on ties).
fn keep_most_common(dice: &[u8; DICE_COUNT]) -> Dice {
    let mut counts = [0usize; DIE_FACES as usize + 1];
    for d in dice {
        counts[*d as usize] += 1;
    }
    let face = (1..=DIE_FACES).max_by_key(|f| (counts[*f as usize], *f)).unwrap_or(DIE_FACES);

    let mut keep = [None; DICE_COUNT];
    for (slot, d) in keep.iter_mut().zip(dice) {
        if *d == face {
            *slot = Some(*d);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Identity;
    use crate::transport::{LocalRelay, RetrySchedule};

    #[test]
    fn test_keep_most_common() {
        assert_eq!(keep_most_common(&[2, 5, 2, 1, 5]), [None, Some(5), None, None, Some(5)]);
        assert_eq!(keep_most_common(&[3, 3, 3, 3, 3]), [Some(3); 5]);
        assert_eq!(keep_most_common(&[1, 2, 3, 4, 6]), [None, None, None, None, Some(6)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_sessions_play_to_the_end() {
        let relay = LocalRelay::new();
        let identities = [Identity::generate(), Identity::generate()];
        let ids: Vec<String> = identities.iter().map(|i| i.fingerprint().to_hex()).collect();

        let mut sessions = Vec::new();
        for identity in &identities {
            let me = identity.fingerprint().to_hex();
            let others: Vec<String> = ids.iter().filter(|id| **id != me).cloned().collect();
            let peers: Vec<_> = identities
                .iter()
                .filter(|i| i.fingerprint() != identity.fingerprint())
                .map(|i| i.peer_key().clone())
                .collect();

            let channel = ReliableChannel::new(me.clone(), others, RetrySchedule::default());
            let (link, inbound) = relay.connect(&me).unwrap();
            channel.attach(Some(link));
            channel.spawn_inbound(inbound);

            let orchestrator = Orchestrator::new(identity.clone(), peers, "test", channel).unwrap();
            sessions.push(GameSession::start(orchestrator).unwrap());
        }

        let poll = Duration::from_millis(10);
        let (ra, rb) = tokio::time::timeout(
            Duration::from_secs(600),
            async { tokio::join!(sessions[0].autoplay(poll), sessions[1].autoplay(poll)) },
        )
        .await
        .expect("game did not finish");
        ra.unwrap();
        rb.unwrap();

        let a = sessions[0].snapshot();
        let b = sessions[1].snapshot();
        assert_eq!(a.phase, PhaseKind::Finished);
        assert_eq!(a.game, b.game);
        assert_eq!(a.generations, b.generations);
        assert!(a.game.unwrap().scorecards.values().all(|c| c.is_full()));
    }
}
