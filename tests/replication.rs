//! Replicas exchanging blocks directly, without a transport
//!
//! Every test drives a whole group of orchestrators and checks that they end
//! up with identical logs and game states.

mod common;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde_json::Value;
use std::collections::VecDeque;

use common::{act_if_on_turn, identities, replicas, Replica};
use dicechain::crypto::{hash, PeerKey};
use dicechain::gaming::{Move, OrchestratorError, PhaseKind, Reception};
use dicechain::protocol::{AuthenticatedLog, Block, CommitOutcome, LogError};

/// Deliver everything in publication order until nobody publishes.
fn pump_in_order(replicas: &mut [Replica]) {
    loop {
        let mut moved = false;
        for i in 0..replicas.len() {
            for block in replicas[i].sink().take() {
                moved = true;
                for j in (0..replicas.len()).filter(|j| *j != i) {
                    replicas[j].receive_block(&block).unwrap();
                }
            }
        }
        if !moved {
            break;
        }
    }
}

/// Links keep their own order but are serviced in random order, so a
/// replica may hear a block before the blocks it builds on.
struct ShuffledLinks {
    links: Vec<VecDeque<Value>>,
    n: usize,
    rng: ChaCha20Rng,
}

impl ShuffledLinks {
    fn new(n: usize, seed: u64) -> Self {
        Self {
            links: vec![VecDeque::new(); n * n],
            n,
            rng: ChaCha20Rng::seed_from_u64(seed),
        }
    }

    fn collect(&mut self, replicas: &[Replica]) {
        for (from, replica) in replicas.iter().enumerate() {
            for block in replica.sink().take() {
                for to in (0..self.n).filter(|to| *to != from) {
                    self.links[from * self.n + to].push_back(block.clone());
                }
            }
        }
    }

    /// Deliver one block over a random non-empty link. False once all links
    /// are drained.
    fn deliver_one(&mut self, replicas: &mut [Replica]) -> bool {
        let busy: Vec<usize> =
            (0..self.links.len()).filter(|l| !self.links[*l].is_empty()).collect();
        let Some(&link) = busy.choose(&mut self.rng) else {
            return false;
        };
        let to = link % self.n;
        if let Some(block) = self.links[link].pop_front() {
            replicas[to].receive_block(&block).unwrap();
        }
        true
    }
}

fn assert_converged(replicas: &[Replica]) {
    let first = &replicas[0];
    for other in &replicas[1..] {
        assert_eq!(other.game(), first.game());
        assert_eq!(other.log().head_hash(), first.log().head_hash());
        assert_eq!(other.log().len(), first.log().len());
        assert_eq!(other.phase().kind(), first.phase().kind());
    }
}

#[test]
fn test_full_game_in_order() {
    let mut replicas = replicas(3, 1);
    for r in replicas.iter_mut() {
        r.start().unwrap();
    }
    pump_in_order(&mut replicas);

    let mut turns = 0;
    while !replicas[0].is_finished() {
        let acted = replicas.iter_mut().map(act_if_on_turn).filter(|a| *a).count();
        assert_eq!(acted, 1, "exactly one replica is on turn");
        pump_in_order(&mut replicas);
        assert_converged(&replicas);
        turns += 1;
    }

    assert_eq!(turns, 3 * 13);
    for r in &replicas {
        assert_eq!(r.phase().kind(), PhaseKind::Finished);
        assert_eq!(r.parked_count(), 0);
        let game = r.game().unwrap();
        assert!(game.scorecards.values().all(|card| card.is_full()));
    }
    assert_eq!(replicas[0].game().unwrap().standings().len(), 3);
}

#[test]
fn test_full_game_with_reordered_links() {
    for seed in [3u64, 11, 42] {
        let mut replicas = replicas(3, seed);
        let mut links = ShuffledLinks::new(3, seed);
        let mut rng = ChaCha20Rng::seed_from_u64(seed ^ 0xdead);

        for r in replicas.iter_mut() {
            r.start().unwrap();
        }

        let mut steps = 0;
        while !replicas.iter().all(|r| r.is_finished()) {
            links.collect(&replicas);
            // Let the player on turn act at random points while blocks are in flight
            if rng.gen_bool(0.3) {
                for r in replicas.iter_mut() {
                    act_if_on_turn(r);
                }
                links.collect(&replicas);
            }
            if !links.deliver_one(&mut replicas) {
                for r in replicas.iter_mut() {
                    act_if_on_turn(r);
                }
            }
            steps += 1;
            assert!(steps < 200_000, "seed {} did not finish", seed);
        }

        assert_converged(&replicas);
        assert!(replicas.iter().all(|r| r.parked_count() == 0));
    }
}

#[test]
fn test_tampered_block_is_rejected_everywhere() {
    let mut replicas = replicas(3, 5);
    replicas[0].start().unwrap();
    let mut block = replicas[0].sink().take().remove(0);

    // Swap in a different commitment without re-signing
    block["payload"]["hashes"][0] = Value::String(hash("forged").to_hex());

    for r in replicas[1..].iter_mut() {
        let result = r.receive_block(&block);
        assert_eq!(result, Err(OrchestratorError::Log(LogError::InvalidSignature)));
        assert_eq!(r.log().len(), 1);
    }
}

#[test]
fn test_redelivery_is_idempotent() {
    let mut replicas = replicas(2, 9);
    replicas[0].start().unwrap();
    let block = replicas[0].sink().take().remove(0);

    assert_eq!(replicas[1].receive_block(&block), Ok(Reception::Committed));
    let head = replicas[1].log().head_hash();
    assert_eq!(replicas[1].receive_block(&block), Ok(Reception::Duplicate));
    assert_eq!(replicas[1].log().head_hash(), head);
}

#[test]
fn test_concurrent_blocks_merge_into_one_generation() {
    let ids = identities(3);
    let roster: Vec<PeerKey> = ids.iter().map(|i| i.peer_key().clone()).collect();
    let mut logs: Vec<AuthenticatedLog<Move>> = ids
        .iter()
        .map(|i| AuthenticatedLog::new(i.clone(), roster.clone(), "forks"))
        .collect();
    let genesis = logs[0].head_hash();
    assert!(logs.iter().all(|l| l.head_hash() == genesis));

    let state = hash("state");
    let blocks: Vec<Value> = ids
        .iter()
        .map(|identity| {
            let mv = Move::DicecupHashes {
                player: identity.fingerprint(),
                hashes: vec![hash(&identity.fingerprint().to_hex())],
            };
            Block::signed(identity, Some(genesis), state, mv).unwrap().to_value().unwrap()
        })
        .collect();

    // Each log sees the blocks in a different rotation
    for (i, log) in logs.iter_mut().enumerate() {
        for k in 0..blocks.len() {
            let block = &blocks[(i + k) % blocks.len()];
            let outcome: Result<CommitOutcome, LogError> =
                log.commit_foreign(&state, block, |_| Ok(()));
            let expected = if k == 0 { CommitOutcome::Opened } else { CommitOutcome::Joined };
            assert_eq!(outcome, Ok(expected));
        }
    }

    let head = logs[0].head_hash();
    for log in &logs {
        assert_eq!(log.len(), 2);
        assert_eq!(log.head().len(), 3);
        assert_eq!(log.head_hash(), head);
    }
}
