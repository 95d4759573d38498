//! Shared fixtures for the integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde_json::Value;
use std::sync::Arc;

use dicechain::crypto::{Identity, PeerKey};
use dicechain::gaming::{BlockSink, Category, Orchestrator};
use dicechain::transport::{LocalRelay, ReliableChannel, RetrySchedule};
use dicechain::GameSession;

/// Sink that keeps published blocks until a test delivers them
#[derive(Default)]
pub struct Outbox(Mutex<Vec<Value>>);

impl BlockSink for Outbox {
    fn publish(&self, block: &Value) {
        self.0.lock().push(block.clone());
    }
}

impl Outbox {
    pub fn take(&self) -> Vec<Value> {
        std::mem::take(&mut *self.0.lock())
    }
}

pub type Replica = Orchestrator<Arc<Outbox>>;

/// Deterministic identities, distinct per index
pub fn identities(n: usize) -> Vec<Identity> {
    (0..n).map(|i| Identity::from_secret_bytes(&[i as u8 + 7; 32])).collect()
}

/// One replica per identity, each seeded differently
pub fn replicas(n: usize, seed: u64) -> Vec<Replica> {
    let identities = identities(n);
    let roster: Vec<PeerKey> = identities.iter().map(|i| i.peer_key().clone()).collect();
    identities
        .into_iter()
        .enumerate()
        .map(|(i, identity)| {
            Orchestrator::new(identity, roster.clone(), "integration", Arc::new(Outbox::default()))
                .unwrap()
                .with_rng(ChaCha20Rng::seed_from_u64(seed * 100 + i as u64))
        })
        .collect()
}

/// Record the first open category if `replica` is on turn. Returns whether
/// it acted.
pub fn act_if_on_turn(replica: &mut Replica) -> bool {
    if !replica.is_my_turn() {
        return false;
    }
    let owner = replica.owner();
    let category = replica
        .game()
        .and_then(|g| g.scorecard(&owner))
        .and_then(|card| card.open_categories().next())
        .unwrap_or(Category::Chance);
    replica.record(category).unwrap();
    true
}

/// Orchestrators for `n` fresh players, each connected to `relay` but not
/// started yet.
pub fn connected(
    relay: &LocalRelay,
    n: usize,
    schedule: RetrySchedule,
) -> Vec<Orchestrator<ReliableChannel>> {
    let identities: Vec<Identity> = (0..n).map(|_| Identity::generate()).collect();
    let roster: Vec<PeerKey> = identities.iter().map(|i| i.peer_key().clone()).collect();

    identities
        .iter()
        .map(|identity| {
            let me = identity.fingerprint();
            let peers: Vec<PeerKey> =
                roster.iter().filter(|k| k.fingerprint() != me).cloned().collect();
            let recipients = peers.iter().map(|k| k.fingerprint().to_hex()).collect();

            let channel = ReliableChannel::new(me.to_hex(), recipients, schedule);
            let (link, inbound) = relay.connect(channel.local_id()).unwrap();
            channel.attach(Some(link));
            channel.spawn_inbound(inbound);

            Orchestrator::new(identity.clone(), peers, "integration", channel).unwrap()
        })
        .collect()
}

/// Sessions for `n` fresh players, connected to `relay` and started.
pub fn sessions(relay: &LocalRelay, n: usize, schedule: RetrySchedule) -> Vec<Arc<GameSession>> {
    connected(relay, n, schedule)
        .into_iter()
        .map(|orchestrator| Arc::new(GameSession::start(orchestrator).unwrap()))
        .collect()
}
