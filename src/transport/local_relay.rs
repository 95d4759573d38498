//! In-process relay
//!
//! A per-id switchboard with the same contract as the network relay: one
//! registration per id, frames forwarded verbatim to the connection
//! registered under the frame's `recipient`, dropped when nobody is.
//! An optional drop rate loses frames on purpose, to exercise retries.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

use super::traits::Connection;
use super::TransportError;

/// Shortest id the relay accepts
pub const MIN_ID_LEN: usize = 16;

#[derive(Default)]
struct Switchboard {
    clients: HashMap<String, mpsc::UnboundedSender<String>>,
    forwarded: u64,
    dropped: u64,
}

struct Loss {
    rate: f64,
    rng: ChaCha20Rng,
}

/// Cloneable handle to one in-process relay
#[derive(Clone, Default)]
pub struct LocalRelay {
    board: Arc<Mutex<Switchboard>>,
    loss: Arc<Mutex<Option<Loss>>>,
}

impl LocalRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relay that loses each frame with probability `rate`, reproducibly
    /// for a given `seed`.
    pub fn with_drop_rate(rate: f64, seed: u64) -> Self {
        let relay = Self::new();
        *relay.loss.lock() = Some(Loss {
            rate: rate.clamp(0.0, 1.0),
            rng: ChaCha20Rng::seed_from_u64(seed),
        });
        relay
    }

    /// Register `id` and return its outbound link plus the stream of frames
    /// addressed to it.
    ///
    /// The registration lasts until the link is dropped.
    pub fn connect(
        &self,
        id: &str,
    ) -> Result<(Arc<RelayLink>, mpsc::UnboundedReceiver<String>), TransportError> {
        if id.len() < MIN_ID_LEN {
            return Err(TransportError::InvalidId(id.to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut board = self.board.lock();
            if board.clients.contains_key(id) {
                return Err(TransportError::IdTaken(id.to_string()));
            }
            board.clients.insert(id.to_string(), tx);
        }
        tracing::debug!(id = %short(id), "relay client connected");

        let link = RelayLink {
            id: id.to_string(),
            board: Arc::downgrade(&self.board),
            loss: Arc::clone(&self.loss),
        };
        Ok((Arc::new(link), rx))
    }

    pub fn is_connected(&self, id: &str) -> bool {
        self.board.lock().clients.contains_key(id)
    }

    /// (forwarded, dropped) frame counts
    pub fn counters(&self) -> (u64, u64) {
        let board = self.board.lock();
        (board.forwarded, board.dropped)
    }
}

fn short(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// One registered client's outbound half
pub struct RelayLink {
    id: String,
    board: Weak<Mutex<Switchboard>>,
    loss: Arc<Mutex<Option<Loss>>>,
}

impl RelayLink {
    pub fn id(&self) -> &str {
        &self.id
    }

    fn lose(&self) -> bool {
        match self.loss.lock().as_mut() {
            Some(loss) => loss.rng.gen_bool(loss.rate),
            None => false,
        }
    }
}

impl Connection for RelayLink {
    fn send_frame(&self, frame: &str) -> Result<(), TransportError> {
        let board = self.board.upgrade().ok_or(TransportError::NotConnected)?;

        let recipient = serde_json::from_str::<Value>(frame)
            .ok()
            .and_then(|v| v.get("recipient").and_then(Value::as_str).map(str::to_string));
        let Some(recipient) = recipient else {
            return Err(TransportError::MalformedFrame("frame has no recipient".into()));
        };

        let lost = self.lose();
        let mut board = board.lock();
        let delivered = !lost
            && board
                .clients
                .get(&recipient)
                .is_some_and(|tx| tx.send(frame.to_string()).is_ok());
        if delivered {
            board.forwarded += 1;
        } else {
            board.dropped += 1;
        }
        Ok(())
    }
}

impl Drop for RelayLink {
    fn drop(&mut self) {
        if let Some(board) = self.board.upgrade() {
            board.lock().clients.remove(&self.id);
            tracing::debug!(id = %short(&self.id), "relay client disconnected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "alice-0000000000000000";
    const BOB: &str = "bob-00000000000000000000";

    fn frame(recipient: &str) -> String {
        format!(
            r#"{{"type":"ack","uuid":"67e55044-10b1-426f-9247-bb680e5fe0c8","recipient":"{}"}}"#,
            recipient
        )
    }

    #[test]
    fn test_registration_rules() {
        let relay = LocalRelay::new();
        assert_eq!(relay.connect("").err(), Some(TransportError::InvalidId(String::new())));
        assert!(matches!(relay.connect("short"), Err(TransportError::InvalidId(_))));

        let (link, _rx) = relay.connect(ALICE).unwrap();
        assert!(matches!(relay.connect(ALICE), Err(TransportError::IdTaken(_))));

        drop(link);
        assert!(!relay.is_connected(ALICE));
        assert!(relay.connect(ALICE).is_ok());
    }

    #[test]
    fn test_forwards_to_recipient_only() {
        let relay = LocalRelay::new();
        let (alice, mut alice_rx) = relay.connect(ALICE).unwrap();
        let (_bob, mut bob_rx) = relay.connect(BOB).unwrap();

        alice.send_frame(&frame(BOB)).unwrap();
        assert_eq!(bob_rx.try_recv().unwrap(), frame(BOB));
        assert!(alice_rx.try_recv().is_err());

        // Absent recipients are silently dropped
        alice.send_frame(&frame("carol-000000000000000000")).unwrap();
        assert_eq!(relay.counters(), (1, 1));
        assert!(alice.send_frame("{}").is_err());
    }

    #[test]
    fn test_total_loss() {
        let relay = LocalRelay::with_drop_rate(1.0, 7);
        let (alice, _alice_rx) = relay.connect(ALICE).unwrap();
        let (_bob, mut bob_rx) = relay.connect(BOB).unwrap();
        for _ in 0..10 {
            alice.send_frame(&frame(BOB)).unwrap();
        }
        assert!(bob_rx.try_recv().is_err());
        assert_eq!(relay.counters(), (0, 10));
    }
}
