//! Fork-tolerant authenticated block log
//!
//! Every participant keeps a replica of the log. The log is an arena of
//! generations: generation `n + 1` holds the blocks whose `precedingBlock`
//! is the hash of generation `n`. Two peers may extend the same generation
//! concurrently; the resulting siblings are merged into one generation kept
//! in canonical order, so replicas holding the same siblings agree on its
//! hash.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

use crate::crypto::{hash_value, Fingerprint, Hash, Identity, PeerKey};
use crate::protocol::block::{Block, Generation, Genesis};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LogError {
    #[error("block does not extend the current or previous generation")]
    IncompatibleBlock,

    #[error("block is malformed")]
    MalformedBlock,

    #[error("block signature does not verify under its author's key")]
    InvalidSignature,

    #[error("block was built against a different state")]
    IncompatibleState,
}

impl LogError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::IncompatibleBlock => "INCOMPATIBLE_BLOCK",
            Self::MalformedBlock => "MALFORMED_BLOCK",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::IncompatibleState => "INCOMPATIBLE_STATE",
        }
    }
}

/// How a foreign block ended up in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The block opened a new generation
    Opened,
    /// The block joined the current generation as a sibling
    Joined,
    /// The block was already committed; nothing changed
    Duplicate,
}

/// Read the `precedingBlock` field of a wire block without decoding it.
pub fn preceding_hash(candidate: &Value) -> Option<Hash> {
    candidate
        .get("precedingBlock")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
}

/// One participant's replica of the shared log
pub struct AuthenticatedLog<P> {
    identity: Identity,
    roster: BTreeMap<Fingerprint, PeerKey>,
    generations: Vec<Generation<P>>,
    generation_hashes: Vec<Hash>,
    block_index: HashMap<Hash, usize>,
    seen_generations: HashSet<Hash>,
}

impl<P> AuthenticatedLog<P>
where
    P: Serialize + DeserializeOwned + Clone,
{
    /// Create a replica rooted at the genesis derived from the roster.
    ///
    /// The local identity is always part of the roster, so `peers` may or may
    /// not contain it.
    pub fn new(identity: Identity, peers: impl IntoIterator<Item = PeerKey>, label: &str) -> Self {
        let mut roster: BTreeMap<Fingerprint, PeerKey> = peers
            .into_iter()
            .map(|key| (key.fingerprint(), key))
            .collect();
        roster.insert(identity.fingerprint(), identity.peer_key().clone());

        let genesis = Generation::Genesis(Genesis::new(roster.values(), label));
        let genesis_hash = genesis.hash();

        Self {
            identity,
            roster,
            generations: vec![genesis],
            generation_hashes: vec![genesis_hash],
            block_index: HashMap::new(),
            seen_generations: HashSet::from([genesis_hash]),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn owner(&self) -> Fingerprint {
        self.identity.fingerprint()
    }

    /// Participants sorted by fingerprint
    pub fn roster(&self) -> &BTreeMap<Fingerprint, PeerKey> {
        &self.roster
    }

    pub fn participants(&self) -> Vec<Fingerprint> {
        self.roster.keys().copied().collect()
    }

    pub fn generations(&self) -> &[Generation<P>] {
        &self.generations
    }

    /// Number of generations, genesis included
    pub fn len(&self) -> usize {
        self.generations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generations.is_empty()
    }

    /// Blocks of the current generation (empty for genesis)
    pub fn head(&self) -> &[Block<P>] {
        self.generations.last().map(Generation::blocks).unwrap_or(&[])
    }

    pub fn head_hash(&self) -> Hash {
        self.generation_hashes.last().copied().unwrap_or(Hash::NONE)
    }

    pub fn previous_hash(&self) -> Option<Hash> {
        let n = self.generation_hashes.len();
        (n >= 2).then(|| self.generation_hashes[n - 2])
    }

    /// Whether `hash` ever named a generation of this replica, including
    /// generations whose hash changed when a sibling joined.
    pub fn is_known_generation(&self, hash: &Hash) -> bool {
        self.seen_generations.contains(hash)
    }

    pub fn contains_block(&self, hash: &Hash) -> bool {
        self.block_index.contains_key(hash)
    }

    /// Sign and append a local block, opening a new generation.
    pub fn commit_own(&mut self, state: Hash, payload: P) -> Result<Block<P>, LogError> {
        let block = Block::signed(&self.identity, Some(self.head_hash()), state, payload)
            .map_err(|_| LogError::MalformedBlock)?;
        let block_hash = block.hash();

        self.open_generation(block.clone(), block_hash);
        tracing::debug!(
            block = %block_hash.short(),
            generation = self.generations.len() - 1,
            "committed own block"
        );
        Ok(block)
    }

    /// Decode a wire block and check its signature under the author's roster
    /// key.
    ///
    /// The signature is checked over `candidate` itself rather than the
    /// decoded block, so fields that decoding would drop still count.
    pub fn authenticate(&self, candidate: &Value) -> Result<Block<P>, LogError> {
        let block = Block::<P>::from_wire(candidate).map_err(|_| LogError::MalformedBlock)?;
        let verified = self
            .roster
            .get(&block.author)
            .is_some_and(|key| key.verify_value(candidate, &block.signature));
        if !verified {
            return Err(LogError::InvalidSignature);
        }
        Ok(block)
    }

    /// Validate a block received from a peer and append it.
    ///
    /// `on_accept` runs only once every check has passed; if it fails the log
    /// is left exactly as it was.
    pub fn commit_foreign<F, E>(
        &mut self,
        state: &Hash,
        candidate: &Value,
        on_accept: F,
    ) -> Result<CommitOutcome, E>
    where
        F: FnOnce(&Block<P>) -> Result<(), E>,
        E: From<LogError>,
    {
        let block_hash = hash_value(candidate);
        if self.block_index.contains_key(&block_hash) {
            tracing::trace!(block = %block_hash.short(), "ignoring duplicate block");
            return Ok(CommitOutcome::Duplicate);
        }

        let preceding = preceding_hash(candidate).ok_or(LogError::IncompatibleBlock)?;
        let opens = if preceding == self.head_hash() {
            true
        } else if Some(preceding) == self.previous_hash() {
            false
        } else {
            return Err(LogError::IncompatibleBlock.into());
        };

        let block = self.authenticate(candidate)?;

        if block.state != *state {
            return Err(LogError::IncompatibleState.into());
        }

        on_accept(&block)?;

        if opens {
            self.open_generation(block, block_hash);
            Ok(CommitOutcome::Opened)
        } else {
            self.join_current(block, block_hash);
            Ok(CommitOutcome::Joined)
        }
    }

    fn open_generation(&mut self, block: Block<P>, block_hash: Hash) {
        let generation = Generation::Blocks(vec![block]);
        let generation_hash = generation.hash();
        self.generations.push(generation);
        self.generation_hashes.push(generation_hash);
        self.seen_generations.insert(generation_hash);
        self.block_index.insert(block_hash, self.generations.len() - 1);
    }

    fn join_current(&mut self, block: Block<P>, block_hash: Hash) {
        let index = self.generations.len() - 1;
        if let Some(Generation::Blocks(siblings)) = self.generations.last_mut() {
            siblings.push(block);
            siblings.sort_by_cached_key(|b| (b.author, b.hash()));
        }
        let generation_hash = self.generations[index].hash();
        self.generation_hashes[index] = generation_hash;
        self.seen_generations.insert(generation_hash);
        self.block_index.insert(block_hash, index);
    }
}
