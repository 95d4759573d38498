//! Commit-reveal scheme for fair randomness generation
//!
//! Every participant commits to `k` hidden `(seed, value)` pairs before anyone
//! reveals. The round's output for each slot is the XOR of all revealed
//! values, which stays uniform as long as one contributor is honest.

use rand::RngCore;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

use crate::crypto::hash::decode_lower_hex;
use crate::crypto::{hash, Fingerprint, Hash};
use crate::protocol::constants::{DIE_FACES, SEED_SIZE, VALUE_HEX_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RoundError {
    #[error("sender is not a participant of this round")]
    NotParticipant,

    #[error("wrong number of slots for this round")]
    WrongArity,

    #[error("participant already submitted")]
    AlreadySubmitted,

    #[error("not every participant has committed yet")]
    HashesNotCompleteYet,

    #[error("revealed value does not match the commitment")]
    HashValueMismatch,

    #[error("round is not complete yet")]
    InputNotCompleteYet,
}

impl RoundError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotParticipant => "NOT_PARTICIPANT",
            Self::WrongArity => "WRONG_ARITY",
            Self::AlreadySubmitted => "ALREADY_SUBMITTED",
            Self::HashesNotCompleteYet => "HASHES_NOT_COMPLETE_YET",
            Self::HashValueMismatch => "HASH_VALUE_MISMATCH",
            Self::InputNotCompleteYet => "INPUT_NOT_COMPLETE_YET",
        }
    }
}

/// Blinding seed, serialized as 64 lowercase hex characters
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Seed([u8; SEED_SIZE]);

impl Seed {
    pub fn from_bytes(bytes: [u8; SEED_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seed({}…)", hex::encode(&self.0[..4]))
    }
}

impl Serialize for Seed {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Seed {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = decode_lower_hex(&s, SEED_SIZE).map_err(de::Error::custom)?;
        let mut out = [0u8; SEED_SIZE];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

/// 32-bit contribution, serialized as 8 lowercase hex characters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomValue(pub u32);

impl RandomValue {
    pub fn to_hex(&self) -> String {
        format!("{:0width$x}", self.0, width = VALUE_HEX_LEN)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        decode_lower_hex(s, VALUE_HEX_LEN / 2)
            .ok()
            .map(|b| Self(u32::from_be_bytes([b[0], b[1], b[2], b[3]])))
    }
}

impl Serialize for RandomValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for RandomValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).ok_or_else(|| de::Error::custom("value must be 8 lowercase hex chars"))
    }
}

/// One opened slot: the seed and value behind a commitment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reveal {
    pub seed: Seed,
    pub value: RandomValue,
}

impl Reveal {
    /// Commitment hash: `hash(seed_hex ‖ value_hex)`
    pub fn commitment(&self) -> Hash {
        hash(&format!("{}{}", self.seed.to_hex(), self.value.to_hex()))
    }

    /// Verify against a published commitment
    pub fn matches(&self, commitment: &Hash) -> bool {
        self.commitment() == *commitment
    }
}

/// A participant's private contribution to one round
#[derive(Debug, Clone)]
pub struct LocalSecrets {
    reveals: Vec<Reveal>,
}

impl LocalSecrets {
    /// Generate `arity` independent `(seed, value)` pairs.
    pub fn generate<R: RngCore + ?Sized>(arity: usize, rng: &mut R) -> Self {
        let reveals = (0..arity)
            .map(|_| {
                let mut seed = [0u8; SEED_SIZE];
                rng.fill_bytes(&mut seed);
                Reveal {
                    seed: Seed(seed),
                    value: RandomValue(rng.next_u32()),
                }
            })
            .collect();
        Self { reveals }
    }

    pub fn arity(&self) -> usize {
        self.reveals.len()
    }

    pub fn commitments(&self) -> Vec<Hash> {
        self.reveals.iter().map(Reveal::commitment).collect()
    }

    pub fn reveals(&self) -> &[Reveal] {
        &self.reveals
    }
}

/// Multi-party randomness round
#[derive(Debug, Clone)]
pub struct RandomnessRound {
    participants: Vec<Fingerprint>,
    arity: usize,
    commitments: Vec<Option<Vec<Hash>>>,
    reveals: Vec<Option<Vec<Reveal>>>,
}

impl RandomnessRound {
    pub fn new(arity: usize, participants: Vec<Fingerprint>) -> Self {
        let n = participants.len();
        Self {
            participants,
            arity,
            commitments: vec![None; n],
            reveals: vec![None; n],
        }
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn participants(&self) -> &[Fingerprint] {
        &self.participants
    }

    fn index_of(&self, player: &Fingerprint) -> Result<usize, RoundError> {
        self.participants
            .iter()
            .position(|p| p == player)
            .ok_or(RoundError::NotParticipant)
    }

    /// Publish `player`'s commitments.
    pub fn submit_commitments(
        &mut self,
        player: &Fingerprint,
        hashes: &[Hash],
    ) -> Result<(), RoundError> {
        let pid = self.index_of(player)?;
        if hashes.len() != self.arity {
            return Err(RoundError::WrongArity);
        }
        if self.commitments[pid].is_some() {
            return Err(RoundError::AlreadySubmitted);
        }
        self.commitments[pid] = Some(hashes.to_vec());
        Ok(())
    }

    /// Open `player`'s commitments. Each reveal must reproduce the same
    /// player's own commitment for that slot.
    pub fn submit_reveals(
        &mut self,
        player: &Fingerprint,
        reveals: &[Reveal],
    ) -> Result<(), RoundError> {
        let pid = self.index_of(player)?;
        if reveals.len() != self.arity {
            return Err(RoundError::WrongArity);
        }
        if !self.commitments_complete() {
            return Err(RoundError::HashesNotCompleteYet);
        }
        if self.reveals[pid].is_some() {
            return Err(RoundError::AlreadySubmitted);
        }
        let own = self.commitments[pid]
            .as_ref()
            .ok_or(RoundError::HashesNotCompleteYet)?;
        if reveals.iter().zip(own).any(|(r, c)| !r.matches(c)) {
            return Err(RoundError::HashValueMismatch);
        }
        self.reveals[pid] = Some(reveals.to_vec());
        Ok(())
    }

    pub fn commitments_complete(&self) -> bool {
        self.commitments.iter().all(Option::is_some)
    }

    pub fn is_complete(&self) -> bool {
        self.commitments_complete() && self.reveals.iter().all(Option::is_some)
    }

    pub fn has_committed(&self, player: &Fingerprint) -> bool {
        self.index_of(player)
            .map(|i| self.commitments[i].is_some())
            .unwrap_or(false)
    }

    pub fn has_revealed(&self, player: &Fingerprint) -> bool {
        self.index_of(player)
            .map(|i| self.reveals[i].is_some())
            .unwrap_or(false)
    }

    /// Whether `player` may publish commitments now
    pub fn can_commit(&self, player: &Fingerprint) -> bool {
        self.index_of(player).is_ok() && !self.has_committed(player)
    }

    /// Whether `player` may reveal now
    pub fn can_reveal(&self, player: &Fingerprint) -> bool {
        self.commitments_complete() && self.index_of(player).is_ok() && !self.has_revealed(player)
    }

    /// XOR of every participant's value per slot, read as a signed 32-bit int.
    pub fn result(&self) -> Result<Vec<i32>, RoundError> {
        if !self.is_complete() {
            return Err(RoundError::InputNotCompleteYet);
        }
        let numbers = (0..self.arity)
            .map(|slot| {
                self.reveals
                    .iter()
                    .flatten()
                    .fold(0u32, |acc, rs| acc ^ rs[slot].value.0) as i32
            })
            .collect();
        Ok(numbers)
    }
}

/// Map a round output to a die face: `|n| mod 6 + 1`
pub fn to_die(n: i32) -> u8 {
    (n.unsigned_abs() % DIE_FACES as u32) as u8 + 1
}

pub fn to_dice(numbers: &[i32]) -> Vec<u8> {
    numbers.iter().copied().map(to_die).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn fp(name: &str) -> Fingerprint {
        hash(name)
    }

    fn reveal(seed_byte: u8, value: &str) -> Reveal {
        Reveal {
            seed: Seed([seed_byte; SEED_SIZE]),
            value: RandomValue::from_hex(value).unwrap(),
        }
    }

    #[test]
    fn test_two_player_scenario() {
        let (alice, bob) = (fp("alice"), fp("bob"));
        let a = reveal(1, "6b2df804");
        let b = reveal(2, "7d6d2b55");

        let mut round = RandomnessRound::new(1, vec![alice, bob]);
        round.submit_commitments(&alice, &[a.commitment()]).unwrap();
        round.submit_commitments(&bob, &[b.commitment()]).unwrap();
        round.submit_reveals(&alice, &[a]).unwrap();
        assert_eq!(round.result(), Err(RoundError::InputNotCompleteYet));
        round.submit_reveals(&bob, &[b]).unwrap();

        assert_eq!(round.result().unwrap(), vec![373347153]);
        assert_eq!(to_dice(&round.result().unwrap()), vec![4]);
    }

    #[test]
    fn test_xor_reads_as_signed() {
        let (alice, bob) = (fp("alice"), fp("bob"));
        let a = [reveal(1, "6b2df804"), reveal(3, "02713fef")];
        let b = [reveal(2, "7d6d2b55"), reveal(4, "bc0150fb")];

        let mut round = RandomnessRound::new(2, vec![alice, bob]);
        round.submit_commitments(&alice, &a.map(|r| r.commitment())).unwrap();
        round.submit_commitments(&bob, &b.map(|r| r.commitment())).unwrap();
        round.submit_reveals(&alice, &a).unwrap();
        round.submit_reveals(&bob, &b).unwrap();

        assert_eq!(round.result().unwrap(), vec![373347153, -1099927788]);
        assert_eq!(to_dice(&round.result().unwrap()), vec![4, 1]);
    }

    #[test]
    fn test_reveal_must_match_own_commitment() {
        let (alice, bob) = (fp("alice"), fp("bob"));
        let a = reveal(1, "00000001");
        let b = reveal(2, "00000002");

        let mut round = RandomnessRound::new(1, vec![alice, bob]);
        round.submit_commitments(&alice, &[a.commitment()]).unwrap();
        round.submit_commitments(&bob, &[b.commitment()]).unwrap();

        // Bob's reveal is valid for Bob only
        assert_eq!(round.submit_reveals(&alice, &[b]), Err(RoundError::HashValueMismatch));
        let forged = Reveal { value: RandomValue(3), ..a };
        assert_eq!(round.submit_reveals(&alice, &[forged]), Err(RoundError::HashValueMismatch));
        assert!(!round.has_revealed(&alice));
        round.submit_reveals(&alice, &[a]).unwrap();
    }

    #[test]
    fn test_commitments_before_reveals() {
        let (alice, bob) = (fp("alice"), fp("bob"));
        let mut rng = ChaCha20Rng::from_seed([7u8; 32]);
        let a = LocalSecrets::generate(1, &mut rng);

        let mut round = RandomnessRound::new(1, vec![alice, bob]);
        assert_eq!(
            round.submit_reveals(&alice, a.reveals()),
            Err(RoundError::HashesNotCompleteYet)
        );
        round.submit_commitments(&alice, &a.commitments()).unwrap();
        assert!(!round.can_reveal(&alice));
        assert_eq!(
            round.submit_reveals(&alice, a.reveals()),
            Err(RoundError::HashesNotCompleteYet)
        );
    }

    #[test]
    fn test_rejects_wrong_arity_duplicates_and_strangers() {
        let alice = fp("alice");
        let mut rng = ChaCha20Rng::from_seed([9u8; 32]);
        let a = LocalSecrets::generate(2, &mut rng);
        let other = LocalSecrets::generate(2, &mut rng);

        let mut round = RandomnessRound::new(2, vec![alice]);
        assert_eq!(
            round.submit_commitments(&fp("mallory"), &a.commitments()),
            Err(RoundError::NotParticipant)
        );
        assert_eq!(
            round.submit_commitments(&alice, &a.commitments()[..1]),
            Err(RoundError::WrongArity)
        );
        round.submit_commitments(&alice, &a.commitments()).unwrap();
        assert_eq!(
            round.submit_commitments(&alice, &other.commitments()),
            Err(RoundError::AlreadySubmitted)
        );
        assert_eq!(round.submit_reveals(&alice, &a.reveals()[..1]), Err(RoundError::WrongArity));
        round.submit_reveals(&alice, a.reveals()).unwrap();
        assert_eq!(round.submit_reveals(&alice, a.reveals()), Err(RoundError::AlreadySubmitted));
        assert!(round.is_complete());
    }

    #[test]
    fn test_die_mapping_range() {
        for n in [i32::MIN, -7, -1, 0, 1, 5, 6, i32::MAX] {
            let die = to_die(n);
            assert!((1..=6).contains(&die), "{} mapped to {}", n, die);
        }
        assert_eq!(to_die(i32::MIN), (2147483648u32 % 6) as u8 + 1);
    }

    #[test]
    fn test_value_hex_format() {
        assert_eq!(RandomValue(0x2a).to_hex(), "0000002a");
        assert!(RandomValue::from_hex("0000002A").is_none());
        assert!(RandomValue::from_hex("2a").is_none());
        let json = serde_json::to_string(&reveal(0, "deadbeef")).unwrap();
        assert!(json.contains("\"value\":\"deadbeef\""));
    }
}
