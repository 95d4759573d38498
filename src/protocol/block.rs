//! Signed blocks and the generations they are grouped into

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::constants::{BLOCK_FIELDS, PROTOCOL_VERSION};
use crate::crypto::{hash, Fingerprint, Hash, Identity, PeerKey, Signature};

/// One signed entry of the log.
///
/// On the wire a block is a JSON object with exactly five fields:
/// `precedingBlock`, `author`, `state`, `payload` and `signature`. The
/// signature covers the canonical form of the other four (with `signature`
/// itself set to `null`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Block<P> {
    pub preceding_block: Option<Hash>,
    pub author: Fingerprint,
    pub state: Hash,
    pub payload: P,
    pub signature: Signature,
}

impl<P: Serialize> Block<P> {
    /// Build and sign a block as `identity`.
    pub fn signed(
        identity: &Identity,
        preceding_block: Option<Hash>,
        state: Hash,
        payload: P,
    ) -> Result<Self, serde_json::Error> {
        let unsigned = json!({
            "precedingBlock": preceding_block,
            "author": identity.fingerprint(),
            "state": state,
            "payload": serde_json::to_value(&payload)?,
            "signature": Value::Null,
        });
        let signature = identity.sign_value(&unsigned);

        Ok(Self {
            preceding_block,
            author: identity.fingerprint(),
            state,
            payload,
            signature,
        })
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Content hash of the whole block, signature included
    pub fn hash(&self) -> Hash {
        hash(self)
    }

    /// Check the signature against `key`.
    pub fn verify(&self, key: &PeerKey) -> bool {
        match self.to_value() {
            Ok(value) => key.verify_value(&value, &self.signature),
            Err(_) => false,
        }
    }
}

impl<P: DeserializeOwned> Block<P> {
    /// Decode a wire block, insisting on exactly the five block fields.
    pub fn from_wire(value: &Value) -> Result<Self, serde_json::Error> {
        let object = value
            .as_object()
            .ok_or_else(|| serde_json::Error::custom("block is not an object"))?;
        if object.len() != BLOCK_FIELDS.len()
            || !BLOCK_FIELDS.iter().all(|f| object.contains_key(*f))
        {
            return Err(serde_json::Error::custom(format!(
                "block must have exactly the fields {:?}",
                BLOCK_FIELDS
            )));
        }
        serde_json::from_value(value.clone())
    }
}

/// Root of every replica's log, derived locally from the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Genesis {
    pub preceding_block: Option<Hash>,
    pub protocol_version: u32,
    pub label: String,
    /// fingerprint -> hex public key
    pub participants: BTreeMap<Fingerprint, String>,
}

impl Genesis {
    pub fn new<'a>(keys: impl IntoIterator<Item = &'a PeerKey>, label: &str) -> Self {
        let participants = keys
            .into_iter()
            .map(|k| (k.fingerprint(), k.to_hex()))
            .collect();
        Self {
            preceding_block: None,
            protocol_version: PROTOCOL_VERSION,
            label: label.to_string(),
            participants,
        }
    }
}

/// Set of sibling blocks sharing one predecessor
#[derive(Debug, Clone)]
pub enum Generation<P> {
    Genesis(Genesis),
    Blocks(Vec<Block<P>>),
}

impl<P: Serialize> Generation<P> {
    pub fn hash(&self) -> Hash {
        match self {
            Self::Genesis(genesis) => hash(genesis),
            Self::Blocks(blocks) => hash(blocks),
        }
    }
}

impl<P> Generation<P> {
    pub fn blocks(&self) -> &[Block<P>] {
        match self {
            Self::Genesis(_) => &[],
            Self::Blocks(blocks) => blocks,
        }
    }
}
