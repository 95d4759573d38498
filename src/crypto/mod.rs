//! crypto module
//!
//! Canonical hashing, fingerprints, and ed25519 signatures over canonical JSON.

pub mod hash;
pub mod keys;

use thiserror::Error;

// Re-export commonly used types
pub use hash::{canonical_json, hash, hash_value, Fingerprint, Hash, HASH_SIZE};
pub use keys::{fingerprint, signing_payload, Identity, PeerKey, Signature, SIGNATURE_SIZE};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("malformed hex: expected {expected} lowercase hex chars, got {actual}")]
    MalformedHex { expected: usize, actual: usize },

    #[error("invalid public key")]
    InvalidPublicKey,
}

impl CryptoError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedHex { .. } => "MALFORMED_HEX",
            Self::InvalidPublicKey => "INVALID_PUBLIC_KEY",
        }
    }
}
