// src/crypto/keys.rs
use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::hash::{canonical_json, decode_lower_hex, hash, Fingerprint};
use super::CryptoError;

/// Size of an ed25519 signature in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Field blanked out of a signed object before signing or verifying
pub const SIGNATURE_FIELD: &str = "signature";

/// Detached ed25519 signature, serialized as 128 lowercase hex characters
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_SIZE]);

impl Signature {
    pub fn from_bytes(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}…)", hex::encode(&self.0[..4]))
    }
}

impl FromStr for Signature {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_lower_hex(s, SIGNATURE_SIZE)?;
        let mut out = [0u8; SIGNATURE_SIZE];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Fingerprint of a public key: the hash of its canonical hex encoding.
pub fn fingerprint(public_key: &VerifyingKey) -> Fingerprint {
    hash(&hex::encode(public_key.to_bytes()))
}

/// Bytes covered by a signature: the canonical JSON of `value` with its
/// signature field set to `null`, so a signature never covers itself.
pub fn signing_payload(value: &Value) -> Vec<u8> {
    let mut blanked = value.clone();
    if let Value::Object(map) = &mut blanked {
        map.insert(SIGNATURE_FIELD.to_string(), Value::Null);
    }
    canonical_json(&blanked)
}

/// Public half of a participant's keypair
#[derive(Clone, PartialEq, Eq)]
pub struct PeerKey {
    key: VerifyingKey,
    fingerprint: Fingerprint,
}

impl PeerKey {
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let key = VerifyingKey::from_bytes(bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self::from_verifying_key(key))
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = decode_lower_hex(s.trim(), 32)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Self::from_bytes(&out)
    }

    pub fn from_verifying_key(key: VerifyingKey) -> Self {
        Self {
            fingerprint: fingerprint(&key),
            key,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.key.to_bytes())
    }

    pub fn verify_bytes(&self, message: &[u8], signature: &Signature) -> bool {
        let signature = DalekSignature::from_bytes(signature.as_bytes());
        self.key.verify(message, &signature).is_ok()
    }

    /// Verify a signed JSON object over its blanked form.
    pub fn verify_value(&self, value: &Value, signature: &Signature) -> bool {
        self.verify_bytes(&signing_payload(value), signature)
    }
}

impl fmt::Debug for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerKey({})", self.fingerprint.short())
    }
}

/// A participant's own keypair
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
    peer_key: PeerKey,
}

impl Identity {
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(bytes))
    }

    pub fn from_secret_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = decode_lower_hex(s.trim(), 32)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Self::from_secret_bytes(&out))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let peer_key = PeerKey::from_verifying_key(signing_key.verifying_key());
        Self {
            signing_key,
            peer_key,
        }
    }

    pub fn peer_key(&self) -> &PeerKey {
        &self.peer_key
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.peer_key.fingerprint()
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    pub fn sign_bytes(&self, message: &[u8]) -> Signature {
        Signature(self.signing_key.sign(message).to_bytes())
    }

    /// Sign a JSON object over its blanked form.
    pub fn sign_value(&self, value: &Value) -> Signature {
        self.sign_bytes(&signing_payload(value))
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sign_then_verify() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let value = json!({ "payload": { "n": 1 }, "signature": null });

        let signature = alice.sign_value(&value);
        assert!(alice.peer_key().verify_value(&value, &signature));
        assert!(!bob.peer_key().verify_value(&value, &signature));
    }

    #[test]
    fn test_signature_field_is_blanked() {
        let alice = Identity::generate();
        let unsigned = json!({ "payload": "x", "signature": null });
        let signature = alice.sign_value(&unsigned);

        let signed = json!({ "payload": "x", "signature": signature.to_hex() });
        assert!(alice.peer_key().verify_value(&signed, &signature));

        let tampered = json!({ "payload": "y", "signature": signature.to_hex() });
        assert!(!alice.peer_key().verify_value(&tampered, &signature));
    }

    #[test]
    fn test_fingerprint_is_hash_of_hex_key() {
        let alice = Identity::generate();
        assert_eq!(alice.fingerprint(), hash(&alice.peer_key().to_hex()));
    }

    #[test]
    fn test_key_hex_round_trip() {
        let alice = Identity::generate();
        let restored = Identity::from_secret_hex(&alice.secret_hex()).unwrap();
        assert_eq!(restored.fingerprint(), alice.fingerprint());
        let public = PeerKey::from_hex(&alice.peer_key().to_hex()).unwrap();
        assert_eq!(&public, alice.peer_key());
        assert!(PeerKey::from_hex("zz").is_err());
    }
}
