//! Canonical content hashing
//!
//! Structured values are reduced to a canonical JSON form (object keys sorted,
//! no insignificant whitespace) before digesting, so two replicas that build
//! the same value in a different field order agree on its hash.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use super::CryptoError;

/// Size of a digest in bytes
pub const HASH_SIZE: usize = 32;

/// SHA-256 digest, serialized as 64 lowercase hex characters
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash([u8; HASH_SIZE]);

/// Fingerprint of a public key; the address of a participant
pub type Fingerprint = Hash;

impl Hash {
    /// Distinguished "no hash" result for values that cannot be hashed
    pub const NONE: Hash = Hash([0u8; HASH_SIZE]);

    pub fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }

    /// SHA-256 of raw bytes
    pub fn digest(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First eight hex characters, for logs
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.short())
    }
}

impl FromStr for Hash {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_lower_hex(s, HASH_SIZE)?;
        let mut out = [0u8; HASH_SIZE];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Decode a lowercase hex string of exactly `len` bytes.
pub(crate) fn decode_lower_hex(s: &str, len: usize) -> Result<Vec<u8>, CryptoError> {
    if s.len() != len * 2 || !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return Err(CryptoError::MalformedHex {
            expected: len * 2,
            actual: s.len(),
        });
    }
    hex::decode(s).map_err(|_| CryptoError::MalformedHex {
        expected: len * 2,
        actual: s.len(),
    })
}

/// Content hash of any serializable value.
///
/// A bare string is digested as its raw UTF-8 bytes; anything else is
/// digested in canonical JSON form. Values that fail to serialize, or
/// serialize to `null` (such as `Option::None`), yield [`Hash::NONE`].
pub fn hash<T: Serialize + ?Sized>(value: &T) -> Hash {
    match serde_json::to_value(value) {
        Ok(Value::Null) | Err(_) => Hash::NONE,
        Ok(Value::String(s)) => Hash::digest(s.as_bytes()),
        Ok(v) => Hash::digest(&canonical_json(&v)),
    }
}

/// Hash of an already-decoded JSON value, with the same rules as [`hash`].
pub fn hash_value(value: &Value) -> Hash {
    match value {
        Value::Null => Hash::NONE,
        Value::String(s) => Hash::digest(s.as_bytes()),
        v => Hash::digest(&canonical_json(v)),
    }
}

/// Canonical JSON encoding: object keys in byte order, compact separators.
pub fn canonical_json(value: &Value) -> Vec<u8> {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out.into_bytes()
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_independent() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"y":[1,2],"x":null}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":{"x":null,"y":[1,2]},"b":1}"#).unwrap();
        assert_eq!(hash_value(&a), hash_value(&b));
        assert_eq!(canonical_json(&a), br#"{"a":{"x":null,"y":[1,2]},"b":1}"#.to_vec());
    }

    #[test]
    fn test_strings_hash_raw_bytes() {
        // sha256("abc")
        assert_eq!(
            hash("abc").to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_none_is_distinguished() {
        let nothing: Option<u8> = None;
        assert!(hash(&nothing).is_none());
        assert!(hash_value(&Value::Null).is_none());
        assert!(!hash(&json!({})).is_none());
    }

    #[test]
    fn test_hex_round_trip_rejects_malformed() {
        let h = hash("dice");
        assert_eq!(h.to_hex().parse::<Hash>().unwrap(), h);
        assert!("ABC".parse::<Hash>().is_err());
        assert!(h.to_hex().to_uppercase().parse::<Hash>().is_err());
        assert!(format!("{}0", h).parse::<Hash>().is_err());
    }
}
