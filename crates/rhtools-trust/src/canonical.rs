//! Canonical serialization and content hashing
//!
//! Declaration content is hashed, and the hash is part of the signed payload,
//! so two clients must produce identical bytes for equivalent content. The
//! canonical form is DAG-CBOR over a normalised JSON data model:
//!
//! - map keys are ordered by DAG-CBOR's canonical rule (length, then bytes)
//! - a map entry holding a default (`null`, `false`, `[]`, `{}`) is the same
//!   thing as an absent entry: all are omitted
//! - floating-point numbers are rejected outright
//!
//! The hash algorithm is SHA-256.

use crate::error::{Result, TrustError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;

/// SHA-256 digest of canonicalised content
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// Hex encoding of the digest
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a 64-character hex string
    pub fn from_hex(value: &str) -> Result<Self> {
        let bytes = hex::decode(value)
            .map_err(|e| TrustError::serialization(format!("invalid content hash hex: {e}")))?;
        let array: [u8; 32] = bytes.try_into().map_err(|_| {
            TrustError::serialization("content hash must be exactly 32 bytes")
        })?;
        Ok(Self(array))
    }

    /// Constant-time comparison
    pub fn matches(&self, other: &ContentHash) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ContentHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Serialize any value into canonical bytes
pub fn canonicalize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let json = serde_json::to_value(value)?;
    let normalised = normalise(json)?;
    serde_ipld_dagcbor::to_vec(&normalised)
        .map_err(|e| TrustError::serialization(format!("DAG-CBOR encoding failed: {e}")))
}

/// SHA-256 over arbitrary bytes
pub fn hash(bytes: &[u8]) -> ContentHash {
    let digest = Sha256::digest(bytes);
    let mut output = [0u8; 32];
    output.copy_from_slice(&digest);
    ContentHash(output)
}

/// Canonicalise then hash
pub fn hash_canonical<T: Serialize>(value: &T) -> Result<ContentHash> {
    Ok(hash(&canonicalize(value)?))
}

fn normalise(value: Value) -> Result<Value> {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, entry) in map {
                let entry = normalise(entry)?;
                if is_default(&entry) {
                    continue;
                }
                out.insert(key, entry);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => items
            .into_iter()
            .map(normalise)
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Number(number) => {
            if number.is_f64() {
                return Err(TrustError::serialization(format!(
                    "floating point value {number} is not canonicalisable"
                )));
            }
            Ok(Value::Number(number))
        }
        other => Ok(other),
    }
}

fn is_default(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Hex (de)serialization for byte vectors
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::{BTreeMap, HashMap};

    #[derive(Serialize)]
    struct Forward {
        alpha: u32,
        beta: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        gamma: Option<u32>,
    }

    #[derive(Serialize)]
    struct Reversed {
        beta: &'static str,
        alpha: u32,
        gamma: Option<u32>,
    }

    #[test]
    fn test_field_order_and_null_do_not_matter() {
        let a = Forward {
            alpha: 7,
            beta: "x",
            gamma: None,
        };
        let b = Reversed {
            beta: "x",
            alpha: 7,
            gamma: None,
        };
        assert_eq!(canonicalize(&a).unwrap(), canonicalize(&b).unwrap());
        assert_eq!(hash_canonical(&a).unwrap(), hash_canonical(&b).unwrap());
    }

    #[test]
    fn test_map_insertion_order_does_not_matter() {
        let mut first = HashMap::new();
        first.insert("zeta", 1u32);
        first.insert("a", 2u32);
        first.insert("mid", 3u32);
        let second: BTreeMap<_, _> = first.iter().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(canonicalize(&first).unwrap(), canonicalize(&second).unwrap());
    }

    #[test]
    fn test_nested_nulls_are_dropped() {
        let with_null = json!({"a": {"b": null, "c": [1, 2]}, "d": null});
        let without = json!({"a": {"c": [1, 2]}});
        assert_eq!(
            canonicalize(&with_null).unwrap(),
            canonicalize(&without).unwrap()
        );
    }

    #[test]
    fn test_default_entries_match_absent() {
        let explicit = json!({"scope": {"type": "channel", "targets": ["a"], "exclude": []},
                              "flags": {"x": false}, "keep": [false, 0]});
        let sparse = json!({"scope": {"type": "channel", "targets": ["a"]}, "keep": [false, 0]});
        assert_eq!(canonicalize(&explicit).unwrap(), canonicalize(&sparse).unwrap());

        let zero = json!({"level": 0});
        assert_ne!(canonicalize(&zero).unwrap(), canonicalize(&json!({})).unwrap());
    }

    #[test]
    fn test_floats_are_rejected() {
        let value = json!({"level": 1.5});
        assert!(matches!(
            canonicalize(&value),
            Err(TrustError::Serialization { .. })
        ));
    }

    #[test]
    fn test_content_hash_hex_round_trip() {
        let digest = hash(b"rhtools");
        let parsed = ContentHash::from_hex(&digest.to_hex()).unwrap();
        assert!(parsed.matches(&digest));
        assert!(ContentHash::from_hex("abcd").is_err());
    }
}
