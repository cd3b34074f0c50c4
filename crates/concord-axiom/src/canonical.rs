//! Canonical serialization and content digests
//!
//! Every hash in the audit log, every request id, and every frozen-input
//! digest is computed over the canonical JSON form of a record:
//!
//! - object keys in lexicographic order, at every depth
//! - compact output, no insignificant whitespace
//! - struct fields in declaration order before sorting (fixed field set)
//!
//! Two independent implementations that agree on the record shape agree on
//! the bytes, and therefore on the SHA-256 digest.

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use sha2::{Digest as _, Sha256};
use thiserror::Error;

use concord_kernel_core::{AgentId, RequestId, Round};

/// Errors from canonical encoding
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CanonicalError {
    #[error("canonical serialization failed: {0}")]
    Serialize(String),
    #[error("invalid digest hex: {0}")]
    InvalidHex(String),
}

/// SHA-256 content digest. Serialized as lowercase hex.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    /// All-zero digest
    pub const ZERO: Digest = Digest([0u8; 32]);

    /// Hash raw bytes
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Digest(hasher.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, CanonicalError> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out).map_err(|_| CanonicalError::InvalidHex(s.to_string()))?;
        Ok(Digest(out))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Convert a value into its canonical JSON tree
pub fn canonical_value(v: &impl Serialize) -> Result<Value, CanonicalError> {
    let value = serde_json::to_value(v).map_err(|e| CanonicalError::Serialize(e.to_string()))?;
    Ok(sort_json(value))
}

/// Canonical JSON bytes of a value
pub fn canonical_json(v: &impl Serialize) -> Result<Vec<u8>, CanonicalError> {
    let value = canonical_value(v)?;
    to_bytes(&value)
}

/// Serialize an already canonical tree
pub(crate) fn to_bytes(value: &Value) -> Result<Vec<u8>, CanonicalError> {
    serde_json::to_vec(value).map_err(|e| CanonicalError::Serialize(e.to_string()))
}

fn sort_json(v: Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, val) in entries {
                sorted.insert(k, sort_json(val));
            }
            Value::Object(sorted)
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(sort_json).collect()),
        other => other,
    }
}

/// SHA-256 over the canonical JSON of a value
pub fn digest(v: &impl Serialize) -> Result<Digest, CanonicalError> {
    Ok(Digest::of_bytes(&canonical_json(v)?))
}

#[derive(Serialize)]
struct RequestSeed<'a> {
    agent: &'a AgentId,
    round: Round,
    seq: u64,
}

/// Deterministic request id for an agent's `seq`-th proposal, made in `round`.
///
/// Only the controller calls this; agents never see or choose ids.
pub fn request_id(agent: &AgentId, round: Round, seq: u64) -> Result<RequestId, CanonicalError> {
    let d = digest(&RequestSeed { agent, round, seq })?;
    let hex = d.to_hex();
    Ok(RequestId::new(format!("req-{}", &hex[..16])))
}
