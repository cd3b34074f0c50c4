//! Core kernel types
//!
//! This module contains the fundamental types used throughout the kernel core.
//! All types here are pure data - no behavior that depends on a clock, an
//! agent strategy, or any I/O.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use serde::{Deserialize, Serialize};

/// Round number (zero-indexed epoch counter)
pub type Round = u64;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create from anything string-like
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the raw identifier
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(String::from(value))
            }
        }
    };
}

string_id!(
    /// Agent identity (assigned by the run roster, never by the agent itself)
    AgentId
);
string_id!(
    /// Authority identifier
    AuthorityId
);
string_id!(
    /// Deterministic operation request identifier
    RequestId
);
string_id!(
    /// World state key
    Key
);

/// Scalar world state value. "Absent" is modelled as `Option<Value>::None`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean scalar
    Bool(bool),
    /// Integer scalar
    Int(i64),
    /// String scalar
    Str(String),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(String::from(v))
    }
}

/// Operation kind of a request or an authority scope entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    /// Observe a key without changing it
    Read,
    /// Replace a key's value
    Write,
}

impl OperationKind {
    pub fn is_write(self) -> bool {
        matches!(self, OperationKind::Write)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Read => f.write_str("READ"),
            OperationKind::Write => f.write_str("WRITE"),
        }
    }
}

/// Polarity of an authority
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Commitment {
    /// Holder-bound capability
    Allow,
    /// Global veto
    Deny,
}

/// A single `(key, operation)` pair an authority covers or a request needs
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScopeEntry {
    /// Key covered
    pub key: Key,
    /// Operation covered
    pub operation: OperationKind,
}

impl ScopeEntry {
    pub fn new(key: impl Into<String>, operation: OperationKind) -> Self {
        Self {
            key: Key(key.into()),
            operation,
        }
    }
}

impl fmt::Display for ScopeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key, self.operation)
    }
}

/// Proposed key writes (new values for `WRITE`, empty for `READ`)
pub type Delta = BTreeMap<Key, Option<Value>>;

/// A single proposal submitted by one agent in one round.
///
/// Submitter and id are stamped by the epoch controller, never by the agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    /// Agent that submitted this request
    pub submitter: AgentId,
    /// Deterministic id derived from `(agent, round, sequence)`
    pub id: RequestId,
    /// Operation kind
    pub kind: OperationKind,
    /// Declared scope (keys the request touches)
    pub scope: Vec<Key>,
    /// Proposed new values (`WRITE` only)
    pub delta: Delta,
    /// Authorities cited as justification
    pub citations: Vec<AuthorityId>,
}

impl OperationRequest {
    /// `(key, operation)` pairs implied by scope x kind
    pub fn scope_entries(&self) -> impl Iterator<Item = ScopeEntry> + '_ {
        self.scope.iter().map(move |key| ScopeEntry {
            key: key.clone(),
            operation: self.kind,
        })
    }
}

/// Final adjudication outcome (internal, audit-facing)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    /// Admitted and applied
    Executed,
    /// Lawfully rejected by Pass 1 or Pass 2
    Refused,
    /// Malformed request or unauthorized citation
    StructuralFault,
    /// Agent abstained this round
    NoProposal,
}

impl Outcome {
    /// Project onto the agent-facing channel. Faults are indistinguishable
    /// from refusals there.
    pub fn visible(self) -> VisibleOutcome {
        match self {
            Outcome::Executed => VisibleOutcome::Executed,
            Outcome::Refused | Outcome::StructuralFault => VisibleOutcome::Refused,
            Outcome::NoProposal => VisibleOutcome::NoProposal,
        }
    }
}

/// The only outcome token an agent ever receives
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VisibleOutcome {
    Executed,
    Refused,
    NoProposal,
}

/// An inter-agent message, delivered one round after it was composed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sender identity, stamped by the controller
    pub sender: AgentId,
    /// Round the message was composed in
    pub round: Round,
    /// Opaque payload
    pub payload: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_projects_to_refused() {
        assert_eq!(Outcome::StructuralFault.visible(), VisibleOutcome::Refused);
        assert_eq!(Outcome::Refused.visible(), VisibleOutcome::Refused);
        assert_eq!(Outcome::Executed.visible(), VisibleOutcome::Executed);
        assert_eq!(Outcome::NoProposal.visible(), VisibleOutcome::NoProposal);
    }

    #[test]
    fn test_wire_names() {
        let json = serde_json::to_string(&Outcome::StructuralFault).unwrap();
        assert_eq!(json, "\"STRUCTURAL_FAULT\"");
        let json = serde_json::to_string(&OperationKind::Write).unwrap();
        assert_eq!(json, "\"WRITE\"");
        let json = serde_json::to_string(&Commitment::Deny).unwrap();
        assert_eq!(json, "\"DENY\"");
    }

    #[test]
    fn test_value_untagged() {
        let v: Option<Value> = serde_json::from_str("null").unwrap();
        assert_eq!(v, None);
        let v: Value = serde_json::from_str("7").unwrap();
        assert_eq!(v, Value::Int(7));
        let v: Value = serde_json::from_str("\"free\"").unwrap();
        assert_eq!(v, Value::from("free"));
        let v: Value = serde_json::from_str("true").unwrap();
        assert_eq!(v, Value::Bool(true));
    }

    #[test]
    fn test_scope_entry_display() {
        let e = ScopeEntry::new("R", OperationKind::Write);
        assert_eq!(alloc::format!("{}", e), "R:WRITE");
    }
}
