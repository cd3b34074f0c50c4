//! Agent strategy trait for Concord
//!
//! This crate defines the capability set the epoch controller calls into
//! once per round. The kernel depends only on this trait, never on concrete
//! strategy types.
//!
//! # Contract
//!
//! Strategies must be pure functions of their own observation history: no
//! randomness, no wall clock, no I/O. The kernel cannot enforce this except
//! by failing replay when it is broken.
//!
//! # Call order per round
//!
//! 1. `observe` (every active agent)
//! 2. `wants_to_exit`
//! 3. `compose_message` (only when messaging is enabled)
//! 4. `propose_action`

#![no_std]

extern crate alloc;

use alloc::vec::Vec;

use concord_kernel_core::{
    AgentId, AuthorityId, Delta, Envelope, Key, OperationKind, OperationRequest, RequestId, Round,
    Value, VisibleOutcome, WorldSnapshot,
};

/// Everything an agent is shown at the start of a round.
///
/// Deliberately thin: the previous outcome is the generic visible token, so
/// neither the blocking authority nor the rejecting pass can be recovered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Observation {
    /// Current round
    pub round: Round,
    /// World state before this round's execution
    pub snapshot: WorldSnapshot,
    /// This agent's own outcome last round (None on round zero)
    pub previous_outcome: Option<VisibleOutcome>,
    /// Messages composed last round by other agents
    pub inbox: Vec<Envelope>,
}

/// An agent's proposal.
///
/// The controller wraps it into an [`OperationRequest`], stamping submitter
/// and id; the agent controls neither.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proposal {
    pub kind: OperationKind,
    pub scope: Vec<Key>,
    pub delta: Delta,
    pub citations: Vec<AuthorityId>,
}

impl Proposal {
    /// WRITE the given values; scope is the delta's key set
    pub fn write<K, V>(values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Key>,
        V: Into<Value>,
    {
        let delta: Delta = values
            .into_iter()
            .map(|(k, v)| (k.into(), Some(v.into())))
            .collect();
        Self {
            kind: OperationKind::Write,
            scope: delta.keys().cloned().collect(),
            delta,
            citations: Vec::new(),
        }
    }

    /// READ the given keys
    pub fn read<K: Into<Key>>(keys: impl IntoIterator<Item = K>) -> Self {
        Self {
            kind: OperationKind::Read,
            scope: keys.into_iter().map(Into::into).collect(),
            delta: Delta::new(),
            citations: Vec::new(),
        }
    }

    /// Add a citation
    pub fn cite(mut self, authority: impl Into<AuthorityId>) -> Self {
        self.citations.push(authority.into());
        self
    }

    /// Wrap into a request. Only the epoch controller should call this.
    pub fn into_request(self, submitter: AgentId, id: RequestId) -> OperationRequest {
        OperationRequest {
            submitter,
            id,
            kind: self.kind,
            scope: self.scope,
            delta: self.delta,
            citations: self.citations,
        }
    }
}

/// Agent strategy capability set
///
/// Object safe; the controller holds strategies as `Box<dyn AgentStrategy>`.
pub trait AgentStrategy {
    /// Receive this round's observation
    fn observe(&mut self, observation: &Observation);

    /// Exit permanently? Asked once per round, after `observe`.
    fn wants_to_exit(&mut self) -> bool {
        false
    }

    /// Opaque payload for the other agents, delivered next round
    fn compose_message(&mut self) -> Option<Vec<u8>> {
        None
    }

    /// At most one proposal per round
    fn propose_action(&mut self) -> Option<Proposal>;
}

impl<T: AgentStrategy + ?Sized> AgentStrategy for alloc::boxed::Box<T> {
    fn observe(&mut self, observation: &Observation) {
        (**self).observe(observation)
    }

    fn wants_to_exit(&mut self) -> bool {
        (**self).wants_to_exit()
    }

    fn compose_message(&mut self) -> Option<Vec<u8>> {
        (**self).compose_message()
    }

    fn propose_action(&mut self) -> Option<Proposal> {
        (**self).propose_action()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_scope_matches_delta() {
        let p = Proposal::write([("B", 2i64), ("A", 1i64)]).cite("cap");
        assert_eq!(p.kind, OperationKind::Write);
        assert_eq!(p.scope, alloc::vec![Key::from("A"), Key::from("B")]);
        assert_eq!(p.delta.len(), 2);
        assert_eq!(p.citations, alloc::vec![AuthorityId::from("cap")]);
    }

    #[test]
    fn test_read_has_empty_delta() {
        let p = Proposal::read(["A"]);
        assert_eq!(p.kind, OperationKind::Read);
        assert!(p.delta.is_empty());
    }

    #[test]
    fn test_into_request_stamps_identity() {
        let req = Proposal::read(["A"]).into_request(AgentId::from("bob"), RequestId::from("req-1"));
        assert_eq!(req.submitter.as_str(), "bob");
        assert_eq!(req.id.as_str(), "req-1");
    }
}
