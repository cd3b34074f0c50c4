//! Scripted agent strategies for testing Concord
//!
//! These strategies are deterministic by construction: every decision is a
//! function of the round number they last observed. They let tests drive the
//! kernel into each terminal posture without any real strategy code.

#![no_std]
extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use concord_agent::{AgentStrategy, Observation, Proposal};
use concord_kernel_core::Round;

/// Agent that follows a per-round script
#[derive(Clone, Debug, Default)]
pub struct ScriptedAgent {
    proposals: BTreeMap<Round, Proposal>,
    messages: BTreeMap<Round, Vec<u8>>,
    exit_round: Option<Round>,
    round: Round,
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Propose `proposal` in `round`
    pub fn propose_at(mut self, round: Round, proposal: Proposal) -> Self {
        self.proposals.insert(round, proposal);
        self
    }

    /// Send `payload` in `round`
    pub fn message_at(mut self, round: Round, payload: &[u8]) -> Self {
        self.messages.insert(round, payload.to_vec());
        self
    }

    /// Exit at the start of `round`
    pub fn exit_at(mut self, round: Round) -> Self {
        self.exit_round = Some(round);
        self
    }
}

impl AgentStrategy for ScriptedAgent {
    fn observe(&mut self, observation: &Observation) {
        self.round = observation.round;
    }

    fn wants_to_exit(&mut self) -> bool {
        self.exit_round.is_some_and(|r| r <= self.round)
    }

    fn compose_message(&mut self) -> Option<Vec<u8>> {
        self.messages.get(&self.round).cloned()
    }

    fn propose_action(&mut self) -> Option<Proposal> {
        self.proposals.get(&self.round).cloned()
    }
}

/// Agent that submits the same proposal every round
#[derive(Clone, Debug)]
pub struct RepeatAgent {
    proposal: Proposal,
    exit_round: Option<Round>,
    round: Round,
}

impl RepeatAgent {
    pub fn new(proposal: Proposal) -> Self {
        Self {
            proposal,
            exit_round: None,
            round: 0,
        }
    }

    pub fn exit_at(mut self, round: Round) -> Self {
        self.exit_round = Some(round);
        self
    }
}

impl AgentStrategy for RepeatAgent {
    fn observe(&mut self, observation: &Observation) {
        self.round = observation.round;
    }

    fn wants_to_exit(&mut self) -> bool {
        self.exit_round.is_some_and(|r| r <= self.round)
    }

    fn propose_action(&mut self) -> Option<Proposal> {
        Some(self.proposal.clone())
    }
}

/// Agent that never proposes
#[derive(Clone, Debug, Default)]
pub struct IdleAgent {
    exit_round: Option<Round>,
    round: Round,
}

impl IdleAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exit_at(mut self, round: Round) -> Self {
        self.exit_round = Some(round);
        self
    }
}

impl AgentStrategy for IdleAgent {
    fn observe(&mut self, observation: &Observation) {
        self.round = observation.round;
    }

    fn wants_to_exit(&mut self) -> bool {
        self.exit_round.is_some_and(|r| r <= self.round)
    }

    fn propose_action(&mut self) -> Option<Proposal> {
        None
    }
}

/// Shared view of what a [`RecordingAgent`] observed
pub type ObservationLog = Rc<RefCell<Vec<Observation>>>;

/// Wrapper that records every observation its inner strategy receives.
///
/// The log handle stays readable after the agent is boxed and handed to the
/// controller.
pub struct RecordingAgent<A> {
    inner: A,
    seen: ObservationLog,
}

impl<A: AgentStrategy> RecordingAgent<A> {
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            seen: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Handle to the recorded observations
    pub fn log(&self) -> ObservationLog {
        Rc::clone(&self.seen)
    }
}

impl<A: AgentStrategy> AgentStrategy for RecordingAgent<A> {
    fn observe(&mut self, observation: &Observation) {
        self.seen.borrow_mut().push(observation.clone());
        self.inner.observe(observation);
    }

    fn wants_to_exit(&mut self) -> bool {
        self.inner.wants_to_exit()
    }

    fn compose_message(&mut self) -> Option<Vec<u8>> {
        self.inner.compose_message()
    }

    fn propose_action(&mut self) -> Option<Proposal> {
        self.inner.propose_action()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_kernel_core::WorldSnapshot;

    fn observation(round: Round) -> Observation {
        Observation {
            round,
            snapshot: WorldSnapshot::default(),
            previous_outcome: None,
            inbox: Vec::new(),
        }
    }

    #[test]
    fn test_scripted_agent_follows_script() {
        let mut agent = ScriptedAgent::new()
            .propose_at(1, Proposal::read(["A"]))
            .message_at(0, b"hi")
            .exit_at(2);

        agent.observe(&observation(0));
        assert!(!agent.wants_to_exit());
        assert_eq!(agent.compose_message(), Some(b"hi".to_vec()));
        assert_eq!(agent.propose_action(), None);

        agent.observe(&observation(1));
        assert!(agent.propose_action().is_some());
        assert_eq!(agent.compose_message(), None);

        agent.observe(&observation(2));
        assert!(agent.wants_to_exit());
    }

    #[test]
    fn test_repeat_agent_always_proposes() {
        let mut agent = RepeatAgent::new(Proposal::write([("R", 1i64)]));
        for round in 0..5 {
            agent.observe(&observation(round));
            assert!(agent.propose_action().is_some());
        }
    }

    #[test]
    fn test_recording_agent_shares_log() {
        let mut agent = RecordingAgent::new(IdleAgent::new());
        let log = agent.log();
        agent.observe(&observation(0));
        agent.observe(&observation(1));
        assert_eq!(log.borrow().len(), 2);
        assert_eq!(log.borrow()[1].round, 1);
        assert_eq!(agent.propose_action(), None);
    }
}
