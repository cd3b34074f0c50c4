//! Kernel - the single writer of world state.
//!
//! The kernel owns every piece of mutable run state and exposes the round
//! protocol as a sequence of checked steps. The [`EpochController`] drives
//! these steps with live agent strategies; replay drives the same steps with
//! logged inputs.
//!
//! ```text
//! begin_round -> record_exits -> record_messages -> record_proposals
//!      -> adjudicate -> execute -> conclude_round
//! ```
//!
//! Calling a step out of order is an integrity failure.
//!
//! [`EpochController`]: crate::EpochController

use std::collections::{BTreeMap, BTreeSet};

use concord_agent::{Observation, Proposal};
use concord_axiom::{
    digest, request_id, AuditLog, Digest, GenesisRecord, ObservationRecord, RoundRecord,
};
use concord_kernel_core::{
    check_round_invariants, evaluate, AdjudicationReport, AgentId, Authority, AuthorityStore,
    Envelope, OperationRequest, Outcome, Pass1Result, Round, RoundTrace, TerminalClass,
    TerminalClassifier, VisibleOutcome, WorldSnapshot, WorldState,
};
use tracing::{debug, error, info, warn};

use crate::config::{FrozenInputs, RunConfig};
use crate::error::{IntegrityFailure, KernelError};
use crate::phase::EpochPhase;

/// Scratch state of the round in progress
#[derive(Default)]
struct PendingRound {
    observed_state: WorldSnapshot,
    observations: Vec<ObservationRecord>,
    exits: Vec<AgentId>,
    messages: Vec<Envelope>,
    requests: Vec<OperationRequest>,
    report: AdjudicationReport,
    resulting_state: WorldSnapshot,
}

/// The coordination kernel.
pub struct Kernel {
    config: RunConfig,
    world: WorldState,
    store: AuthorityStore,
    authority_digest: Digest,
    classifier: TerminalClassifier,
    roster: Vec<AgentId>,
    active: BTreeSet<AgentId>,
    /// Messages composed last round, delivered this round
    inbox: Vec<Envelope>,
    previous_outcomes: BTreeMap<AgentId, VisibleOutcome>,
    /// Proposals made so far, per agent
    proposal_seq: BTreeMap<AgentId, u64>,
    round: Round,
    phase: EpochPhase,
    pending: PendingRound,
    log: AuditLog,
}

impl Kernel {
    /// Build a kernel from frozen inputs and write the genesis record.
    pub fn new(inputs: FrozenInputs) -> Result<Self, KernelError> {
        inputs.validate()?;
        let FrozenInputs {
            config,
            initial_state,
            authorities,
            agents,
        } = inputs;

        let store = AuthorityStore::new(authorities)?;
        let frozen: Vec<Authority> = store.iter().cloned().collect();
        let authority_digest = digest(&frozen)?;
        let world = WorldState::new(initial_state);

        let genesis = GenesisRecord {
            config_digest: digest(&config)?,
            initial_state: world.snapshot(),
            authorities: frozen,
            agents: agents.clone(),
            authority_digest,
        };
        let log = AuditLog::new(genesis)?;

        info!(
            agents = agents.len(),
            authorities = store.len(),
            keys = world.keys().count(),
            "kernel constructed"
        );

        Ok(Self {
            classifier: TerminalClassifier::new(config.classifier_config()),
            config,
            world,
            store,
            authority_digest,
            active: agents.iter().cloned().collect(),
            roster: agents,
            inbox: Vec::new(),
            previous_outcomes: BTreeMap::new(),
            proposal_seq: BTreeMap::new(),
            round: 0,
            phase: EpochPhase::AwaitingObserve,
            pending: PendingRound::default(),
            log,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Round currently in progress (or next to start)
    pub fn round(&self) -> Round {
        self.round
    }

    pub fn phase(&self) -> EpochPhase {
        self.phase
    }

    /// Current world state
    pub fn snapshot(&self) -> WorldSnapshot {
        self.world.snapshot()
    }

    pub fn authorities(&self) -> &AuthorityStore {
        &self.store
    }

    pub fn authority_digest(&self) -> Digest {
        self.authority_digest
    }

    pub fn classifier(&self) -> &TerminalClassifier {
        &self.classifier
    }

    /// Full roster in polling order
    pub fn roster(&self) -> &[AgentId] {
        &self.roster
    }

    /// Active agents in polling order
    pub fn active_agents(&self) -> Vec<AgentId> {
        self.roster
            .iter()
            .filter(|a| self.active.contains(*a))
            .cloned()
            .collect()
    }

    pub fn is_active(&self, agent: &AgentId) -> bool {
        self.active.contains(agent)
    }

    pub fn log(&self) -> &AuditLog {
        &self.log
    }

    pub fn into_log(self) -> AuditLog {
        self.log
    }

    // ========================================================================
    // Round protocol
    // ========================================================================

    /// Step 1: build one observation per active agent, in roster order.
    pub fn begin_round(&mut self) -> Result<Vec<(AgentId, Observation)>, KernelError> {
        if self.phase == EpochPhase::Logged {
            self.enter(EpochPhase::Logged)?;
        }
        self.enter(EpochPhase::AwaitingObserve)?;

        let snapshot = self.world.snapshot();
        let mut observations = Vec::new();
        let mut records = Vec::new();
        for agent in self.active_agents() {
            let inbox: Vec<Envelope> = self
                .inbox
                .iter()
                .filter(|env| env.sender != agent)
                .cloned()
                .collect();
            let previous_outcome = self.previous_outcomes.get(&agent).copied();

            records.push(ObservationRecord {
                agent: agent.clone(),
                previous_outcome,
                inbox: inbox.clone(),
            });
            observations.push((
                agent,
                Observation {
                    round: self.round,
                    snapshot: snapshot.clone(),
                    previous_outcome,
                    inbox,
                },
            ));
        }

        debug!(round = self.round, active = observations.len(), "observations built");
        self.pending = PendingRound {
            observed_state: snapshot,
            observations: records,
            ..Default::default()
        };
        Ok(observations)
    }

    /// Step 2: remove exiting agents. Their ALLOWs stop resolving; no
    /// authority record changes.
    pub fn record_exits(&mut self, exits: Vec<AgentId>) -> Result<(), KernelError> {
        self.enter(EpochPhase::AwaitingExitDecision)?;

        for agent in &exits {
            if !self.active.remove(agent) {
                return Err(KernelError::NotActive(agent.clone()));
            }
            self.store.retire_holder(agent);
            info!(round = self.round, agent = %agent, "agent exited");
        }
        self.pending.exits = exits;
        Ok(())
    }

    /// Step 3: buffer messages for delivery next round.
    pub fn record_messages(&mut self, messages: Vec<(AgentId, Vec<u8>)>) -> Result<(), KernelError> {
        self.enter(EpochPhase::AwaitingMessage)?;

        if !messages.is_empty() && !self.config.messaging_enabled {
            return Err(KernelError::Inputs("messaging is disabled for this run".into()));
        }

        let mut envelopes = Vec::with_capacity(messages.len());
        for (sender, payload) in messages {
            if !self.active.contains(&sender) {
                return Err(KernelError::NotActive(sender));
            }
            envelopes.push(Envelope {
                sender,
                round: self.round,
                payload,
            });
        }
        debug!(round = self.round, messages = envelopes.len(), "messages buffered");
        self.pending.messages = envelopes;
        Ok(())
    }

    /// Step 4: stamp proposals into requests.
    ///
    /// Submitter and id come from the kernel; an agent cannot forge either.
    pub fn record_proposals(&mut self, proposals: Vec<(AgentId, Proposal)>) -> Result<(), KernelError> {
        self.enter(EpochPhase::AwaitingProposal)?;

        let mut submitters = BTreeSet::new();
        let mut requests = Vec::with_capacity(proposals.len());
        for (agent, proposal) in proposals {
            if !self.roster.contains(&agent) {
                return Err(KernelError::UnknownAgent(agent));
            }
            if !submitters.insert(agent.clone()) {
                return Err(KernelError::Inputs(format!(
                    "agent {} submitted twice in round {}",
                    agent, self.round
                )));
            }
            let seq = self.proposal_seq.entry(agent.clone()).or_insert(0);
            let id = request_id(&agent, self.round, *seq)?;
            *seq += 1;
            requests.push(proposal.into_request(agent, id));
        }
        debug!(round = self.round, requests = requests.len(), "proposals collected");
        self.pending.requests = requests;
        Ok(())
    }

    /// Step 5: run both passes and check every adjudication invariant.
    pub fn adjudicate(&mut self) -> Result<(), KernelError> {
        self.enter(EpochPhase::Adjudicating)?;

        if digest(&self.store.iter().collect::<Vec<_>>())? != self.authority_digest {
            return Err(self.integrity(IntegrityFailure::AuthorityMutated));
        }

        let report = evaluate(&self.store, &self.world, &self.pending.requests)
            .map_err(|e| self.integrity(IntegrityFailure::Adjudication(e)))?;

        if let Some(violation) = check_round_invariants(&report, &self.active).into_iter().next() {
            return Err(self.integrity(IntegrityFailure::Invariant {
                invariant: violation.invariant,
                description: violation.description,
            }));
        }

        for (id, adj) in report.adjudications() {
            if let Pass1Result::Fault(reason) = &adj.pass1 {
                warn!(round = self.round, request = %id, submitter = %adj.submitter, ?reason, "structural fault");
            }
        }
        let tally = report.tally();
        debug!(
            round = self.round,
            submitted = tally.submitted,
            survivors = tally.pass1_survivors,
            executed = tally.executed,
            "adjudicated"
        );
        self.pending.report = report;
        Ok(())
    }

    /// Step 6: apply every executed delta as one batch.
    pub fn execute(&mut self) -> Result<(), KernelError> {
        self.enter(EpochPhase::Executing)?;

        let delta = self
            .pending
            .report
            .executed_delta()
            .map_err(|e| self.integrity(IntegrityFailure::Adjudication(e)))?;
        let keys = delta.len();
        let after = self
            .world
            .apply(self.round, &delta)
            .map_err(|e| self.integrity(IntegrityFailure::World(e)))?;

        debug!(round = self.round, keys, "executed");
        self.pending.resulting_state = after;
        Ok(())
    }

    /// Steps 7 and 8: classify the round, then append its record.
    ///
    /// Returns the appended record.
    pub fn conclude_round(&mut self, timestamp_ms: u64) -> Result<&RoundRecord, KernelError> {
        self.enter(EpochPhase::Classifying)?;

        let pending = std::mem::take(&mut self.pending);
        let classification = self.classifier.classify(&RoundTrace {
            round: self.round,
            tally: pending.report.tally(),
            exited: &pending.exits,
            active: &self.active,
            store: &self.store,
            before: &pending.observed_state,
            after: &pending.resulting_state,
        });
        if let Some(class) = &classification {
            info!(round = self.round, classification = %class, "terminal classification");
        }

        let agent_outcomes = self.agent_outcomes(&pending);
        let record = RoundRecord {
            round: self.round,
            observed_state: pending.observed_state,
            observations: pending.observations,
            exits: pending.exits,
            messages: pending.messages.clone(),
            requests: pending.report.requests().values().cloned().collect(),
            adjudications: pending.report.adjudications().clone(),
            agent_outcomes: agent_outcomes.clone(),
            state_digest: digest(&pending.resulting_state)?,
            resulting_state: pending.resulting_state,
            classification,
            prev_hash: Digest::ZERO,
            hash: Digest::ZERO,
            timestamp_ms,
        };
        let head = self.log.append(record)?;
        debug!(round = self.round, head = %head, "round logged");

        self.previous_outcomes = agent_outcomes
            .into_iter()
            .map(|(agent, outcome)| (agent, outcome.visible()))
            .collect();
        self.inbox = pending.messages;
        self.round += 1;

        self.log
            .records()
            .last()
            .ok_or_else(|| KernelError::Inputs("log is empty after append".into()))
    }

    /// Stop accepting rounds
    pub fn halt(&mut self) -> Result<(), KernelError> {
        let round = self.round.saturating_sub(1);
        self.phase
            .halt()
            .map_err(|failure| KernelError::Integrity { round, failure })
    }

    /// Run one full round from already-decided inputs.
    ///
    /// Used by replay; the live path interleaves strategy calls between steps.
    pub fn run_round(
        &mut self,
        exits: Vec<AgentId>,
        messages: Vec<(AgentId, Vec<u8>)>,
        proposals: Vec<(AgentId, Proposal)>,
        timestamp_ms: u64,
    ) -> Result<&RoundRecord, KernelError> {
        self.begin_round()?;
        self.record_exits(exits)?;
        self.record_messages(messages)?;
        self.record_proposals(proposals)?;
        self.adjudicate()?;
        self.execute()?;
        self.conclude_round(timestamp_ms)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn enter(&mut self, step: EpochPhase) -> Result<(), KernelError> {
        match self.phase.advance(step) {
            Ok(()) => Ok(()),
            Err(failure) => Err(self.integrity(failure)),
        }
    }

    fn integrity(&self, failure: IntegrityFailure) -> KernelError {
        error!(round = self.round, %failure, "integrity failure");
        KernelError::Integrity {
            round: self.round,
            failure,
        }
    }

    /// Outcome per agent active after exits; silence is `NO_PROPOSAL`
    fn agent_outcomes(&self, pending: &PendingRound) -> BTreeMap<AgentId, Outcome> {
        let mut outcomes: BTreeMap<AgentId, Outcome> = self
            .active
            .iter()
            .map(|agent| (agent.clone(), Outcome::NoProposal))
            .collect();
        for adj in pending.report.adjudications().values() {
            outcomes.insert(adj.submitter.clone(), adj.outcome);
        }
        outcomes
    }
}

/// Convert a logged request back into the proposal that produced it
pub(crate) fn proposal_of(request: &OperationRequest) -> Proposal {
    Proposal {
        kind: request.kind,
        scope: request.scope.clone(),
        delta: request.delta.clone(),
        citations: request.citations.clone(),
    }
}

/// Terminal class emitted in the last logged round, if any
pub(crate) fn last_classification(log: &AuditLog) -> Option<(Round, TerminalClass)> {
    log.records()
        .last()
        .and_then(|r| r.classification.clone().map(|c| (r.round, c)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_kernel_core::{Key, OperationKind, ScopeEntry, Value};

    fn inputs() -> FrozenInputs {
        let mut initial = BTreeMap::new();
        initial.insert(Key::from("R"), Some(Value::Int(0)));
        FrozenInputs::new(
            RunConfig::default(),
            initial,
            vec![Authority::allow(
                "a1",
                "alice",
                vec![ScopeEntry::new("R", OperationKind::Write)],
            )],
            vec![AgentId::from("alice"), AgentId::from("bob")],
        )
    }

    #[test]
    fn test_genesis_written_on_construction() {
        let kernel = Kernel::new(inputs()).unwrap();
        assert!(kernel.log().is_empty());
        assert_eq!(kernel.log().genesis().agents.len(), 2);
        assert_eq!(kernel.log().genesis().authority_digest, kernel.authority_digest());
        assert_eq!(kernel.phase(), EpochPhase::AwaitingObserve);
    }

    #[test]
    fn test_step_out_of_order_is_integrity_failure() {
        let mut kernel = Kernel::new(inputs()).unwrap();
        let err = kernel.adjudicate().unwrap_err();
        assert!(err.is_integrity());
        assert!(matches!(
            err,
            KernelError::Integrity {
                round: 0,
                failure: IntegrityFailure::PhaseOrder {
                    current: EpochPhase::AwaitingObserve,
                    attempted: EpochPhase::Adjudicating,
                },
            }
        ));
    }

    #[test]
    fn test_executed_write_applies() {
        let mut kernel = Kernel::new(inputs()).unwrap();
        let proposal = Proposal::write([("R", 9i64)]).cite("a1");
        let record = kernel
            .run_round(vec![], vec![], vec![(AgentId::from("alice"), proposal)], 0)
            .unwrap();
        assert_eq!(record.agent_outcomes[&AgentId::from("alice")], Outcome::Executed);
        assert_eq!(record.agent_outcomes[&AgentId::from("bob")], Outcome::NoProposal);
        assert_eq!(kernel.snapshot().get(&Key::from("R")), Some(&Value::Int(9)));
        assert_eq!(kernel.round(), 1);
        assert_eq!(kernel.phase(), EpochPhase::Logged);
    }

    #[test]
    fn test_request_ids_are_kernel_assigned() {
        let mut kernel = Kernel::new(inputs()).unwrap();
        let alice = AgentId::from("alice");
        let proposal = Proposal::write([("R", 1i64)]).cite("a1");
        let record = kernel
            .run_round(vec![], vec![], vec![(alice.clone(), proposal)], 0)
            .unwrap();
        assert_eq!(record.requests[0].id, request_id(&alice, 0, 0).unwrap());
        assert_eq!(record.requests[0].submitter, alice);
    }

    #[test]
    fn test_messages_rejected_when_disabled() {
        let mut kernel = Kernel::new(inputs()).unwrap();
        kernel.begin_round().unwrap();
        kernel.record_exits(vec![]).unwrap();
        let err = kernel
            .record_messages(vec![(AgentId::from("alice"), b"hi".to_vec())])
            .unwrap_err();
        assert!(matches!(err, KernelError::Inputs(_)));
    }

    #[test]
    fn test_exit_of_inactive_agent_rejected() {
        let mut kernel = Kernel::new(inputs()).unwrap();
        kernel.begin_round().unwrap();
        let err = kernel.record_exits(vec![AgentId::from("zed")]).unwrap_err();
        assert!(matches!(err, KernelError::NotActive(_)));
    }

    #[test]
    fn test_request_from_exited_agent_violates_invariant() {
        let mut kernel = Kernel::new(inputs()).unwrap();
        let alice = AgentId::from("alice");
        kernel.begin_round().unwrap();
        kernel.record_exits(vec![alice.clone()]).unwrap();
        kernel.record_messages(vec![]).unwrap();
        kernel
            .record_proposals(vec![(alice, Proposal::write([("R", 1i64)]).cite("a1"))])
            .unwrap();
        let err = kernel.adjudicate().unwrap_err();
        assert!(matches!(
            err,
            KernelError::Integrity {
                failure: IntegrityFailure::Invariant {
                    invariant: "exited_agents_silent",
                    ..
                },
                ..
            }
        ));
    }
}
