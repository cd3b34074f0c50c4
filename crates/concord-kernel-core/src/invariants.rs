//! Structural invariants for adjudication
//!
//! These are checked after every round's adjudication. Any violation means
//! the kernel itself misbehaved, which invalidates the whole run; it is never
//! a lawful refusal.
//!
//! # Invariants
//!
//! 1. **Executed Passed Both**: every executed request passed Pass 1 and
//!    Pass 2
//! 2. **No Tie-Break**: no key is touched by an executed WRITE and any other
//!    executed request
//! 3. **Faults Never Execute**: a structural fault is never executed
//! 4. **Exited Agents Silent**: no request comes from an inactive agent

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::admissibility::{AdjudicationReport, Pass1Result, Pass2Result};
use crate::types::{AgentId, Key, Outcome, RequestId};

/// An invariant violation with details
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvariantViolation {
    /// Name of the violated invariant
    pub invariant: &'static str,
    /// Description of what went wrong
    pub description: String,
}

/// Check all round invariants.
///
/// Returns a list of violations (empty if all invariants hold).
pub fn check_round_invariants(
    report: &AdjudicationReport,
    active: &BTreeSet<AgentId>,
) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    violations.extend(check_executed_passed_both(report));
    violations.extend(check_no_tie_break(report));
    violations.extend(check_faults_never_execute(report));
    violations.extend(check_exited_agents_silent(report, active));

    violations
}

/// Invariant 1: executed requests passed both passes
fn check_executed_passed_both(report: &AdjudicationReport) -> Vec<InvariantViolation> {
    report
        .adjudications()
        .iter()
        .filter(|(_, adj)| adj.outcome == Outcome::Executed)
        .filter(|(_, adj)| !(adj.pass1 == Pass1Result::Admissible && adj.pass2 == Some(Pass2Result::Clear)))
        .map(|(id, _)| InvariantViolation {
            invariant: "executed_requests_passed_both_passes",
            description: format!("Request {} executed without clearing both passes", id),
        })
        .collect()
}

/// Invariant 2: no executed WRITE shares a key with another executed request
fn check_no_tie_break(report: &AdjudicationReport) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    let executed = report.executed();
    let mut touches: BTreeMap<&Key, (Vec<&RequestId>, bool)> = BTreeMap::new();

    for (id, request) in report.requests() {
        if !executed.contains(id) {
            continue;
        }
        for key in &request.scope {
            let slot = touches.entry(key).or_default();
            slot.0.push(id);
            slot.1 |= request.kind.is_write();
        }
    }

    for (key, (ids, any_write)) in touches {
        if any_write && ids.len() > 1 {
            violations.push(InvariantViolation {
                invariant: "no_kernel_tie_break",
                description: format!("Key {} written by {} executed requests in one round", key, ids.len()),
            });
        }
    }

    violations
}

/// Invariant 3: structural faults never execute
fn check_faults_never_execute(report: &AdjudicationReport) -> Vec<InvariantViolation> {
    report
        .adjudications()
        .iter()
        .filter(|(_, adj)| matches!(adj.pass1, Pass1Result::Fault(_)) && adj.outcome != Outcome::StructuralFault)
        .map(|(id, adj)| InvariantViolation {
            invariant: "faults_never_execute",
            description: format!("Faulted request {} has outcome {:?}", id, adj.outcome),
        })
        .collect()
}

/// Invariant 4: no request from an agent outside the active set
fn check_exited_agents_silent(
    report: &AdjudicationReport,
    active: &BTreeSet<AgentId>,
) -> Vec<InvariantViolation> {
    report
        .adjudications()
        .iter()
        .filter(|(_, adj)| !active.contains(&adj.submitter))
        .map(|(id, adj)| InvariantViolation {
            invariant: "exited_agents_silent",
            description: format!("Request {} submitted by inactive agent {}", id, adj.submitter),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admissibility::evaluate;
    use crate::authority::{Authority, AuthorityStore};
    use crate::types::{AuthorityId, Delta, OperationKind, OperationRequest, ScopeEntry, Value};
    use crate::world::WorldState;
    use alloc::vec;

    fn request(agent: &str, id: &str, key: &str, cite: &str) -> OperationRequest {
        let mut delta = Delta::new();
        delta.insert(Key::from(key), Some(Value::Int(1)));
        OperationRequest {
            submitter: AgentId::from(agent),
            id: RequestId::from(id),
            kind: OperationKind::Write,
            scope: vec![Key::from(key)],
            delta,
            citations: vec![AuthorityId::from(cite)],
        }
    }

    fn setup() -> (AuthorityStore, WorldState) {
        let store = AuthorityStore::new(vec![
            Authority::allow("a", "alice", vec![ScopeEntry::new("R", OperationKind::Write)]),
            Authority::allow("b", "bob", vec![ScopeEntry::new("S", OperationKind::Write)]),
        ])
        .unwrap();
        let mut initial = BTreeMap::new();
        initial.insert(Key::from("R"), None);
        initial.insert(Key::from("S"), None);
        (store, WorldState::new(initial))
    }

    #[test]
    fn test_evaluator_output_satisfies_invariants() {
        let (store, world) = setup();
        let report = evaluate(
            &store,
            &world,
            &[request("alice", "r1", "R", "a"), request("bob", "r2", "S", "b")],
        )
        .unwrap();
        let active: BTreeSet<AgentId> = [AgentId::from("alice"), AgentId::from("bob")].into_iter().collect();
        assert!(check_round_invariants(&report, &active).is_empty());
        assert_eq!(report.executed().len(), 2);
    }

    #[test]
    fn test_inactive_submitter_is_violation() {
        let (store, world) = setup();
        let report = evaluate(&store, &world, &[request("alice", "r1", "R", "a")]).unwrap();
        let active: BTreeSet<AgentId> = [AgentId::from("bob")].into_iter().collect();
        let violations = check_round_invariants(&report, &active);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].invariant, "exited_agents_silent");
    }
}
