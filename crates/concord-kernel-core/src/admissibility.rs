//! Two-pass admissibility evaluation - the heart of the kernel
//!
//! Every round the epoch controller hands the full set of submitted requests
//! to [`evaluate`]:
//!
//! - **Pass 1** (per request, independent): well-formedness, citation
//!   validity, then capability + veto for every `(key, operation)` pair the
//!   request implies. One failing pair fails the whole request.
//! - **Pass 2** (across Pass 1 survivors): any key touched by two or more
//!   survivors where at least one writes refuses *every* survivor touching
//!   that key. READ/READ is compatible.
//!
//! # Properties
//!
//! 1. **Permutation invariant**: the report is a pure function of the
//!    multiset of requests. Everything is keyed by `RequestId` in ordered maps
//!    and Pass 2 is computed in a single shot over all survivors.
//! 2. **No tie-break**: no ordering, priority, or last-write-wins exists.
//! 3. **Structural only**: only declared scope, declared delta keys, and
//!    cited authorities are inspected. Current values are never read.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::authority::{authority_check, AuthorityDenial, AuthorityStore};
use crate::types::{AgentId, AuthorityId, Delta, Key, OperationRequest, Outcome, RequestId};
use crate::world::WorldState;

/// Why a request was malformed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "fault", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FaultReason {
    /// Declared scope is empty
    EmptyScope,
    /// A key appears twice in the declared scope
    DuplicateScopeKey { key: Key },
    /// Scope names a key outside the world schema
    UnknownKey { key: Key },
    /// WRITE delta keys differ from the declared scope
    DeltaScopeMismatch,
    /// READ carries a delta
    ReadWithDelta,
    /// Citation names no existing authority
    UnknownAuthority { id: AuthorityId },
    /// Citation names an ALLOW held by someone else
    CitationNotHeld { id: AuthorityId },
}

/// Pass 1 verdict for one request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Pass1Result {
    /// Every pair is covered by a held ALLOW and no DENY
    Admissible,
    /// Structural refusal: capability missing or vetoed
    Refused(AuthorityDenial),
    /// Malformed request or unauthorized citation
    Fault(FaultReason),
}

impl Pass1Result {
    pub fn is_admissible(&self) -> bool {
        matches!(self, Pass1Result::Admissible)
    }
}

/// Pass 2 verdict for a Pass 1 survivor
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Pass2Result {
    /// No conflicting survivor
    Clear,
    /// Refused because these keys were contested
    Interference { keys: Vec<Key> },
}

/// Complete verdict for one request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjudication {
    /// Submitting agent
    pub submitter: AgentId,
    /// Pass 1 verdict
    pub pass1: Pass1Result,
    /// Pass 2 verdict (None when Pass 1 already rejected)
    pub pass2: Option<Pass2Result>,
    /// Final outcome
    pub outcome: Outcome,
}

/// Per-round counters consumed by the classifier
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundTally {
    /// Requests submitted
    pub submitted: usize,
    /// Requests that passed Pass 1
    pub pass1_survivors: usize,
    /// Requests executed
    pub executed: usize,
    /// Pass 1 refusals (missing capability or veto)
    pub structural_refusals: usize,
    /// Pass 2 refusals
    pub interference_refusals: usize,
    /// Structural faults
    pub faults: usize,
}

/// Errors that prevent evaluation altogether
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AdmissibilityError {
    /// Two requests share an id; evaluation would depend on order
    #[error("duplicate request id {0}")]
    DuplicateRequestId(RequestId),
    /// Executed writes overlap on a key (would need a tie-break)
    #[error("executed requests overlap on key {0}")]
    OverlappingWrites(Key),
}

/// Result of evaluating one round's requests
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdjudicationReport {
    requests: BTreeMap<RequestId, OperationRequest>,
    adjudications: BTreeMap<RequestId, Adjudication>,
}

impl AdjudicationReport {
    /// Verdicts keyed by request id
    pub fn adjudications(&self) -> &BTreeMap<RequestId, Adjudication> {
        &self.adjudications
    }

    /// Verdict for one request
    pub fn get(&self, id: &RequestId) -> Option<&Adjudication> {
        self.adjudications.get(id)
    }

    /// Evaluated requests keyed by id
    pub fn requests(&self) -> &BTreeMap<RequestId, OperationRequest> {
        &self.requests
    }

    /// Final outcome per request id
    pub fn outcomes(&self) -> BTreeMap<RequestId, Outcome> {
        self.adjudications
            .iter()
            .map(|(id, adj)| (id.clone(), adj.outcome))
            .collect()
    }

    /// Ids of executed requests
    pub fn executed(&self) -> BTreeSet<RequestId> {
        self.adjudications
            .iter()
            .filter(|(_, adj)| adj.outcome == Outcome::Executed)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Union of every executed delta.
    ///
    /// Pass 2 guarantees executed writes are disjoint; an overlap here means
    /// the evaluator broke and the round must not be applied.
    pub fn executed_delta(&self) -> Result<Delta, AdmissibilityError> {
        let mut union = Delta::new();
        for id in self.executed() {
            let Some(request) = self.requests.get(&id) else {
                continue;
            };
            for (key, value) in &request.delta {
                if union.insert(key.clone(), value.clone()).is_some() {
                    return Err(AdmissibilityError::OverlappingWrites(key.clone()));
                }
            }
        }
        Ok(union)
    }

    /// Counters for classification bookkeeping
    pub fn tally(&self) -> RoundTally {
        let mut tally = RoundTally {
            submitted: self.adjudications.len(),
            ..Default::default()
        };
        for adj in self.adjudications.values() {
            match &adj.pass1 {
                Pass1Result::Admissible => tally.pass1_survivors += 1,
                Pass1Result::Refused(_) => tally.structural_refusals += 1,
                Pass1Result::Fault(_) => tally.faults += 1,
            }
            if matches!(adj.pass2, Some(Pass2Result::Interference { .. })) {
                tally.interference_refusals += 1;
            }
            if adj.outcome == Outcome::Executed {
                tally.executed += 1;
            }
        }
        tally
    }
}

/// Evaluate one round's requests.
///
/// Never mutates the world or the authority store.
pub fn evaluate(
    store: &AuthorityStore,
    world: &WorldState,
    requests: &[OperationRequest],
) -> Result<AdjudicationReport, AdmissibilityError> {
    let mut by_id: BTreeMap<RequestId, OperationRequest> = BTreeMap::new();
    for request in requests {
        if by_id.insert(request.id.clone(), request.clone()).is_some() {
            return Err(AdmissibilityError::DuplicateRequestId(request.id.clone()));
        }
    }

    // Pass 1
    let pass1: BTreeMap<RequestId, Pass1Result> = by_id
        .iter()
        .map(|(id, request)| (id.clone(), evaluate_pass1(store, world, request)))
        .collect();

    // Pass 2: contested keys over all survivors at once
    let mut touches: BTreeMap<&Key, (usize, bool)> = BTreeMap::new();
    for (id, request) in &by_id {
        if !pass1[id].is_admissible() {
            continue;
        }
        for key in &request.scope {
            let slot = touches.entry(key).or_insert((0, false));
            slot.0 += 1;
            slot.1 |= request.kind.is_write();
        }
    }
    let contested: BTreeSet<&Key> = touches
        .into_iter()
        .filter(|(_, (count, any_write))| *count >= 2 && *any_write)
        .map(|(key, _)| key)
        .collect();

    let mut adjudications = BTreeMap::new();
    for (id, request) in &by_id {
        let pass1 = pass1[id].clone();
        let (pass2, outcome) = match &pass1 {
            Pass1Result::Fault(_) => (None, Outcome::StructuralFault),
            Pass1Result::Refused(_) => (None, Outcome::Refused),
            Pass1Result::Admissible => {
                let mut keys: Vec<Key> = request
                    .scope
                    .iter()
                    .filter(|key| contested.contains(key))
                    .cloned()
                    .collect();
                if keys.is_empty() {
                    (Some(Pass2Result::Clear), Outcome::Executed)
                } else {
                    keys.sort();
                    (Some(Pass2Result::Interference { keys }), Outcome::Refused)
                }
            }
        };
        adjudications.insert(
            id.clone(),
            Adjudication {
                submitter: request.submitter.clone(),
                pass1,
                pass2,
                outcome,
            },
        );
    }

    Ok(AdjudicationReport {
        requests: by_id,
        adjudications,
    })
}

/// Pass 1 for a single request
fn evaluate_pass1(store: &AuthorityStore, world: &WorldState, request: &OperationRequest) -> Pass1Result {
    if let Err(fault) = check_well_formed(world, request) {
        return Pass1Result::Fault(fault);
    }

    for id in &request.citations {
        if store.get(id).is_none() {
            return Pass1Result::Fault(FaultReason::UnknownAuthority { id: id.clone() });
        }
        if !store.is_valid_citation(id, &request.submitter) {
            return Pass1Result::Fault(FaultReason::CitationNotHeld { id: id.clone() });
        }
    }

    // Scope is checked in key order so the reported denial does not depend
    // on how the agent listed its keys.
    let mut entries: Vec<_> = request.scope_entries().collect();
    entries.sort();
    for entry in &entries {
        if let Err(denial) = authority_check(store, &request.submitter, &request.citations, entry) {
            return Pass1Result::Refused(denial);
        }
    }

    Pass1Result::Admissible
}

fn check_well_formed(world: &WorldState, request: &OperationRequest) -> Result<(), FaultReason> {
    if request.scope.is_empty() {
        return Err(FaultReason::EmptyScope);
    }

    let mut seen = BTreeSet::new();
    for key in &request.scope {
        if !seen.insert(key) {
            return Err(FaultReason::DuplicateScopeKey { key: key.clone() });
        }
        if !world.contains_key(key) {
            return Err(FaultReason::UnknownKey { key: key.clone() });
        }
    }

    if request.kind.is_write() {
        let delta_keys: BTreeSet<&Key> = request.delta.keys().collect();
        if delta_keys != seen {
            return Err(FaultReason::DeltaScopeMismatch);
        }
    } else if !request.delta.is_empty() {
        return Err(FaultReason::ReadWithDelta);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::Authority;
    use crate::types::{OperationKind, ScopeEntry, Value};
    use alloc::string::ToString;
    use alloc::vec;

    fn world() -> WorldState {
        let mut initial = BTreeMap::new();
        for key in ["A", "B", "R"] {
            initial.insert(Key::from(key), Some(Value::Int(0)));
        }
        WorldState::new(initial)
    }

    fn store() -> AuthorityStore {
        AuthorityStore::new(vec![
            Authority::allow(
                "alice-w",
                "alice",
                vec![
                    ScopeEntry::new("A", OperationKind::Write),
                    ScopeEntry::new("B", OperationKind::Write),
                    ScopeEntry::new("R", OperationKind::Write),
                ],
            ),
            Authority::allow("bob-w", "bob", vec![ScopeEntry::new("R", OperationKind::Write)]),
            Authority::allow(
                "bob-r",
                "bob",
                vec![
                    ScopeEntry::new("A", OperationKind::Read),
                    ScopeEntry::new("B", OperationKind::Read),
                ],
            ),
            Authority::allow("carol-r", "carol", vec![ScopeEntry::new("A", OperationKind::Read)]),
            Authority::deny("no-b", vec![ScopeEntry::new("B", OperationKind::Write)]),
        ])
        .unwrap()
    }

    fn write(agent: &str, id: &str, keys: &[&str], cite: &[&str]) -> OperationRequest {
        OperationRequest {
            submitter: AgentId::from(agent),
            id: RequestId::from(id),
            kind: OperationKind::Write,
            scope: keys.iter().map(|k| Key::from(*k)).collect(),
            delta: keys
                .iter()
                .map(|k| (Key::from(*k), Some(Value::from(agent))))
                .collect(),
            citations: cite.iter().map(|c| AuthorityId::from(*c)).collect(),
        }
    }

    fn read(agent: &str, id: &str, keys: &[&str], cite: &[&str]) -> OperationRequest {
        OperationRequest {
            submitter: AgentId::from(agent),
            id: RequestId::from(id),
            kind: OperationKind::Read,
            scope: keys.iter().map(|k| Key::from(*k)).collect(),
            delta: Delta::new(),
            citations: cite.iter().map(|c| AuthorityId::from(*c)).collect(),
        }
    }

    fn outcome(report: &AdjudicationReport, id: &str) -> Outcome {
        report.get(&RequestId::from(id)).unwrap().outcome
    }

    #[test]
    fn test_single_write_executes() {
        let report = evaluate(&store(), &world(), &[write("alice", "r1", &["A"], &["alice-w"])]).unwrap();
        assert_eq!(outcome(&report, "r1"), Outcome::Executed);
        let delta = report.executed_delta().unwrap();
        assert_eq!(delta.get(&Key::from("A")), Some(&Some(Value::from("alice"))));
    }

    #[test]
    fn test_conjunctive_multi_key_refusal() {
        // A is admissible, B is vetoed: whole request refused
        let report = evaluate(&store(), &world(), &[write("alice", "r1", &["A", "B"], &["alice-w"])]).unwrap();
        let adj = report.get(&RequestId::from("r1")).unwrap();
        assert_eq!(adj.outcome, Outcome::Refused);
        assert!(matches!(
            adj.pass1,
            Pass1Result::Refused(AuthorityDenial::Vetoed { .. })
        ));
        assert!(report.executed_delta().unwrap().is_empty());
    }

    #[test]
    fn test_empty_citation_is_refusal_not_fault() {
        let report = evaluate(&store(), &world(), &[write("alice", "r1", &["A"], &[])]).unwrap();
        let adj = report.get(&RequestId::from("r1")).unwrap();
        assert_eq!(adj.outcome, Outcome::Refused);
        assert!(matches!(
            adj.pass1,
            Pass1Result::Refused(AuthorityDenial::MissingCapability { .. })
        ));
    }

    #[test]
    fn test_citing_foreign_allow_is_fault() {
        let report = evaluate(&store(), &world(), &[write("bob", "r1", &["A"], &["alice-w"])]).unwrap();
        let adj = report.get(&RequestId::from("r1")).unwrap();
        assert_eq!(adj.outcome, Outcome::StructuralFault);
        assert_eq!(
            adj.pass1,
            Pass1Result::Fault(FaultReason::CitationNotHeld {
                id: AuthorityId::from("alice-w")
            })
        );
        assert_eq!(adj.pass2, None);
    }

    #[test]
    fn test_citing_unknown_authority_is_fault() {
        let report = evaluate(&store(), &world(), &[write("bob", "r1", &["R"], &["ghost"])]).unwrap();
        assert_eq!(outcome(&report, "r1"), Outcome::StructuralFault);
    }

    #[test]
    fn test_citing_deny_is_not_a_fault() {
        let report = evaluate(&store(), &world(), &[write("alice", "r1", &["A"], &["alice-w", "no-b"])]).unwrap();
        assert_eq!(outcome(&report, "r1"), Outcome::Executed);
    }

    #[test]
    fn test_malformed_requests() {
        let mut empty = write("alice", "r1", &[], &["alice-w"]);
        empty.scope.clear();
        let dup = write("alice", "r2", &["A", "A"], &["alice-w"]);
        let unknown = write("alice", "r3", &["Z"], &["alice-w"]);
        let mut mismatch = write("alice", "r4", &["A"], &["alice-w"]);
        mismatch.delta.insert(Key::from("R"), None);
        let mut read_delta = read("bob", "r5", &["A"], &["bob-r"]);
        read_delta.delta.insert(Key::from("A"), None);

        let report = evaluate(&store(), &world(), &[empty, dup, unknown, mismatch, read_delta]).unwrap();
        let fault = |id: &str| report.get(&RequestId::from(id)).unwrap().pass1.clone();
        assert_eq!(fault("r1"), Pass1Result::Fault(FaultReason::EmptyScope));
        assert_eq!(
            fault("r2"),
            Pass1Result::Fault(FaultReason::DuplicateScopeKey { key: Key::from("A") })
        );
        assert_eq!(
            fault("r3"),
            Pass1Result::Fault(FaultReason::UnknownKey { key: Key::from("Z") })
        );
        assert_eq!(fault("r4"), Pass1Result::Fault(FaultReason::DeltaScopeMismatch));
        assert_eq!(fault("r5"), Pass1Result::Fault(FaultReason::ReadWithDelta));
        assert_eq!(report.tally().faults, 5);
    }

    #[test]
    fn test_write_write_collision_refuses_both() {
        let report = evaluate(
            &store(),
            &world(),
            &[
                write("alice", "r1", &["R"], &["alice-w"]),
                write("bob", "r2", &["R"], &["bob-w"]),
            ],
        )
        .unwrap();
        assert_eq!(outcome(&report, "r1"), Outcome::Refused);
        assert_eq!(outcome(&report, "r2"), Outcome::Refused);
        assert_eq!(
            report.get(&RequestId::from("r1")).unwrap().pass2,
            Some(Pass2Result::Interference {
                keys: vec![Key::from("R")]
            })
        );
        let tally = report.tally();
        assert_eq!(tally.pass1_survivors, 2);
        assert_eq!(tally.interference_refusals, 2);
        assert_eq!(tally.executed, 0);
    }

    #[test]
    fn test_read_write_collision_refuses_both() {
        let report = evaluate(
            &store(),
            &world(),
            &[
                write("alice", "r1", &["A"], &["alice-w"]),
                read("bob", "r2", &["A"], &["bob-r"]),
            ],
        )
        .unwrap();
        assert_eq!(outcome(&report, "r1"), Outcome::Refused);
        assert_eq!(outcome(&report, "r2"), Outcome::Refused);
    }

    #[test]
    fn test_read_read_is_compatible() {
        let report = evaluate(
            &store(),
            &world(),
            &[
                read("bob", "r1", &["A"], &["bob-r"]),
                read("carol", "r2", &["A"], &["carol-r"]),
            ],
        )
        .unwrap();
        assert_eq!(outcome(&report, "r1"), Outcome::Executed);
        assert_eq!(outcome(&report, "r2"), Outcome::Executed);
    }

    #[test]
    fn test_refused_request_does_not_collide() {
        // bob's write is refused in Pass 1, so alice's write proceeds
        let report = evaluate(
            &store(),
            &world(),
            &[
                write("alice", "r1", &["A"], &["alice-w"]),
                write("bob", "r2", &["A"], &["bob-w"]),
            ],
        )
        .unwrap();
        assert_eq!(outcome(&report, "r1"), Outcome::Executed);
        assert_eq!(outcome(&report, "r2"), Outcome::Refused);
    }

    #[test]
    fn test_permutation_invariance() {
        let requests = vec![
            write("alice", "r1", &["A", "R"], &["alice-w"]),
            write("bob", "r2", &["R"], &["bob-w"]),
            read("carol", "r3", &["A"], &["carol-r"]),
            read("bob", "r4", &["B"], &["bob-r"]),
        ];
        let baseline = evaluate(&store(), &world(), &requests).unwrap();

        let mut reversed = requests.clone();
        reversed.reverse();
        assert_eq!(evaluate(&store(), &world(), &reversed).unwrap(), baseline);

        let mut rotated = requests;
        rotated.rotate_left(1);
        assert_eq!(evaluate(&store(), &world(), &rotated).unwrap(), baseline);
    }

    #[test]
    fn test_duplicate_request_id_rejected() {
        let err = evaluate(
            &store(),
            &world(),
            &[
                write("alice", "r1", &["A"], &["alice-w"]),
                read("bob", "r1", &["B"], &["bob-r"]),
            ],
        )
        .unwrap_err();
        assert_eq!(err, AdmissibilityError::DuplicateRequestId(RequestId::from("r1")));
        assert_eq!(err.to_string(), "duplicate request id r1");
    }
}
