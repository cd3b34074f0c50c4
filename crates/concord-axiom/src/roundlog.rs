//! Round Log for Audit and Replay
//!
//! Records every round's complete trace as one record. Each record links to
//! the previous via hash chain, starting from the genesis record that holds
//! the frozen run inputs.
//!
//! # Core Invariant
//!
//! > `replay(genesis, rounds) -> identical rounds`
//!
//! The log is append-only: there is no way to update or remove a record.
//! Wall-clock timestamps are carried for humans but excluded from every hash
//! and from byte-equality checks.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use concord_kernel_core::{
    Adjudication, AgentId, Authority, Envelope, OperationRequest, Outcome, RequestId, Round,
    TerminalClass, VisibleOutcome, WorldSnapshot,
};

use crate::canonical::{self, CanonicalError, Digest};

/// Fields never covered by a hash
const UNHASHED_FIELDS: [&str; 2] = ["hash", "timestamp_ms"];

/// Errors from building, loading, or verifying the log
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LogError {
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
    /// Records must arrive as round 0, 1, 2, ...
    #[error("expected record for round {expected}, got round {got}")]
    OutOfOrder { expected: Round, got: Round },
    /// Stored hash or back-link does not match recomputation
    #[error("hash chain broken at round {round}")]
    BrokenChain { round: Round },
    /// Stored genesis hash does not match the genesis record
    #[error("genesis record does not match its hash")]
    GenesisMismatch,
    #[error("log has no genesis line")]
    MissingGenesis,
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
}

/// Frozen run inputs, recorded once before round zero
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisRecord {
    /// Digest of the run configuration
    pub config_digest: Digest,
    /// World state at round zero
    pub initial_state: WorldSnapshot,
    /// Every authority, in id order
    pub authorities: Vec<Authority>,
    /// Agent roster, in polling order
    pub agents: Vec<AgentId>,
    /// Digest of `authorities`
    pub authority_digest: Digest,
}

/// What one agent was shown at the start of a round.
///
/// The world snapshot is the same for every agent and is recorded once on the
/// round record as `observed_state`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub agent: AgentId,
    pub previous_outcome: Option<VisibleOutcome>,
    pub inbox: Vec<Envelope>,
}

/// Complete trace of one round
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round: Round,
    /// State every agent observed
    pub observed_state: WorldSnapshot,
    pub observations: Vec<ObservationRecord>,
    /// Agents that exited this round
    pub exits: Vec<AgentId>,
    /// Messages composed this round (delivered next round)
    pub messages: Vec<Envelope>,
    /// Requests submitted this round, in id order
    pub requests: Vec<OperationRequest>,
    /// Pass 1 / Pass 2 verdicts keyed by request id
    pub adjudications: BTreeMap<RequestId, Adjudication>,
    /// Final outcome per agent still active after exits
    pub agent_outcomes: BTreeMap<AgentId, Outcome>,
    /// State after execution
    pub resulting_state: WorldSnapshot,
    /// Digest of `resulting_state`
    pub state_digest: Digest,
    /// New classification emitted this round, if any
    pub classification: Option<TerminalClass>,
    /// Hash of the previous record (genesis hash for round zero)
    pub prev_hash: Digest,
    /// Hash of this record, excluding `hash` and `timestamp_ms`
    pub hash: Digest,
    /// Wall-clock milliseconds; informational only
    pub timestamp_ms: u64,
}

impl RoundRecord {
    /// Compute the chain hash of this record
    pub fn compute_hash(&self) -> Result<Digest, LogError> {
        let value = without_unhashed(canonical::canonical_value(self)?);
        Ok(Digest::of_bytes(&canonical::to_bytes(&value)?))
    }
}

fn without_unhashed(mut value: Value) -> Value {
    if let Value::Object(map) = &mut value {
        for field in UNHASHED_FIELDS {
            map.remove(field);
        }
    }
    value
}

/// Append-only audit log.
///
/// Records are indexed by round; record `i` is round `i`.
#[derive(Clone, Debug)]
pub struct AuditLog {
    genesis: GenesisRecord,
    genesis_hash: Digest,
    records: Vec<RoundRecord>,
    head: Digest,
}

impl AuditLog {
    /// Create a log holding only the genesis record.
    pub fn new(genesis: GenesisRecord) -> Result<Self, LogError> {
        let genesis_hash = canonical::digest(&genesis)?;
        Ok(Self {
            genesis,
            genesis_hash,
            records: Vec::new(),
            head: genesis_hash,
        })
    }

    /// Append the next round's record.
    ///
    /// Sets `prev_hash` and `hash`; any values the caller put there are
    /// overwritten. Returns the new head.
    pub fn append(&mut self, mut record: RoundRecord) -> Result<Digest, LogError> {
        let expected = self.records.len() as Round;
        if record.round != expected {
            return Err(LogError::OutOfOrder {
                expected,
                got: record.round,
            });
        }

        record.prev_hash = self.head;
        record.hash = record.compute_hash()?;

        self.head = record.hash;
        self.records.push(record);
        Ok(self.head)
    }

    pub fn genesis(&self) -> &GenesisRecord {
        &self.genesis
    }

    pub fn genesis_hash(&self) -> Digest {
        self.genesis_hash
    }

    /// All round records in round order
    pub fn records(&self) -> &[RoundRecord] {
        &self.records
    }

    /// Record for one round
    pub fn get(&self, round: Round) -> Option<&RoundRecord> {
        usize::try_from(round).ok().and_then(|i| self.records.get(i))
    }

    /// Hash of the last record (genesis hash when empty)
    pub fn head(&self) -> Digest {
        self.head
    }

    /// Number of round records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if no round has been recorded yet
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Verify hash chain integrity from genesis to head.
    pub fn verify_integrity(&self) -> Result<(), LogError> {
        if canonical::digest(&self.genesis)? != self.genesis_hash {
            return Err(LogError::GenesisMismatch);
        }

        let mut expected_prev = self.genesis_hash;
        for (index, record) in self.records.iter().enumerate() {
            let round = index as Round;
            if record.round != round {
                return Err(LogError::OutOfOrder {
                    expected: round,
                    got: record.round,
                });
            }
            if record.prev_hash != expected_prev || record.compute_hash()? != record.hash {
                return Err(LogError::BrokenChain { round });
            }
            if canonical::digest(&record.resulting_state)? != record.state_digest {
                return Err(LogError::BrokenChain { round });
            }
            expected_prev = record.hash;
        }

        if expected_prev != self.head {
            return Err(LogError::BrokenChain {
                round: self.records.len() as Round,
            });
        }
        Ok(())
    }

    /// Persist as JSON lines: genesis first, then one line per round.
    pub fn to_json_lines(&self) -> Result<String, LogError> {
        let mut out = String::new();
        out.push_str(&json_line(&self.genesis)?);
        for record in &self.records {
            out.push('\n');
            out.push_str(&json_line(record)?);
        }
        out.push('\n');
        Ok(out)
    }

    /// Load a log written by [`AuditLog::to_json_lines`] and verify it.
    pub fn from_json_lines(input: &str) -> Result<Self, LogError> {
        let mut lines = input
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty());

        let (_, first) = lines.next().ok_or(LogError::MissingGenesis)?;
        let genesis: GenesisRecord = parse_line(0, first)?;
        let mut log = AuditLog::new(genesis)?;

        for (index, line) in lines {
            let record: RoundRecord = parse_line(index, line)?;
            log.head = record.hash;
            log.records.push(record);
        }

        log.verify_integrity()?;
        Ok(log)
    }

    /// Canonical bytes of the whole log with every timestamp removed.
    ///
    /// Two runs over the same frozen inputs produce identical bytes.
    pub fn canonical_bytes_without_timestamps(&self) -> Result<Vec<u8>, LogError> {
        let mut out = canonical::canonical_json(&self.genesis)?;
        for record in &self.records {
            out.push(b'\n');
            let mut value = canonical::canonical_value(record)?;
            if let Value::Object(map) = &mut value {
                map.remove("timestamp_ms");
            }
            out.extend(canonical::to_bytes(&value)?);
        }
        Ok(out)
    }
}

fn json_line(v: &impl Serialize) -> Result<String, LogError> {
    let bytes = canonical::canonical_json(v)?;
    String::from_utf8(bytes).map_err(|e| LogError::Parse {
        line: 0,
        message: e.to_string(),
    })
}

fn parse_line<T: for<'de> Deserialize<'de>>(index: usize, line: &str) -> Result<T, LogError> {
    serde_json::from_str(line).map_err(|e| LogError::Parse {
        line: index + 1,
        message: e.to_string(),
    })
}
