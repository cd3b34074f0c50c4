//! Deterministic Replay for Concord
//!
//! This module provides the core replay functionality that ensures:
//!
//! > Same frozen inputs and same logged proposals always produce the same
//! > outcomes, states, and classifications.
//!
//! # Architecture
//!
//! Replay drives a fresh kernel from the genesis record, then hands it each
//! logged round. The kernel re-adjudicates the *logged* requests and messages
//! (agent strategies are never consulted) and returns the record it would
//! have written. Any field that differs is a hard failure.
//!
//! ```text
//! replay(genesis, rounds) -> identical rounds
//! ```

use alloc::string::{String, ToString};

use thiserror::Error;

use concord_kernel_core::Round;

use crate::canonical::Digest;
use crate::roundlog::{AuditLog, GenesisRecord, LogError, RoundRecord};

/// Errors that can occur during replay.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ReplayError {
    /// The log failed its own integrity check before replay started
    #[error("log integrity check failed: {0}")]
    BrokenChain(LogError),
    /// The kernel refused the genesis record
    #[error("genesis rejected: {0}")]
    InvalidGenesis(String),
    /// The kernel could not re-drive a round at all
    #[error("round {round} could not be replayed: {reason}")]
    Rejected { round: Round, reason: String },
    /// Re-driven round differs from the logged one
    #[error("replay diverged at round {round} in {field}")]
    Divergence { round: Round, field: &'static str },
    /// Final state digest differs
    #[error("state digest mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: Digest, actual: Digest },
}

/// Result of replaying.
pub type ReplayResult<T> = Result<T, ReplayError>;

/// Trait for kernels that can be replayed.
///
/// Implementations must not call agent strategies; every decision comes
/// from the logged record.
pub trait Replayable {
    /// Reset to the frozen inputs recorded in the genesis record.
    fn replay_genesis(&mut self, genesis: &GenesisRecord) -> ReplayResult<()>;

    /// Re-drive one round from its logged inputs and return the record the
    /// kernel produced. `prev_hash`, `hash`, and `timestamp_ms` are ignored.
    fn replay_round(&mut self, logged: &RoundRecord) -> ReplayResult<RoundRecord>;

    /// Deterministic digest of the current world state.
    fn state_digest(&self) -> ReplayResult<Digest>;
}

/// Compare a logged round against its re-driven counterpart.
///
/// Returns the first differing field, in protocol order.
pub fn compare_rounds(logged: &RoundRecord, replayed: &RoundRecord) -> ReplayResult<()> {
    let round = logged.round;
    let diverged = |field: &'static str| -> ReplayResult<()> { Err(ReplayError::Divergence { round, field }) };

    if logged.round != replayed.round {
        return diverged("round");
    }
    if logged.observed_state != replayed.observed_state {
        return diverged("observed_state");
    }
    if logged.observations != replayed.observations {
        return diverged("observations");
    }
    if logged.exits != replayed.exits {
        return diverged("exits");
    }
    if logged.messages != replayed.messages {
        return diverged("messages");
    }
    if logged.requests != replayed.requests {
        return diverged("requests");
    }
    if logged.adjudications != replayed.adjudications {
        return diverged("adjudications");
    }
    if logged.agent_outcomes != replayed.agent_outcomes {
        return diverged("agent_outcomes");
    }
    if logged.resulting_state != replayed.resulting_state {
        return diverged("resulting_state");
    }
    if logged.state_digest != replayed.state_digest {
        return diverged("state_digest");
    }
    if logged.classification != replayed.classification {
        return diverged("classification");
    }
    Ok(())
}

/// Replay a whole log against a fresh kernel.
///
/// # Returns
/// - `Ok(())`: every round matched
/// - `Err(ReplayError::BrokenChain)`: the log itself is corrupt
/// - `Err(ReplayError::Divergence)`: first mismatching round and field
pub fn replay<R: Replayable>(state: &mut R, log: &AuditLog) -> ReplayResult<()> {
    log.verify_integrity().map_err(ReplayError::BrokenChain)?;

    state.replay_genesis(log.genesis())?;
    for logged in log.records() {
        let replayed = state.replay_round(logged)?;
        compare_rounds(logged, &replayed)?;
    }
    Ok(())
}

/// Replay a log and verify the final state digest.
///
/// The expected digest is the last record's `state_digest`, or the digest of
/// the initial state when the log holds no rounds.
pub fn replay_and_verify<R: Replayable>(state: &mut R, log: &AuditLog) -> ReplayResult<Digest> {
    replay(state, log)?;

    let actual = state.state_digest()?;
    let expected = match log.records().last() {
        Some(record) => record.state_digest,
        None => crate::canonical::digest(&log.genesis().initial_state)
            .map_err(|e| ReplayError::InvalidGenesis(e.to_string()))?,
    };
    if actual != expected {
        return Err(ReplayError::HashMismatch { expected, actual });
    }
    Ok(actual)
}
