//! Kernel error types.

use concord_axiom::{CanonicalError, LogError, ReplayError};
use concord_kernel_core::{AdmissibilityError, AgentId, AuthorityError, Round, WorldError};
use thiserror::Error;

use crate::phase::EpochPhase;

/// Structural-invariant violations.
///
/// Any of these invalidates the whole run. They are never a lawful outcome
/// and never a terminal classification.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum IntegrityFailure {
    /// A round step ran out of protocol order
    #[error("step {attempted:?} attempted while in phase {current:?}")]
    PhaseOrder {
        current: EpochPhase,
        attempted: EpochPhase,
    },
    /// The authority set no longer matches its construction digest
    #[error("authority set changed after construction")]
    AuthorityMutated,
    /// A post-adjudication invariant failed
    #[error("invariant {invariant} violated: {description}")]
    Invariant {
        invariant: &'static str,
        description: String,
    },
    /// The evaluator could not produce a consistent report
    #[error("adjudication failed: {0}")]
    Adjudication(AdmissibilityError),
    /// The executed batch could not be applied atomically
    #[error("world state apply failed: {0}")]
    World(WorldError),
}

/// Errors from the kernel runtime
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid frozen inputs: {0}")]
    Inputs(String),

    #[error("failed to parse frozen inputs: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Authority(#[from] AuthorityError),

    #[error(transparent)]
    Canonical(#[from] CanonicalError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Replay(#[from] ReplayError),

    #[error("agent {0} is not in the roster")]
    UnknownAgent(AgentId),

    #[error("agent {0} is not active")]
    NotActive(AgentId),

    #[error("no strategy registered for agent {0}")]
    MissingStrategy(AgentId),

    #[error("run has already halted")]
    Halted,

    #[error("integrity failure in round {round}: {failure}")]
    Integrity {
        round: Round,
        failure: IntegrityFailure,
    },
}

impl KernelError {
    /// Check if this error invalidates the run
    pub fn is_integrity(&self) -> bool {
        matches!(self, KernelError::Integrity { .. })
    }
}
