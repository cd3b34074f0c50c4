//! Concord Kernel Runtime
//!
//! This crate wraps the pure decision logic of `concord-kernel-core` with
//! everything a run needs:
//! - Frozen run inputs and configuration
//! - The round protocol as a checked state machine
//! - Live driving of agent strategies
//! - Hash-chained audit logging
//! - Replay of a captured log against a fresh kernel
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      EpochController                        │
//! │   - Polls strategies (observe, exit, message, propose)      │
//! │   - Halting policy                                          │
//! │                              │                              │
//! │                              ▼                              │
//! │   ┌───────────────────────────────────────────────────┐     │
//! │   │                      Kernel                       │     │
//! │   │   - WorldState, AuthorityStore (single writer)    │     │
//! │   │   - Two-pass evaluation + invariant checks        │     │
//! │   │   - TerminalClassifier                            │     │
//! │   │   - AuditLog (append-only)                        │     │
//! │   └───────────────────────────────────────────────────┘     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Replay drives the same `Kernel` steps with logged inputs instead of
//! strategies.

pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod kernel;
pub mod phase;
pub mod replay;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{FrozenInputs, RunConfig, DEFAULT_LIVELOCK_WINDOW, DEFAULT_MAX_ROUNDS};
pub use controller::{EpochController, InvalidRun, RunReport, RunStatus};
pub use error::{IntegrityFailure, KernelError};
pub use kernel::Kernel;
pub use phase::EpochPhase;
pub use replay::replay_log;

// Re-export the layers below
pub use concord_agent::{AgentStrategy, Observation, Proposal};
pub use concord_axiom::{AuditLog, Digest, GenesisRecord, ReplayError, RoundRecord};
pub use concord_kernel_core::{
    AgentId, Authority, AuthorityId, ClassKind, DetectionMode, Key, OperationKind, Outcome,
    Round, ScopeEntry, TerminalClass, Value, VisibleOutcome, WorldSnapshot,
};
