//! Concord Kernel Core - Pure Admissibility State Machine
//!
//! This crate contains the **pure, clock-free and strategy-free** decision
//! logic of the Concord coordination kernel.
//!
//! # Design Principles
//!
//! 1. **No agent dependency**: strategies live behind `concord-agent`
//! 2. **No I/O or side effects**: pure state transformations only
//! 3. **Deterministic**: same inputs always produce the same verdicts
//! 4. **Structural**: admissibility never looks at values, only at declared
//!    scope and cited authorities
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   concord-kernel-core                       │
//! │                                                             │
//! │   ┌───────────────┐    ┌───────────────┐                   │
//! │   │ AuthorityStore│    │  evaluate()   │                   │
//! │   │  ALLOW / DENY │───▶│ Pass 1, Pass 2│                   │
//! │   └───────────────┘    └───────┬───────┘                   │
//! │   ┌───────────────┐            │                           │
//! │   │  WorldState   │◀───────────┘ executed delta            │
//! │   │  apply()      │                                         │
//! │   └───────────────┘                                         │
//! │   ┌───────────────┐    ┌───────────────┐                   │
//! │   │  Terminal     │    │  Invariants   │                   │
//! │   │  Classifier   │    │  Assertions   │                   │
//! │   └───────────────┘    └───────────────┘                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              │ used by
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      concord-kernel                         │
//! │   - Epoch controller (round protocol)                       │
//! │   - Audit log recording                                     │
//! │   - Replay                                                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! - `types` - Identifiers, values, requests, outcomes
//! - `world` - World state store with atomic batch apply
//! - `authority` - Authority records, store, and `authority_check`
//! - `admissibility` - Two-pass evaluator
//! - `classifier` - Terminal classifier
//! - `invariants` - Runtime invariant assertions

#![no_std]
extern crate alloc;

pub mod admissibility;
pub mod authority;
pub mod classifier;
pub mod invariants;
pub mod types;
pub mod world;

// Re-export all public types for convenient access
pub use admissibility::{
    evaluate, Adjudication, AdjudicationReport, AdmissibilityError, FaultReason, Pass1Result,
    Pass2Result, RoundTally,
};
pub use authority::{authority_check, Authority, AuthorityDenial, AuthorityError, AuthorityStore};
pub use classifier::{
    count_by_kind, ClassKind, ClassifierConfig, DetectionMode, LivelockLatch, RoundTrace,
    TerminalClass, TerminalClassifier,
};
pub use invariants::{check_round_invariants, InvariantViolation};
pub use types::{
    AgentId, AuthorityId, Commitment, Delta, Envelope, Key, OperationKind, OperationRequest,
    Outcome, RequestId, Round, ScopeEntry, Value, VisibleOutcome,
};
pub use world::{WorldError, WorldSnapshot, WorldState};
