//! Concord Axiom Layer
//!
//! The Axiom layer provides:
//! - **Canonical encoding**: sorted-key compact JSON and SHA-256 digests
//! - **AuditLog**: hash-chained, append-only record of every round
//! - **Replay**: re-drive a fresh kernel from a log and detect divergence
//!
//! # Core Guarantee
//!
//! > Same frozen inputs always produce the same log, timestamps aside.
//!
//! This is the foundation of Concord's reproducibility claim.

#![no_std]
extern crate alloc;

pub mod canonical;
pub mod replay;
pub mod roundlog;

// Re-export main types
pub use canonical::{canonical_json, digest, request_id, CanonicalError, Digest};
pub use replay::{
    compare_rounds, replay, replay_and_verify, ReplayError, ReplayResult, Replayable,
};
pub use roundlog::{AuditLog, GenesisRecord, LogError, ObservationRecord, RoundRecord};
