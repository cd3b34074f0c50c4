//! Deterministic replay implementation for the Kernel.
//!
//! This module implements the `Replayable` trait, allowing a fresh kernel to
//! re-drive a captured log for auditing. Logged exits, messages, and requests
//! are injected directly; agent strategies are never consulted.

use concord_axiom::{
    digest, replay_and_verify, AuditLog, Digest, GenesisRecord, ReplayError, ReplayResult,
    Replayable, RoundRecord,
};
use tracing::info;

use crate::config::FrozenInputs;
use crate::error::KernelError;
use crate::kernel::{proposal_of, Kernel};

impl Replayable for Kernel {
    fn replay_genesis(&mut self, genesis: &GenesisRecord) -> ReplayResult<()> {
        let own = self.log().genesis();
        let mismatch = if own.config_digest != genesis.config_digest {
            Some("config_digest")
        } else if own.initial_state != genesis.initial_state {
            Some("initial_state")
        } else if own.authorities != genesis.authorities {
            Some("authorities")
        } else if own.agents != genesis.agents {
            Some("agents")
        } else if own.authority_digest != genesis.authority_digest {
            Some("authority_digest")
        } else {
            None
        };
        match mismatch {
            Some(field) => Err(ReplayError::InvalidGenesis(format!("{} differs from frozen inputs", field))),
            None => Ok(()),
        }
    }

    fn replay_round(&mut self, logged: &RoundRecord) -> ReplayResult<RoundRecord> {
        let round = logged.round;
        let rejected = move |e: KernelError| ReplayError::Rejected {
            round,
            reason: e.to_string(),
        };

        if round != self.round() {
            return Err(rejected(KernelError::Inputs(format!(
                "kernel is at round {}",
                self.round()
            ))));
        }

        let exits = logged.exits.clone();
        let messages = logged
            .messages
            .iter()
            .map(|env| (env.sender.clone(), env.payload.clone()))
            .collect();
        let proposals = logged
            .requests
            .iter()
            .map(|req| (req.submitter.clone(), proposal_of(req)))
            .collect();

        self.run_round(exits, messages, proposals, logged.timestamp_ms)
            .cloned()
            .map_err(rejected)
    }

    fn state_digest(&self) -> ReplayResult<Digest> {
        digest(&self.snapshot()).map_err(|e| ReplayError::Rejected {
            round: self.round(),
            reason: e.to_string(),
        })
    }
}

/// Replay a captured log against a fresh kernel built from `inputs`.
///
/// Succeeds only when every round matches and the rebuilt log ends at the
/// same head hash. Returns that head.
pub fn replay_log(inputs: FrozenInputs, log: &AuditLog) -> Result<Digest, KernelError> {
    let mut kernel = Kernel::new(inputs)?;
    replay_and_verify(&mut kernel, log)?;

    let expected = log.head();
    let actual = kernel.log().head();
    if actual != expected {
        return Err(ReplayError::HashMismatch { expected, actual }.into());
    }

    info!(rounds = log.len(), head = %actual, "replay verified");
    Ok(actual)
}
