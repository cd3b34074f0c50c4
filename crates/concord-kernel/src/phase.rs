//! Epoch phase state machine.
//!
//! ```text
//! AwaitingObserve -> AwaitingExitDecision -> AwaitingMessage -> AwaitingProposal
//!        ^                                                            |
//!        |                                                            v
//!      Logged <- Classifying <- Executing <- Adjudicating <-----------+
//!        |
//!        v
//!      Halted
//! ```

use serde::{Deserialize, Serialize};

use crate::error::IntegrityFailure;

/// Step of the round protocol the kernel is waiting to perform
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EpochPhase {
    AwaitingObserve,
    AwaitingExitDecision,
    AwaitingMessage,
    AwaitingProposal,
    Adjudicating,
    Executing,
    Classifying,
    Logged,
    Halted,
}

impl EpochPhase {
    /// Phase that follows this one. `Halted` has no successor.
    pub fn next(self) -> Option<EpochPhase> {
        use EpochPhase::*;
        match self {
            AwaitingObserve => Some(AwaitingExitDecision),
            AwaitingExitDecision => Some(AwaitingMessage),
            AwaitingMessage => Some(AwaitingProposal),
            AwaitingProposal => Some(Adjudicating),
            Adjudicating => Some(Executing),
            Executing => Some(Classifying),
            Classifying => Some(Logged),
            Logged => Some(AwaitingObserve),
            Halted => None,
        }
    }

    /// Perform step `step`: fails unless the machine is currently in `step`.
    pub fn advance(&mut self, step: EpochPhase) -> Result<(), IntegrityFailure> {
        let out_of_order = IntegrityFailure::PhaseOrder {
            current: *self,
            attempted: step,
        };
        if *self != step {
            return Err(out_of_order);
        }
        *self = self.next().ok_or(out_of_order)?;
        Ok(())
    }

    /// Terminate after a completed round
    pub fn halt(&mut self) -> Result<(), IntegrityFailure> {
        if *self != EpochPhase::Logged {
            return Err(IntegrityFailure::PhaseOrder {
                current: *self,
                attempted: EpochPhase::Halted,
            });
        }
        *self = EpochPhase::Halted;
        Ok(())
    }
}
