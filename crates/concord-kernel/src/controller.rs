//! Epoch controller - drives live agent strategies through the kernel.
//!
//! All rounds flow: `observe → exit → message → propose → adjudicate →
//! execute → classify → log`. Agents are polled one at a time, in roster
//! order, within each step. There is no concurrency between agents.

use std::collections::BTreeMap;

use concord_agent::AgentStrategy;
use concord_axiom::{AuditLog, Digest, RoundRecord};
use concord_kernel_core::{AgentId, Round, TerminalClass, WorldSnapshot};
use tracing::{error, info};

use crate::clock::{Clock, SystemClock};
use crate::config::FrozenInputs;
use crate::error::{IntegrityFailure, KernelError};
use crate::kernel::{last_classification, Kernel};

/// Why a run is invalid
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InvalidRun {
    /// Round limit reached without any terminal classification
    NoClassification,
    /// A structural invariant broke; the whole run is void
    Integrity { round: Round, failure: IntegrityFailure },
}

/// How a run ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunStatus {
    /// A halting classification was emitted
    Halted { round: Round, class: TerminalClass },
    /// Round limit reached after at least one classification
    RoundLimit,
    Invalid(InvalidRun),
}

impl RunStatus {
    pub fn is_valid(&self) -> bool {
        !matches!(self, RunStatus::Invalid(_))
    }
}

/// Summary of a finished run
#[derive(Clone, Debug)]
pub struct RunReport {
    pub status: RunStatus,
    /// Rounds logged
    pub rounds: u64,
    /// Every classification, in round order
    pub history: Vec<(Round, TerminalClass)>,
    pub final_state: WorldSnapshot,
    /// Audit log head hash
    pub log_head: Digest,
}

/// The epoch controller.
pub struct EpochController {
    kernel: Kernel,
    strategies: BTreeMap<AgentId, Box<dyn AgentStrategy>>,
    clock: Box<dyn Clock>,
    status: Option<RunStatus>,
}

impl EpochController {
    /// Build a controller. Every roster agent needs exactly one strategy.
    pub fn new(
        inputs: FrozenInputs,
        strategies: Vec<(AgentId, Box<dyn AgentStrategy>)>,
    ) -> Result<Self, KernelError> {
        let kernel = Kernel::new(inputs)?;

        let mut map = BTreeMap::new();
        for (agent, strategy) in strategies {
            if !kernel.roster().contains(&agent) {
                return Err(KernelError::UnknownAgent(agent));
            }
            if map.insert(agent.clone(), strategy).is_some() {
                return Err(KernelError::Inputs(format!("two strategies for agent {}", agent)));
            }
        }
        if let Some(missing) = kernel.roster().iter().find(|a| !map.contains_key(*a)) {
            return Err(KernelError::MissingStrategy(missing.clone()));
        }

        Ok(Self {
            kernel,
            strategies: map,
            clock: Box::new(SystemClock),
            status: None,
        })
    }

    /// Replace the timestamp source
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn log(&self) -> &AuditLog {
        self.kernel.log()
    }

    pub fn into_log(self) -> AuditLog {
        self.kernel.into_log()
    }

    /// How the run ended (None while still running)
    pub fn status(&self) -> Option<&RunStatus> {
        self.status.as_ref()
    }

    /// Drive exactly one round with the live strategies.
    pub fn step_round(&mut self) -> Result<&RoundRecord, KernelError> {
        if self.status.is_some() {
            return Err(KernelError::Halted);
        }

        // 1. Observe
        let observations = self.kernel.begin_round()?;
        for (agent, observation) in &observations {
            self.strategy(agent)?.observe(observation);
        }

        // 2. Exit
        let mut exits = Vec::new();
        for (agent, _) in &observations {
            if self.strategy(agent)?.wants_to_exit() {
                exits.push(agent.clone());
            }
        }
        self.kernel.record_exits(exits)?;
        let active = self.kernel.active_agents();

        // 3. Message
        let mut messages = Vec::new();
        if self.kernel.config().messaging_enabled {
            for agent in &active {
                if let Some(payload) = self.strategy(agent)?.compose_message() {
                    messages.push((agent.clone(), payload));
                }
            }
        }
        self.kernel.record_messages(messages)?;

        // 4. Propose
        let mut proposals = Vec::new();
        for agent in &active {
            if let Some(proposal) = self.strategy(agent)?.propose_action() {
                proposals.push((agent.clone(), proposal));
            }
        }
        self.kernel.record_proposals(proposals)?;

        // 5-8. Adjudicate, execute, classify, log
        self.kernel.adjudicate()?;
        self.kernel.execute()?;
        let timestamp_ms = self.clock.now_ms();
        self.kernel.conclude_round(timestamp_ms)?;

        if let Some((round, class)) = last_classification(self.kernel.log()) {
            if self.kernel.config().halts_on(class.kind()) {
                info!(round, classification = %class, "run halted");
                self.kernel.halt()?;
                self.status = Some(RunStatus::Halted { round, class });
            }
        }

        self.kernel
            .log()
            .records()
            .last()
            .ok_or_else(|| KernelError::Inputs("log is empty after a round".into()))
    }

    /// Run until a halting classification, the round limit, or an integrity
    /// failure.
    ///
    /// Integrity failures end the run as [`RunStatus::Invalid`]; every other
    /// error is returned as-is.
    pub fn run(&mut self) -> Result<RunReport, KernelError> {
        while self.status.is_none() {
            if self.kernel.round() >= self.kernel.config().max_rounds {
                let status = if self.kernel.classifier().history().is_empty() {
                    RunStatus::Invalid(InvalidRun::NoClassification)
                } else {
                    RunStatus::RoundLimit
                };
                self.status = Some(status);
                break;
            }

            match self.step_round() {
                Ok(_) => {}
                Err(KernelError::Integrity { round, failure }) => {
                    error!(round, %failure, "run invalidated");
                    self.status = Some(RunStatus::Invalid(InvalidRun::Integrity { round, failure }));
                }
                Err(e) => return Err(e),
            }
        }

        let report = self.report();
        info!(rounds = report.rounds, status = ?report.status, head = %report.log_head, "run finished");
        Ok(report)
    }

    fn report(&self) -> RunReport {
        RunReport {
            status: self.status.clone().unwrap_or(RunStatus::RoundLimit),
            rounds: self.kernel.log().len() as u64,
            history: self.kernel.classifier().history().to_vec(),
            final_state: self.kernel.snapshot(),
            log_head: self.kernel.log().head(),
        }
    }

    fn strategy(&mut self, agent: &AgentId) -> Result<&mut Box<dyn AgentStrategy>, KernelError> {
        self.strategies
            .get_mut(agent)
            .ok_or_else(|| KernelError::MissingStrategy(agent.clone()))
    }
}
