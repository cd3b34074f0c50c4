//! Terminal classification
//!
//! Stateful detectors evaluated once per round, after execution:
//!
//! - **Deadlock**: authority blocks everything that was tried
//! - **Livelock**: admissible attempts keep happening but tracked state does
//!   not move for `livelock_window` consecutive rounds. Latches.
//! - **Orphaning**: an exit left a `(key, op)` pair with no active ALLOW
//!   holder. Detected in the exit round, emitted the round after. Permanent.
//! - **Collapse**: no active agents remain
//!
//! At most one *new* classification is emitted per round:
//! `COLLAPSE > ORPHANED > DEADLOCK > LIVELOCK`. A pending orphaning or an
//! unreported livelock latch waits for the next round with a free slot. A
//! deadlock is only ever reported fresh, and is not reported in a round whose
//! exits just orphaned something.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;
use core::fmt;

use serde::{Deserialize, Serialize};

use crate::admissibility::RoundTally;
use crate::authority::AuthorityStore;
use crate::types::{AgentId, Key, Round, ScopeEntry};
use crate::world::WorldSnapshot;

/// A terminal classification
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalClass {
    Deadlock,
    Livelock,
    Orphaned { keys: BTreeSet<Key> },
    Collapse,
}

impl TerminalClass {
    pub fn kind(&self) -> ClassKind {
        match self {
            TerminalClass::Deadlock => ClassKind::Deadlock,
            TerminalClass::Livelock => ClassKind::Livelock,
            TerminalClass::Orphaned { .. } => ClassKind::Orphaned,
            TerminalClass::Collapse => ClassKind::Collapse,
        }
    }
}

impl fmt::Display for TerminalClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalClass::Deadlock => f.write_str("DEADLOCK"),
            TerminalClass::Livelock => f.write_str("LIVELOCK"),
            TerminalClass::Collapse => f.write_str("COLLAPSE"),
            TerminalClass::Orphaned { keys } => {
                f.write_str("ORPHANED(")?;
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", key)?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Classification kind without payload (used for halting policy)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassKind {
    Deadlock,
    Livelock,
    Orphaned,
    Collapse,
}

/// One-way livelock flag
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LivelockLatch {
    #[default]
    Clear,
    Latched { since: Round },
}

impl LivelockLatch {
    pub fn is_latched(&self) -> bool {
        matches!(self, LivelockLatch::Latched { .. })
    }
}

/// Which actions deadlock/livelock detection ranges over
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    /// Only what agents actually submitted this round
    #[default]
    StrategyAware,
    /// Everything active agents could lawfully submit, given the authorities
    Structural,
}

/// Frozen classifier parameters
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassifierConfig {
    /// Consecutive stalled rounds before livelock latches
    pub livelock_window: u32,
    /// Detection mode
    pub mode: DetectionMode,
    /// Keys whose change counts as progress (None = all keys)
    pub tracked_keys: Option<BTreeSet<Key>>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            livelock_window: 3,
            mode: DetectionMode::StrategyAware,
            tracked_keys: None,
        }
    }
}

/// Everything the classifier sees about one round
pub struct RoundTrace<'a> {
    /// Round number
    pub round: Round,
    /// Adjudication counters
    pub tally: RoundTally,
    /// Agents that exited this round
    pub exited: &'a [AgentId],
    /// Agents still active after exits
    pub active: &'a BTreeSet<AgentId>,
    /// Authority store, with this round's exits already retired
    pub store: &'a AuthorityStore,
    /// State before execution
    pub before: &'a WorldSnapshot,
    /// State after execution
    pub after: &'a WorldSnapshot,
}

/// Stateful terminal classifier.
pub struct TerminalClassifier {
    config: ClassifierConfig,
    latch: LivelockLatch,
    stalled_rounds: u32,
    deadlocked: bool,
    orphaned: BTreeSet<ScopeEntry>,
    /// Orphaned pairs detected but not yet emitted
    pending_orphans: BTreeSet<ScopeEntry>,
    livelock_reported: bool,
    collapsed: bool,
    history: Vec<(Round, TerminalClass)>,
}

impl TerminalClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            latch: LivelockLatch::Clear,
            stalled_rounds: 0,
            deadlocked: false,
            orphaned: BTreeSet::new(),
            pending_orphans: BTreeSet::new(),
            livelock_reported: false,
            collapsed: false,
            history: Vec::new(),
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Livelock latch state
    pub fn livelock(&self) -> LivelockLatch {
        self.latch
    }

    /// Every `(key, op)` pair orphaned so far
    pub fn orphaned(&self) -> &BTreeSet<ScopeEntry> {
        &self.orphaned
    }

    /// Orphaned pairs waiting to be emitted
    pub fn pending_orphans(&self) -> &BTreeSet<ScopeEntry> {
        &self.pending_orphans
    }

    /// Check if collapse was reached
    pub fn collapsed(&self) -> bool {
        self.collapsed
    }

    /// Every classification emitted so far, in round order
    pub fn history(&self) -> &[(Round, TerminalClass)] {
        &self.history
    }

    /// Consecutive stalled rounds counted so far
    pub fn stalled_rounds(&self) -> u32 {
        self.stalled_rounds
    }

    /// Classify one round. Returns the round's new classification, if any.
    ///
    /// Pairs orphaned by this round's exits are held back and emitted in the
    /// next round that has no collapse to report.
    pub fn classify(&mut self, trace: &RoundTrace<'_>) -> Option<TerminalClass> {
        let due = core::mem::take(&mut self.pending_orphans);
        let collapse = self.detect_collapse(trace);
        let fresh_orphans = self.detect_orphans(trace);
        let deadlock = self.detect_deadlock(trace);
        let livelock = self.detect_livelock(trace);

        let class = if collapse {
            self.pending_orphans.extend(due);
            Some(TerminalClass::Collapse)
        } else if !due.is_empty() {
            let keys = due.into_iter().map(|e| e.key).collect();
            Some(TerminalClass::Orphaned { keys })
        } else if deadlock && fresh_orphans.is_empty() {
            Some(TerminalClass::Deadlock)
        } else if livelock {
            self.livelock_reported = true;
            Some(TerminalClass::Livelock)
        } else {
            None
        };
        self.pending_orphans.extend(fresh_orphans);

        if let Some(class) = &class {
            self.history.push((trace.round, class.clone()));
        }
        class
    }

    fn detect_collapse(&mut self, trace: &RoundTrace<'_>) -> bool {
        if self.collapsed || !trace.active.is_empty() {
            return false;
        }
        self.collapsed = true;
        true
    }

    fn detect_orphans(&mut self, trace: &RoundTrace<'_>) -> BTreeSet<ScopeEntry> {
        let mut fresh = BTreeSet::new();
        for authority in trace.store.iter() {
            if !authority.is_allow() || !trace.exited.contains(authority.holder()) {
                continue;
            }
            for entry in authority.scope() {
                if self.orphaned.contains(entry) {
                    continue;
                }
                if trace.store.holders_of(entry).is_empty() {
                    fresh.insert(entry.clone());
                }
            }
        }
        self.orphaned.extend(fresh.iter().cloned());
        fresh
    }

    fn detect_deadlock(&mut self, trace: &RoundTrace<'_>) -> bool {
        let blocked = match self.config.mode {
            DetectionMode::StrategyAware => {
                trace.tally.submitted > 0 && trace.tally.pass1_survivors == 0
            }
            DetectionMode::Structural => {
                !trace.active.is_empty() && !any_usable_scope(trace)
            }
        };

        // A deadlock that persists is not new
        let fresh = blocked && !self.deadlocked;
        self.deadlocked = blocked;
        fresh
    }

    fn detect_livelock(&mut self, trace: &RoundTrace<'_>) -> bool {
        let admissible_existed = match self.config.mode {
            DetectionMode::StrategyAware => trace.tally.pass1_survivors > 0,
            DetectionMode::Structural => any_usable_scope(trace),
        };
        let attempted = trace.tally.submitted > 0;
        let unchanged = trace
            .before
            .changed_keys(trace.after, self.config.tracked_keys.as_ref())
            .is_empty();

        if admissible_existed && attempted && unchanged {
            self.stalled_rounds = self.stalled_rounds.saturating_add(1);
        } else {
            self.stalled_rounds = 0;
        }

        if !self.latch.is_latched() && self.stalled_rounds >= self.config.livelock_window {
            self.latch = LivelockLatch::Latched { since: trace.round };
        }
        // Latched but not yet reported
        self.latch.is_latched() && !self.livelock_reported
    }
}

fn any_usable_scope(trace: &RoundTrace<'_>) -> bool {
    trace
        .active
        .iter()
        .any(|agent| !trace.store.usable_scopes(agent).is_empty())
}

/// Count of classifications per kind (for reports)
pub fn count_by_kind(history: &[(Round, TerminalClass)]) -> BTreeMap<ClassKind, usize> {
    let mut counts = BTreeMap::new();
    for (_, class) in history {
        *counts.entry(class.kind()).or_insert(0) += 1;
    }
    counts
}
