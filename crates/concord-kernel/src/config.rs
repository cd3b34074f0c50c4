//! Run configuration and frozen inputs.
//!
//! Everything a run depends on is fixed before round zero and recorded in
//! the genesis record. Nothing here can change once a [`Kernel`] is built.
//!
//! [`Kernel`]: crate::Kernel

use std::collections::{BTreeMap, BTreeSet};

use concord_kernel_core::{
    AgentId, Authority, ClassKind, ClassifierConfig, DetectionMode, Key, Value,
};
use serde::{Deserialize, Serialize};

use crate::error::KernelError;

/// Default round limit
pub const DEFAULT_MAX_ROUNDS: u64 = 20;

/// Default livelock window
pub const DEFAULT_LIVELOCK_WINDOW: u32 = 3;

/// Frozen run parameters
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Rounds to run before giving up
    pub max_rounds: u64,
    /// Consecutive stalled rounds that make a livelock
    pub livelock_window: u32,
    /// Whether agents may send each other messages
    pub messaging_enabled: bool,
    /// What deadlock/livelock detection ranges over
    pub detection_mode: DetectionMode,
    /// Classifications that end the run
    pub halt_on: BTreeSet<ClassKind>,
    /// Keys whose change counts as progress (all keys when absent)
    pub tracked_keys: Option<BTreeSet<Key>>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            livelock_window: DEFAULT_LIVELOCK_WINDOW,
            messaging_enabled: false,
            detection_mode: DetectionMode::StrategyAware,
            halt_on: [ClassKind::Deadlock, ClassKind::Livelock, ClassKind::Collapse]
                .into_iter()
                .collect(),
            tracked_keys: None,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), KernelError> {
        if self.max_rounds == 0 {
            return Err(KernelError::Config("max_rounds must be at least 1".into()));
        }
        if self.livelock_window == 0 {
            return Err(KernelError::Config("livelock_window must be at least 1".into()));
        }
        if self.tracked_keys.as_ref().is_some_and(|keys| keys.is_empty()) {
            return Err(KernelError::Config("tracked_keys must not be empty when set".into()));
        }
        Ok(())
    }

    /// Check if a classification of this kind ends the run
    pub fn halts_on(&self, kind: ClassKind) -> bool {
        self.halt_on.contains(&kind)
    }

    pub fn classifier_config(&self) -> ClassifierConfig {
        ClassifierConfig {
            livelock_window: self.livelock_window,
            mode: self.detection_mode,
            tracked_keys: self.tracked_keys.clone(),
        }
    }
}

/// Everything a run is built from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FrozenInputs {
    #[serde(default)]
    pub config: RunConfig,
    /// Initial world state; its key set is the schema
    pub initial_state: BTreeMap<Key, Option<Value>>,
    /// Authorities declared at round zero
    pub authorities: Vec<Authority>,
    /// Agent roster, in polling order
    pub agents: Vec<AgentId>,
}

impl FrozenInputs {
    pub fn new(
        config: RunConfig,
        initial_state: BTreeMap<Key, Option<Value>>,
        authorities: Vec<Authority>,
        agents: Vec<AgentId>,
    ) -> Self {
        Self {
            config,
            initial_state,
            authorities,
            agents,
        }
    }

    /// Parse from JSON and validate
    pub fn from_json_str(input: &str) -> Result<Self, KernelError> {
        let inputs: FrozenInputs = serde_json::from_str(input)?;
        inputs.validate()?;
        Ok(inputs)
    }

    pub fn validate(&self) -> Result<(), KernelError> {
        self.config.validate()?;

        if self.initial_state.is_empty() {
            return Err(KernelError::Inputs("world state has no keys".into()));
        }

        let mut seen = BTreeSet::new();
        for agent in &self.agents {
            if agent.as_str().is_empty() {
                return Err(KernelError::Inputs("empty agent id in roster".into()));
            }
            if !seen.insert(agent) {
                return Err(KernelError::Inputs(format!("agent {} listed twice", agent)));
            }
        }

        if let Some(tracked) = &self.config.tracked_keys {
            if let Some(key) = tracked.iter().find(|k| !self.initial_state.contains_key(*k)) {
                return Err(KernelError::Config(format!("tracked key {} is not in the world state", key)));
            }
        }

        for authority in &self.authorities {
            if let Some(entry) = authority
                .scope()
                .iter()
                .find(|e| !self.initial_state.contains_key(&e.key))
            {
                return Err(KernelError::Inputs(format!(
                    "authority {} covers unknown key {}",
                    authority.id(),
                    entry.key
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INPUTS: &str = r#"{
        "config": { "max_rounds": 5, "halt_on": ["LIVELOCK"] },
        "initial_state": { "R": null, "count": 0 },
        "authorities": [
            { "id": "a1", "holder": "alice", "issuer": "root",
              "scope": [{ "key": "R", "operation": "WRITE" }], "commitment": "ALLOW" }
        ],
        "agents": ["alice", "bob"]
    }"#;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.max_rounds, 20);
        assert_eq!(config.livelock_window, 3);
        assert!(!config.messaging_enabled);
        assert!(config.halts_on(ClassKind::Deadlock));
        assert!(!config.halts_on(ClassKind::Orphaned));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_frozen_inputs() {
        let inputs = FrozenInputs::from_json_str(INPUTS).unwrap();
        assert_eq!(inputs.config.max_rounds, 5);
        assert_eq!(inputs.config.livelock_window, 3);
        assert!(inputs.config.halts_on(ClassKind::Livelock));
        assert!(!inputs.config.halts_on(ClassKind::Deadlock));
        assert_eq!(inputs.initial_state.len(), 2);
        assert_eq!(inputs.initial_state[&Key::from("count")], Some(Value::Int(0)));
        assert_eq!(inputs.agents.len(), 2);
    }

    #[test]
    fn test_unknown_config_field_rejected() {
        let bad = r#"{ "config": { "max_round": 5 }, "initial_state": {"R": null},
                       "authorities": [], "agents": ["a"] }"#;
        assert!(matches!(FrozenInputs::from_json_str(bad), Err(KernelError::Json(_))));
    }

    #[test]
    fn test_zero_window_rejected() {
        let config = RunConfig {
            livelock_window: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(KernelError::Config(_))));
    }

    #[test]
    fn test_duplicate_agent_rejected() {
        let mut inputs = FrozenInputs::from_json_str(INPUTS).unwrap();
        inputs.agents.push(AgentId::from("alice"));
        assert!(matches!(inputs.validate(), Err(KernelError::Inputs(_))));
    }

    #[test]
    fn test_authority_on_unknown_key_rejected() {
        let mut inputs = FrozenInputs::from_json_str(INPUTS).unwrap();
        inputs.initial_state.remove(&Key::from("R"));
        assert!(matches!(inputs.validate(), Err(KernelError::Inputs(_))));
    }
}
