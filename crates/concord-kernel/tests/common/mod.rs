//! Shared fixtures for the kernel integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;

use concord_kernel::{
    AgentId, AgentStrategy, Authority, FrozenInputs, Key, OperationKind, RunConfig, ScopeEntry,
    Value,
};
use tracing_subscriber::EnvFilter;

/// Install a test-friendly subscriber once; `RUST_LOG` picks the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// World with every key starting absent
pub fn world(keys: &[&str]) -> BTreeMap<Key, Option<Value>> {
    keys.iter().map(|k| (Key::from(*k), None)).collect()
}

pub fn allow_write(id: &str, holder: &str, keys: &[&str]) -> Authority {
    Authority::allow(
        id,
        holder,
        keys.iter().map(|k| ScopeEntry::new(*k, OperationKind::Write)).collect(),
    )
}

pub fn deny_write(id: &str, keys: &[&str]) -> Authority {
    Authority::deny(
        id,
        keys.iter().map(|k| ScopeEntry::new(*k, OperationKind::Write)).collect(),
    )
}

pub fn inputs(
    config: RunConfig,
    keys: &[&str],
    authorities: Vec<Authority>,
    agents: &[&str],
) -> FrozenInputs {
    FrozenInputs::new(
        config,
        world(keys),
        authorities,
        agents.iter().map(|a| AgentId::from(*a)).collect(),
    )
}

pub fn agent(name: &str, strategy: impl AgentStrategy + 'static) -> (AgentId, Box<dyn AgentStrategy>) {
    (AgentId::from(name), Box::new(strategy))
}
