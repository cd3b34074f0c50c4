//! World state - the flat key/value store agents compete over
//!
//! The key set is fixed at construction (the schema). Values never change
//! except through [`WorldState::apply`], which the epoch controller calls at
//! most once per round with the union of every admitted write.

use alloc::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Delta, Key, Round, Value};

/// Immutable copy of the world state at a point in time
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorldSnapshot(pub BTreeMap<Key, Option<Value>>);

impl WorldSnapshot {
    /// Value of a key (None if absent or not in schema)
    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.0.get(key).and_then(Option::as_ref)
    }

    /// Keys whose value differs between `self` and `other`, restricted to
    /// `tracked` when given.
    pub fn changed_keys(&self, other: &WorldSnapshot, tracked: Option<&BTreeSet<Key>>) -> BTreeSet<Key> {
        self.0
            .iter()
            .filter(|(key, _)| tracked.map_or(true, |t| t.contains(*key)))
            .filter(|(key, value)| other.0.get(*key) != Some(*value))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

/// Errors returned by world state mutation
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum WorldError {
    /// Batch names a key outside the fixed schema; nothing was written
    #[error("key {0} is not part of the world schema")]
    UnknownKey(Key),
    /// A second batch was offered for a round that already applied one
    #[error("world state already applied a batch for round {0}")]
    AlreadyApplied(Round),
}

/// The world state store.
pub struct WorldState {
    entries: BTreeMap<Key, Option<Value>>,
    last_applied: Option<Round>,
}

impl WorldState {
    /// Create the store; the initial key set becomes the fixed schema.
    pub fn new(initial: BTreeMap<Key, Option<Value>>) -> Self {
        Self {
            entries: initial,
            last_applied: None,
        }
    }

    /// Read a key. Returns None for absent values and unknown keys alike.
    pub fn read(&self, key: &Key) -> Option<&Value> {
        self.entries.get(key).and_then(Option::as_ref)
    }

    /// Check if a key belongs to the schema
    pub fn contains_key(&self, key: &Key) -> bool {
        self.entries.contains_key(key)
    }

    /// Iterate schema keys in order
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.entries.keys()
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot(self.entries.clone())
    }

    /// Round of the last applied batch
    pub fn last_applied(&self) -> Option<Round> {
        self.last_applied
    }

    /// Apply a batch atomically.
    ///
    /// Every key is validated before any write happens, so a failing batch
    /// leaves the store untouched. An empty batch still counts as the
    /// round's single apply.
    pub fn apply(&mut self, round: Round, delta: &Delta) -> Result<WorldSnapshot, WorldError> {
        if self.last_applied.is_some_and(|last| last >= round) {
            return Err(WorldError::AlreadyApplied(round));
        }

        if let Some(unknown) = delta.keys().find(|key| !self.entries.contains_key(*key)) {
            return Err(WorldError::UnknownKey(unknown.clone()));
        }

        for (key, value) in delta {
            self.entries.insert(key.clone(), value.clone());
        }
        self.last_applied = Some(round);

        Ok(self.snapshot())
    }
}
