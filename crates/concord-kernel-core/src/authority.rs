//! Authority-based access control
//!
//! This module implements the capability and veto layer:
//! - Authority records (immutable ALLOW/DENY declarations)
//! - The authority store (holder and coverage queries)
//! - The `authority_check` gatekeeper used by Pass 1
//!
//! # Security Properties
//!
//! 1. **Holder-bound ALLOW**: an ALLOW only ever admits its own holder
//! 2. **Global DENY**: a DENY blocks every submitter, cited or not
//! 3. **Frozen set**: no authority is created, changed, or destroyed after
//!    construction. Exit only hides a holder from lookups.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{AgentId, AuthorityId, Commitment, ScopeEntry};

/// An authority declaration.
///
/// Fields are private: there is no way to change an authority once built.
/// Serialization order is the field order below.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authority {
    id: AuthorityId,
    holder: AgentId,
    issuer: AgentId,
    scope: Vec<ScopeEntry>,
    commitment: Commitment,
}

impl Authority {
    pub fn new(
        id: impl Into<AuthorityId>,
        holder: impl Into<AgentId>,
        issuer: impl Into<AgentId>,
        scope: Vec<ScopeEntry>,
        commitment: Commitment,
    ) -> Self {
        Self {
            id: id.into(),
            holder: holder.into(),
            issuer: issuer.into(),
            scope,
            commitment,
        }
    }

    /// Shorthand for a holder-bound capability
    pub fn allow(id: &str, holder: &str, scope: Vec<ScopeEntry>) -> Self {
        Self::new(id, holder, "root", scope, Commitment::Allow)
    }

    /// Shorthand for a global veto
    pub fn deny(id: &str, scope: Vec<ScopeEntry>) -> Self {
        Self::new(id, "root", "root", scope, Commitment::Deny)
    }

    pub fn id(&self) -> &AuthorityId {
        &self.id
    }

    pub fn holder(&self) -> &AgentId {
        &self.holder
    }

    /// Provenance only; never consulted by admissibility
    pub fn issuer(&self) -> &AgentId {
        &self.issuer
    }

    pub fn scope(&self) -> &[ScopeEntry] {
        &self.scope
    }

    pub fn commitment(&self) -> Commitment {
        self.commitment
    }

    pub fn is_allow(&self) -> bool {
        self.commitment == Commitment::Allow
    }

    pub fn is_deny(&self) -> bool {
        self.commitment == Commitment::Deny
    }

    /// Check if this authority covers a `(key, operation)` pair
    pub fn covers(&self, entry: &ScopeEntry) -> bool {
        self.scope.iter().any(|e| e == entry)
    }
}

/// Errors detected while building the store
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AuthorityError {
    #[error("duplicate authority id {0}")]
    DuplicateId(AuthorityId),
    #[error("authority {0} has an empty scope")]
    EmptyScope(AuthorityId),
    #[error("authority {0} has an empty holder")]
    EmptyHolder(AuthorityId),
}

/// Why Pass 1 rejected a `(key, operation)` pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorityDenial {
    /// No cited ALLOW held by the submitter covers the pair
    MissingCapability { entry: ScopeEntry },
    /// A DENY covers the pair
    Vetoed { entry: ScopeEntry, by: AuthorityId },
}

/// The authority store.
///
/// Holds the frozen authority set plus the set of holders that have exited.
pub struct AuthorityStore {
    authorities: BTreeMap<AuthorityId, Authority>,
    retired: BTreeSet<AgentId>,
}

impl AuthorityStore {
    /// Build the store from the round-zero declarations
    pub fn new(authorities: Vec<Authority>) -> Result<Self, AuthorityError> {
        let mut map = BTreeMap::new();
        for authority in authorities {
            if authority.scope.is_empty() {
                return Err(AuthorityError::EmptyScope(authority.id));
            }
            if authority.holder.as_str().is_empty() {
                return Err(AuthorityError::EmptyHolder(authority.id));
            }
            if map.contains_key(&authority.id) {
                return Err(AuthorityError::DuplicateId(authority.id));
            }
            map.insert(authority.id.clone(), authority);
        }
        Ok(Self {
            authorities: map,
            retired: BTreeSet::new(),
        })
    }

    /// Get an authority by id
    pub fn get(&self, id: &AuthorityId) -> Option<&Authority> {
        self.authorities.get(id)
    }

    /// All authorities in id order
    pub fn iter(&self) -> impl Iterator<Item = &Authority> {
        self.authorities.values()
    }

    /// Number of authorities
    pub fn len(&self) -> usize {
        self.authorities.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.authorities.is_empty()
    }

    /// Record that a holder exited. Its ALLOWs stay in the store but stop
    /// resolving for anyone, including itself.
    pub fn retire_holder(&mut self, agent: &AgentId) {
        self.retired.insert(agent.clone());
    }

    /// Check if a holder is still able to use its ALLOWs
    pub fn is_active_holder(&self, agent: &AgentId) -> bool {
        !self.retired.contains(agent)
    }

    /// Active identities able to cite an ALLOW for this pair
    pub fn holders_of(&self, entry: &ScopeEntry) -> BTreeSet<AgentId> {
        self.authorities
            .values()
            .filter(|a| a.is_allow() && a.covers(entry) && self.is_active_holder(&a.holder))
            .map(|a| a.holder.clone())
            .collect()
    }

    /// Check if any DENY covers this pair
    pub fn has_deny(&self, entry: &ScopeEntry) -> bool {
        self.deny_covering(entry).is_some()
    }

    /// First DENY (by id) covering this pair
    pub fn deny_covering(&self, entry: &ScopeEntry) -> Option<&Authority> {
        self.authorities
            .values()
            .find(|a| a.is_deny() && a.covers(entry))
    }

    /// True iff the authority exists and is either an ALLOW held by `agent`
    /// or a DENY (regardless of holder).
    pub fn is_valid_citation(&self, id: &AuthorityId, agent: &AgentId) -> bool {
        match self.authorities.get(id) {
            Some(a) if a.is_deny() => true,
            Some(a) => &a.holder == agent,
            None => false,
        }
    }

    /// Pairs `agent` could lawfully pass Pass 1 on right now
    pub fn usable_scopes(&self, agent: &AgentId) -> BTreeSet<ScopeEntry> {
        if !self.is_active_holder(agent) {
            return BTreeSet::new();
        }
        self.authorities
            .values()
            .filter(|a| a.is_allow() && &a.holder == agent)
            .flat_map(|a| a.scope.iter())
            .filter(|entry| !self.has_deny(entry))
            .cloned()
            .collect()
    }
}

/// Check whether a submitter may perform one `(key, operation)` pair.
///
/// This is the Pass 1 gatekeeper. It never modifies any state.
///
/// # Returns
/// - `Ok(&Authority)`: the cited ALLOW that admits the pair
/// - `Err(AuthorityDenial)`: vetoed, or no usable citation covers the pair
///
/// Veto is checked first: a DENY anywhere in the store wins over any ALLOW.
pub fn authority_check<'a>(
    store: &'a AuthorityStore,
    submitter: &AgentId,
    citations: &[AuthorityId],
    entry: &ScopeEntry,
) -> Result<&'a Authority, AuthorityDenial> {
    if let Some(deny) = store.deny_covering(entry) {
        return Err(AuthorityDenial::Vetoed {
            entry: entry.clone(),
            by: deny.id.clone(),
        });
    }

    citations
        .iter()
        .filter_map(|id| store.get(id))
        .find(|a| {
            a.is_allow()
                && &a.holder == submitter
                && store.is_active_holder(&a.holder)
                && a.covers(entry)
        })
        .ok_or_else(|| AuthorityDenial::MissingCapability {
            entry: entry.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OperationKind;
    use alloc::vec;

    fn write(key: &str) -> ScopeEntry {
        ScopeEntry::new(key, OperationKind::Write)
    }

    fn store() -> AuthorityStore {
        AuthorityStore::new(vec![
            Authority::allow("a1", "alice", vec![write("R"), write("S")]),
            Authority::allow("b1", "bob", vec![write("R")]),
            Authority::deny("d1", vec![write("S")]),
        ])
        .unwrap()
    }

    #[test]
    fn test_store_rejects_duplicates() {
        let err = AuthorityStore::new(vec![
            Authority::allow("a1", "alice", vec![write("R")]),
            Authority::allow("a1", "bob", vec![write("R")]),
        ])
        .err();
        assert_eq!(err, Some(AuthorityError::DuplicateId(AuthorityId::from("a1"))));
    }

    #[test]
    fn test_store_rejects_empty_scope() {
        let err = AuthorityStore::new(vec![Authority::allow("a1", "alice", vec![])]).err();
        assert_eq!(err, Some(AuthorityError::EmptyScope(AuthorityId::from("a1"))));
    }

    #[test]
    fn test_holders_of_excludes_retired() {
        let mut s = store();
        assert_eq!(s.holders_of(&write("R")).len(), 2);

        s.retire_holder(&AgentId::from("alice"));
        let holders = s.holders_of(&write("R"));
        assert_eq!(holders.len(), 1);
        assert!(holders.contains(&AgentId::from("bob")));

        // The authority itself is untouched
        assert_eq!(s.get(&AuthorityId::from("a1")).unwrap().holder().as_str(), "alice");
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn test_valid_citation_polarity() {
        let s = store();
        let alice = AgentId::from("alice");
        let bob = AgentId::from("bob");
        assert!(s.is_valid_citation(&AuthorityId::from("a1"), &alice));
        assert!(!s.is_valid_citation(&AuthorityId::from("a1"), &bob));
        assert!(s.is_valid_citation(&AuthorityId::from("d1"), &bob));
        assert!(!s.is_valid_citation(&AuthorityId::from("zz"), &alice));
    }

    #[test]
    fn test_authority_check_allow() {
        let s = store();
        let alice = AgentId::from("alice");
        let cap = authority_check(&s, &alice, &[AuthorityId::from("a1")], &write("R")).unwrap();
        assert_eq!(cap.id().as_str(), "a1");
    }

    #[test]
    fn test_authority_check_deny_wins() {
        let s = store();
        let alice = AgentId::from("alice");
        let err = authority_check(&s, &alice, &[AuthorityId::from("a1")], &write("S")).unwrap_err();
        assert_eq!(
            err,
            AuthorityDenial::Vetoed {
                entry: write("S"),
                by: AuthorityId::from("d1")
            }
        );
    }

    #[test]
    fn test_authority_check_holder_bound() {
        let s = store();
        let bob = AgentId::from("bob");
        let err = authority_check(&s, &bob, &[AuthorityId::from("a1")], &write("R")).unwrap_err();
        assert!(matches!(err, AuthorityDenial::MissingCapability { .. }));
    }

    #[test]
    fn test_authority_check_retired_holder_fails_closed() {
        let mut s = store();
        let alice = AgentId::from("alice");
        s.retire_holder(&alice);
        let err = authority_check(&s, &alice, &[AuthorityId::from("a1")], &write("R")).unwrap_err();
        assert!(matches!(err, AuthorityDenial::MissingCapability { .. }));
    }

    #[test]
    fn test_usable_scopes_skip_vetoed() {
        let s = store();
        let usable = s.usable_scopes(&AgentId::from("alice"));
        assert!(usable.contains(&write("R")));
        assert!(!usable.contains(&write("S")));
        assert!(s.usable_scopes(&AgentId::from("carol")).is_empty());
    }
}
