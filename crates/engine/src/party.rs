//! Party resolution: binding abstract role names to concrete callers.
//!
//! All identity lookup logic ("find the submitter's direct manager",
//! "pick the on-duty finance user") lives behind the injected
//! [`PartyResolver`]; the engine core contains none of it. A role is
//! resolved at most once per instance: once a binding is committed it
//! is immutable unless a permission effect explicitly rebinds it.
//!
//! Resolution must be deterministic for a given instance snapshot --
//! the engine never re-resolves a role to a different identity behind
//! an existing binding.

use std::collections::BTreeMap;
use std::fmt;

use accord_storage::InstanceRecord;
use async_trait::async_trait;

use crate::identity::Identity;

/// A role could not be resolved to an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveError {
    pub role: String,
    pub message: String,
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot resolve role '{}': {}", self.role, self.message)
    }
}

impl std::error::Error for ResolveError {}

/// Deployment-supplied resolver from role names to identities,
/// injected once per engine.
#[async_trait]
pub trait PartyResolver: Send + Sync {
    /// Resolve `role` for the given instance snapshot. Called only for
    /// roles the instance does not already bind.
    async fn resolve(&self, role: &str, instance: &InstanceRecord)
        -> Result<Identity, ResolveError>;
}

/// A resolver backed by a fixed role -> identity map. The reference
/// implementation for tests and single-tenant deployments.
#[derive(Default)]
pub struct StaticPartyResolver {
    assignments: BTreeMap<String, Identity>,
}

impl StaticPartyResolver {
    pub fn new() -> StaticPartyResolver {
        StaticPartyResolver::default()
    }

    pub fn assign(mut self, role: impl Into<String>, identity: Identity) -> Self {
        self.assignments.insert(role.into(), identity);
        self
    }
}

#[async_trait]
impl PartyResolver for StaticPartyResolver {
    async fn resolve(
        &self,
        role: &str,
        _instance: &InstanceRecord,
    ) -> Result<Identity, ResolveError> {
        self.assignments
            .get(role)
            .cloned()
            .ok_or_else(|| ResolveError {
                role: role.to_string(),
                message: "no assignment for role".to_string(),
            })
    }
}
