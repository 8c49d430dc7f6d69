use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// An authenticated caller: an opaque subject reference plus the roles
/// it is eligible to hold. Supplied by the external authentication
/// collaborator; the engine never parses tokens or sessions and never
/// persists identities beyond the subject strings captured in bindings
/// and audit entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub subject: String,
    pub eligible_roles: BTreeSet<String>,
}

impl Identity {
    pub fn new(subject: impl Into<String>, eligible_roles: &[&str]) -> Identity {
        Identity {
            subject: subject.into(),
            eligible_roles: eligible_roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    pub fn is_eligible(&self, role: &str) -> bool {
        self.eligible_roles.contains(role)
    }
}
