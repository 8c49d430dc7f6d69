use std::collections::BTreeMap;

use accord_core::Value;
use serde::{Deserialize, Serialize};

/// Durable snapshot of one workflow instance.
///
/// Mutated only through `InstanceStore::update_instance` inside a
/// committed snapshot; never deleted (a terminal state is a logical
/// end, not physical deletion).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub instance_id: String,
    pub protocol_id: String,
    /// Current state name.
    pub state: String,
    /// Transition sequence number: 0 at creation, incremented by
    /// exactly one per committed transition. Doubles as the OCC token.
    pub version: i64,
    /// role name -> bound subject. Grows over time; an existing
    /// binding is replaced only by an explicit rebind effect.
    pub role_bindings: BTreeMap<String, String>,
    pub fields: BTreeMap<String, Value>,
    /// RFC 3339 timestamp string.
    pub created_at: String,
}

/// One committed transition. Immutable once written; ordered by
/// `sequence` within an instance, gap-free from 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntryRecord {
    pub instance_id: String,
    /// Equals the instance version the commit produced.
    pub sequence: i64,
    /// Subject of the acting identity.
    pub actor: String,
    pub permission: String,
    /// Invocation arguments, kept so a trail can be replayed from the
    /// record alone.
    pub args: BTreeMap<String, Value>,
    pub prior_state: String,
    pub new_state: String,
    /// RFC 3339 timestamp string.
    pub timestamp: String,
    /// Human-readable result, including the rendered return value when
    /// the permission produced one.
    pub description: String,
}
