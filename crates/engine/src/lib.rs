//! accord-engine: authorization-gated state-machine execution.
//!
//! The engine owns the one path by which a workflow instance can
//! change: a caller asks to invoke a permission, the evaluator checks
//! -- in a fixed order -- that the permission exists, that the caller
//! holds (or resolves to) an allowed role, that the instance is in an
//! allowed state, and that every guard predicate passes; only then does
//! the executor run the permission's effects and commit the field
//! changes, the state change, and exactly one audit entry as a single
//! storage snapshot. There is no code path that mutates an instance
//! without producing an audit entry.
//!
//! Collaborators are injected: a [`PartyResolver`] turns role names
//! into identities, an [`OracleRegistry`] answers external lookups from
//! guards under a configured timeout, an
//! [`InstanceStore`](accord_storage::InstanceStore) persists instances
//! and trails, and an optional [`DenialSink`] observes rejected
//! attempts.

mod engine;
mod error;
mod eval;
mod evaluate;
mod execute;
mod identity;
mod oracle;
mod party;
mod sink;

pub use engine::{Engine, EngineConfig, InstanceStatus, ProtocolHandle};
pub use error::EngineError;
pub use evaluate::EvaluationResult;
pub use execute::TransitionOutcome;
pub use identity::Identity;
pub use oracle::{FnOracle, Oracle, OracleFailure, OracleRegistry, StaticOracle};
pub use party::{PartyResolver, ResolveError, StaticPartyResolver};
pub use sink::{DeniedAttempt, DenialSink, MemoryDenialSink};

/// RFC 3339 timestamp for records and denial reports.
pub(crate) fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}
