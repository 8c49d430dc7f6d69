//! Denied-attempt reporting.
//!
//! Denials are not part of the audit trail: the trail records only
//! transitions that happened. Deployments that want visibility into
//! rejected attempts install a [`DenialSink`]; the engine reports every
//! authorization, state, and validation rejection to it, best-effort,
//! after the typed error is already decided.

use std::collections::BTreeMap;
use std::sync::Mutex;

use accord_core::Value;
use serde::Serialize;

/// One rejected invocation, as reported to a [`DenialSink`].
#[derive(Debug, Clone, Serialize)]
pub struct DeniedAttempt {
    pub instance_id: String,
    pub actor: String,
    pub permission: String,
    pub args: BTreeMap<String, Value>,
    /// Display form of the error the caller received.
    pub reason: String,
    pub timestamp: String,
}

/// Observer for rejected invocations. Implementations must not block
/// the invoking task for long; the engine calls `record` inline on the
/// denial path.
pub trait DenialSink: Send + Sync {
    fn record(&self, attempt: DeniedAttempt);
}

/// A sink that accumulates attempts in memory, for tests and local
/// inspection.
#[derive(Default)]
pub struct MemoryDenialSink {
    attempts: Mutex<Vec<DeniedAttempt>>,
}

impl MemoryDenialSink {
    pub fn new() -> MemoryDenialSink {
        MemoryDenialSink::default()
    }

    pub fn attempts(&self) -> Vec<DeniedAttempt> {
        match self.attempts.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl DenialSink for MemoryDenialSink {
    fn record(&self, attempt: DeniedAttempt) {
        match self.attempts.lock() {
            Ok(mut guard) => guard.push(attempt),
            Err(poisoned) => poisoned.into_inner().push(attempt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_accumulates_in_order() {
        let sink = MemoryDenialSink::new();
        for reason in ["not authorized", "wrong state"] {
            sink.record(DeniedAttempt {
                instance_id: "exp-1".to_string(),
                actor: "mallory".to_string(),
                permission: "approve".to_string(),
                args: BTreeMap::new(),
                reason: reason.to_string(),
                timestamp: "2026-01-01T00:00:00Z".to_string(),
            });
        }
        let attempts = sink.attempts();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].reason, "not authorized");
        assert_eq!(attempts[1].reason, "wrong state");
    }
}
