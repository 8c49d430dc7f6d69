//! Conformance test suite for `InstanceStore` implementations.
//!
//! A backend-agnostic suite that any `InstanceStore` can run to verify
//! the contract the engine depends on:
//!
//! - **init**: instance creation, duplicate detection
//! - **snapshot**: uncommitted writes invisible, abort discards
//! - **commit**: all-or-nothing application, audit/state coupling
//! - **version**: OCC conflict detection, version increments
//! - **trail**: ordering and unknown-instance handling
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory that
//! produces a fresh, empty store per test:
//!
//! ```ignore
//! use accord_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn postgres_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_postgres_store().await
//!     }).await;
//!     assert_eq!(report.failed, 0, "{report}");
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

use crate::record::{AuditEntryRecord, InstanceRecord};
use crate::{InstanceStore, StorageError};

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "init", "commit", "version").
    pub category: String,
    /// Test name (e.g. "stale_expected_version_conflicts").
    pub name: String,
    pub passed: bool,
    /// Failure message when `passed` is false.
    pub message: Option<String>,
}

impl TestResult {
    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        let (passed, message) = match result {
            Ok(()) => (true, None),
            Err(msg) => (false, Some(msg)),
        };
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed,
            message,
        }
    }
}

/// Aggregated report from a full suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for result in &self.results {
            if !result.passed {
                writeln!(
                    f,
                    "  FAIL {}::{} -- {}",
                    result.category,
                    result.name,
                    result.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full suite. `factory` must return a fresh, empty store for
/// every call.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: InstanceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    let cases: &[(&str, &str)] = &[
        ("init", "create_visible_after_commit"),
        ("init", "create_duplicate_rejected"),
        ("init", "create_discarded_after_abort"),
        ("snapshot", "staged_update_invisible_before_commit"),
        ("snapshot", "staged_audit_invisible_before_commit"),
        ("commit", "update_and_audit_coupled_after_commit"),
        ("commit", "update_and_audit_discarded_after_abort"),
        ("commit", "failed_commit_applies_nothing"),
        ("version", "update_increments_version"),
        ("version", "stale_expected_version_conflicts"),
        ("version", "update_unknown_instance_not_found"),
        ("trail", "entries_ordered_by_sequence"),
        ("trail", "unknown_instance_trail_not_found"),
    ];

    for (category, name) in cases {
        let store = factory().await;
        let outcome = match (*category, *name) {
            ("init", "create_visible_after_commit") => create_visible_after_commit(&store).await,
            ("init", "create_duplicate_rejected") => create_duplicate_rejected(&store).await,
            ("init", "create_discarded_after_abort") => create_discarded_after_abort(&store).await,
            ("snapshot", "staged_update_invisible_before_commit") => {
                staged_update_invisible_before_commit(&store).await
            }
            ("snapshot", "staged_audit_invisible_before_commit") => {
                staged_audit_invisible_before_commit(&store).await
            }
            ("commit", "update_and_audit_coupled_after_commit") => {
                update_and_audit_coupled_after_commit(&store).await
            }
            ("commit", "update_and_audit_discarded_after_abort") => {
                update_and_audit_discarded_after_abort(&store).await
            }
            ("commit", "failed_commit_applies_nothing") => {
                failed_commit_applies_nothing(&store).await
            }
            ("version", "update_increments_version") => update_increments_version(&store).await,
            ("version", "stale_expected_version_conflicts") => {
                stale_expected_version_conflicts(&store).await
            }
            ("version", "update_unknown_instance_not_found") => {
                update_unknown_instance_not_found(&store).await
            }
            ("trail", "entries_ordered_by_sequence") => entries_ordered_by_sequence(&store).await,
            ("trail", "unknown_instance_trail_not_found") => {
                unknown_instance_trail_not_found(&store).await
            }
            _ => Err("unknown test case".to_string()),
        };
        results.push(TestResult::from_result(category, name, outcome));
    }

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();
    ConformanceReport {
        passed,
        failed: total - passed,
        total,
        results,
    }
}

// ── Fixtures ──────────────────────────────────────────────────────────

fn make_instance(instance_id: &str, state: &str, version: i64) -> InstanceRecord {
    InstanceRecord {
        instance_id: instance_id.to_string(),
        protocol_id: "conformance".to_string(),
        state: state.to_string(),
        version,
        role_bindings: BTreeMap::new(),
        fields: BTreeMap::new(),
        created_at: "2026-01-01T00:00:00Z".to_string(),
    }
}

fn make_entry(instance_id: &str, sequence: i64, permission: &str) -> AuditEntryRecord {
    AuditEntryRecord {
        instance_id: instance_id.to_string(),
        sequence,
        actor: "alice".to_string(),
        permission: permission.to_string(),
        args: BTreeMap::new(),
        prior_state: "draft".to_string(),
        new_state: "submitted".to_string(),
        timestamp: "2026-01-01T00:00:00Z".to_string(),
        description: format!("{} committed", permission),
    }
}

async fn seed<S: InstanceStore>(store: &S, instance_id: &str) -> Result<(), String> {
    let mut snapshot = store.begin_snapshot().await.map_err(|e| e.to_string())?;
    store
        .create_instance(&mut snapshot, make_instance(instance_id, "draft", 0))
        .await
        .map_err(|e| e.to_string())?;
    store.commit_snapshot(snapshot).await.map_err(|e| e.to_string())
}

// ── init ──────────────────────────────────────────────────────────────

async fn create_visible_after_commit<S: InstanceStore>(store: &S) -> Result<(), String> {
    seed(store, "c-1").await?;
    let got = store.instance("c-1").await.map_err(|e| e.to_string())?;
    if got.version != 0 || got.state != "draft" {
        return Err(format!(
            "expected draft/v0, got {}/v{}",
            got.state, got.version
        ));
    }
    Ok(())
}

async fn create_duplicate_rejected<S: InstanceStore>(store: &S) -> Result<(), String> {
    seed(store, "c-1").await?;
    let mut snapshot = store.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = store
        .create_instance(&mut snapshot, make_instance("c-1", "draft", 0))
        .await;
    let duplicate_rejected = matches!(result, Err(StorageError::AlreadyExists { .. }))
        || matches!(
            store.commit_snapshot(snapshot).await,
            Err(StorageError::AlreadyExists { .. })
        );
    if !duplicate_rejected {
        return Err("duplicate create was accepted".to_string());
    }
    Ok(())
}

async fn create_discarded_after_abort<S: InstanceStore>(store: &S) -> Result<(), String> {
    let mut snapshot = store.begin_snapshot().await.map_err(|e| e.to_string())?;
    store
        .create_instance(&mut snapshot, make_instance("c-1", "draft", 0))
        .await
        .map_err(|e| e.to_string())?;
    store
        .abort_snapshot(snapshot)
        .await
        .map_err(|e| e.to_string())?;
    match store.instance("c-1").await {
        Err(StorageError::InstanceNotFound { .. }) => Ok(()),
        Ok(_) => Err("aborted create became visible".to_string()),
        Err(other) => Err(format!("unexpected error: {}", other)),
    }
}

// ── snapshot isolation ────────────────────────────────────────────────

async fn staged_update_invisible_before_commit<S: InstanceStore>(store: &S) -> Result<(), String> {
    seed(store, "c-1").await?;
    let mut snapshot = store.begin_snapshot().await.map_err(|e| e.to_string())?;
    store
        .update_instance(&mut snapshot, make_instance("c-1", "submitted", 1), 0)
        .await
        .map_err(|e| e.to_string())?;
    let got = store.instance("c-1").await.map_err(|e| e.to_string())?;
    if got.state != "draft" || got.version != 0 {
        return Err(format!(
            "uncommitted update visible: {}/v{}",
            got.state, got.version
        ));
    }
    store.abort_snapshot(snapshot).await.map_err(|e| e.to_string())
}

async fn staged_audit_invisible_before_commit<S: InstanceStore>(store: &S) -> Result<(), String> {
    seed(store, "c-1").await?;
    let mut snapshot = store.begin_snapshot().await.map_err(|e| e.to_string())?;
    store
        .append_audit_entry(&mut snapshot, make_entry("c-1", 1, "submit"))
        .await
        .map_err(|e| e.to_string())?;
    let trail = store.audit_trail("c-1").await.map_err(|e| e.to_string())?;
    if !trail.is_empty() {
        return Err(format!("uncommitted audit entry visible ({})", trail.len()));
    }
    store.abort_snapshot(snapshot).await.map_err(|e| e.to_string())
}

// ── commit ────────────────────────────────────────────────────────────

async fn transition<S: InstanceStore>(
    store: &S,
    instance_id: &str,
    from_version: i64,
    to_state: &str,
    permission: &str,
) -> Result<(), StorageError> {
    let mut snapshot = store.begin_snapshot().await?;
    store
        .update_instance(
            &mut snapshot,
            make_instance(instance_id, to_state, from_version + 1),
            from_version,
        )
        .await?;
    store
        .append_audit_entry(
            &mut snapshot,
            make_entry(instance_id, from_version + 1, permission),
        )
        .await?;
    store.commit_snapshot(snapshot).await
}

async fn update_and_audit_coupled_after_commit<S: InstanceStore>(store: &S) -> Result<(), String> {
    seed(store, "c-1").await?;
    transition(store, "c-1", 0, "submitted", "submit")
        .await
        .map_err(|e| e.to_string())?;
    let got = store.instance("c-1").await.map_err(|e| e.to_string())?;
    let trail = store.audit_trail("c-1").await.map_err(|e| e.to_string())?;
    if got.state != "submitted" || got.version != 1 {
        return Err(format!("state not updated: {}/v{}", got.state, got.version));
    }
    if trail.len() != 1 || trail[0].sequence != 1 {
        return Err(format!("expected one entry at sequence 1, got {:?}", trail));
    }
    Ok(())
}

async fn update_and_audit_discarded_after_abort<S: InstanceStore>(store: &S) -> Result<(), String> {
    seed(store, "c-1").await?;
    let mut snapshot = store.begin_snapshot().await.map_err(|e| e.to_string())?;
    store
        .update_instance(&mut snapshot, make_instance("c-1", "submitted", 1), 0)
        .await
        .map_err(|e| e.to_string())?;
    store
        .append_audit_entry(&mut snapshot, make_entry("c-1", 1, "submit"))
        .await
        .map_err(|e| e.to_string())?;
    store
        .abort_snapshot(snapshot)
        .await
        .map_err(|e| e.to_string())?;

    let got = store.instance("c-1").await.map_err(|e| e.to_string())?;
    let trail = store.audit_trail("c-1").await.map_err(|e| e.to_string())?;
    if got.version != 0 || !trail.is_empty() {
        return Err("aborted snapshot left visible writes".to_string());
    }
    Ok(())
}

async fn failed_commit_applies_nothing<S: InstanceStore>(store: &S) -> Result<(), String> {
    seed(store, "c-1").await?;
    // Move the instance to version 1 behind the snapshot's back.
    transition(store, "c-1", 0, "submitted", "submit")
        .await
        .map_err(|e| e.to_string())?;

    let mut snapshot = store.begin_snapshot().await.map_err(|e| e.to_string())?;
    let staged = store
        .update_instance(&mut snapshot, make_instance("c-1", "approved", 1), 0)
        .await;
    match staged {
        Err(StorageError::ConcurrentConflict { .. }) => {
            // Conflict surfaced at staging time; nothing to commit.
            let _ = store.abort_snapshot(snapshot).await;
        }
        Err(other) => return Err(format!("unexpected error: {}", other)),
        Ok(_) => {
            store
                .append_audit_entry(&mut snapshot, make_entry("c-1", 1, "approve"))
                .await
                .map_err(|e| e.to_string())?;
            match store.commit_snapshot(snapshot).await {
                Err(StorageError::ConcurrentConflict { .. }) => {}
                Err(other) => return Err(format!("unexpected error: {}", other)),
                Ok(()) => return Err("stale update committed".to_string()),
            }
        }
    }

    let got = store.instance("c-1").await.map_err(|e| e.to_string())?;
    let trail = store.audit_trail("c-1").await.map_err(|e| e.to_string())?;
    if got.state != "submitted" || got.version != 1 || trail.len() != 1 {
        return Err("failed commit left partial writes".to_string());
    }
    Ok(())
}

// ── version / OCC ─────────────────────────────────────────────────────

async fn update_increments_version<S: InstanceStore>(store: &S) -> Result<(), String> {
    seed(store, "c-1").await?;
    transition(store, "c-1", 0, "submitted", "submit")
        .await
        .map_err(|e| e.to_string())?;
    transition(store, "c-1", 1, "approved", "approve")
        .await
        .map_err(|e| e.to_string())?;
    let got = store.instance("c-1").await.map_err(|e| e.to_string())?;
    if got.version != 2 {
        return Err(format!("expected version 2, got {}", got.version));
    }
    Ok(())
}

async fn stale_expected_version_conflicts<S: InstanceStore>(store: &S) -> Result<(), String> {
    seed(store, "c-1").await?;
    transition(store, "c-1", 0, "submitted", "submit")
        .await
        .map_err(|e| e.to_string())?;
    match transition(store, "c-1", 0, "approved", "approve").await {
        Err(StorageError::ConcurrentConflict {
            instance_id,
            expected_version,
        }) => {
            if instance_id != "c-1" || expected_version != 0 {
                return Err(format!(
                    "conflict carries wrong context: {}/{}",
                    instance_id, expected_version
                ));
            }
            Ok(())
        }
        Err(other) => Err(format!("unexpected error: {}", other)),
        Ok(()) => Err("stale update accepted".to_string()),
    }
}

async fn update_unknown_instance_not_found<S: InstanceStore>(store: &S) -> Result<(), String> {
    match transition(store, "ghost", 0, "submitted", "submit").await {
        Err(StorageError::InstanceNotFound { instance_id }) if instance_id == "ghost" => Ok(()),
        Err(other) => Err(format!("unexpected error: {}", other)),
        Ok(()) => Err("update of unknown instance accepted".to_string()),
    }
}

// ── trail ─────────────────────────────────────────────────────────────

async fn entries_ordered_by_sequence<S: InstanceStore>(store: &S) -> Result<(), String> {
    seed(store, "c-1").await?;
    transition(store, "c-1", 0, "submitted", "submit")
        .await
        .map_err(|e| e.to_string())?;
    transition(store, "c-1", 1, "approved", "approve")
        .await
        .map_err(|e| e.to_string())?;
    transition(store, "c-1", 2, "paid", "process_payment")
        .await
        .map_err(|e| e.to_string())?;

    let trail = store.audit_trail("c-1").await.map_err(|e| e.to_string())?;
    let sequences: Vec<i64> = trail.iter().map(|e| e.sequence).collect();
    if sequences != vec![1, 2, 3] {
        return Err(format!("expected sequences [1, 2, 3], got {:?}", sequences));
    }
    let permissions: Vec<&str> = trail.iter().map(|e| e.permission.as_str()).collect();
    if permissions != vec!["submit", "approve", "process_payment"] {
        return Err(format!("entries out of order: {:?}", permissions));
    }
    Ok(())
}

async fn unknown_instance_trail_not_found<S: InstanceStore>(store: &S) -> Result<(), String> {
    match store.audit_trail("ghost").await {
        Err(StorageError::InstanceNotFound { .. }) => Ok(()),
        Ok(_) => Err("trail returned for unknown instance".to_string()),
        Err(other) => Err(format!("unexpected error: {}", other)),
    }
}
