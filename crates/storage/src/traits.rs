use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{AuditEntryRecord, InstanceRecord};

/// The storage trait for accord execution backends.
///
/// An `InstanceStore` implementation provides durable, transactional
/// storage for workflow instances and their audit trails.
///
/// ## Snapshot semantics
///
/// All mutating operations take `&mut Self::Snapshot`, a type
/// representing an in-progress transaction:
///
/// 1. `begin_snapshot()` -- start a transaction
/// 2. call mutating methods with `&mut snapshot`
/// 3. `commit_snapshot(snapshot)` -- commit and consume,
///    OR `abort_snapshot(snapshot)` -- roll back and consume
///
/// A `Snapshot` dropped without committing MUST roll back.
///
/// ## OCC conflict detection
///
/// `update_instance` is conditional on the committed version matching
/// `expected_version` (`UPDATE WHERE version = expected_version`
/// semantics). On mismatch the store returns
/// `Err(StorageError::ConcurrentConflict { .. })` -- either at the call
/// or, at the latest, at commit. This is what enforces the
/// single-writer-per-instance discipline.
///
/// ## Audit coupling
///
/// `append_audit_entry` MUST be called in the same snapshot as the
/// `update_instance` it describes. A conforming backend makes the two
/// visible atomically: no state change without its audit entry.
///
/// ## Read consistency
///
/// `instance` and `audit_trail` never block on in-flight snapshots and
/// return either the pre- or post-commit record, never a torn one.
#[async_trait]
pub trait InstanceStore: Send + Sync + 'static {
    /// The snapshot (transaction) type used by this backend.
    type Snapshot: Send;

    // ── Snapshot lifecycle ────────────────────────────────────────────

    /// Begin a new snapshot (transaction).
    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    /// Commit a snapshot, making all staged mutations durable.
    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    /// Abort (roll back) a snapshot, discarding all staged mutations.
    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    // ── Mutations (within snapshot) ───────────────────────────────────

    /// Stage creation of a new instance at version 0.
    ///
    /// Returns `Err(StorageError::AlreadyExists)` if an instance with
    /// this id exists.
    async fn create_instance(
        &self,
        snapshot: &mut Self::Snapshot,
        record: InstanceRecord,
    ) -> Result<(), StorageError>;

    /// Read an instance's current committed record for update.
    ///
    /// Returns `Err(StorageError::InstanceNotFound)` if the instance
    /// does not exist.
    async fn instance_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        instance_id: &str,
    ) -> Result<InstanceRecord, StorageError>;

    /// Stage a version-validated replacement of an instance record.
    ///
    /// `record.version` must be `expected_version + 1`. If the
    /// committed version no longer equals `expected_version`, returns
    /// `Err(StorageError::ConcurrentConflict)`.
    ///
    /// Returns the new version on success.
    async fn update_instance(
        &self,
        snapshot: &mut Self::Snapshot,
        record: InstanceRecord,
        expected_version: i64,
    ) -> Result<i64, StorageError>;

    /// Stage an audit entry. Must share the snapshot with the
    /// `update_instance` call it describes.
    async fn append_audit_entry(
        &self,
        snapshot: &mut Self::Snapshot,
        entry: AuditEntryRecord,
    ) -> Result<(), StorageError>;

    // ── Reads (outside snapshot) ──────────────────────────────────────

    /// Read an instance's committed record without locking.
    async fn instance(&self, instance_id: &str) -> Result<InstanceRecord, StorageError>;

    /// Read an instance's committed audit trail, ordered by sequence.
    ///
    /// Returns `Err(StorageError::InstanceNotFound)` for an unknown
    /// instance; an existing instance with no transitions yields an
    /// empty trail.
    async fn audit_trail(&self, instance_id: &str) -> Result<Vec<AuditEntryRecord>, StorageError>;
}
