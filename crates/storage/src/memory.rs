//! In-memory reference backend.
//!
//! Committed state lives behind a single mutex; a snapshot buffers its
//! writes and applies them under the lock at commit, re-validating
//! every OCC precondition first. Commit is therefore atomic and reads
//! never observe a half-applied transition.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{AuditEntryRecord, InstanceRecord};
use crate::traits::InstanceStore;

#[derive(Default)]
struct Committed {
    instances: BTreeMap<String, InstanceRecord>,
    audit: BTreeMap<String, Vec<AuditEntryRecord>>,
}

/// Buffered writes of one in-progress transaction. Dropping the
/// snapshot without committing discards them.
pub struct MemorySnapshot {
    creates: Vec<InstanceRecord>,
    updates: Vec<(InstanceRecord, i64)>,
    audit: Vec<AuditEntryRecord>,
}

/// In-memory `InstanceStore`. Suitable for tests and single-process
/// deployments that do not need durability across restarts.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Committed>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Committed>, StorageError> {
        self.inner
            .lock()
            .map_err(|_| StorageError::Backend("memory store lock poisoned".to_string()))
    }
}

/// Check every staged precondition against committed state.
fn check_preconditions(
    committed: &Committed,
    snapshot: &MemorySnapshot,
) -> Result<(), StorageError> {
    for record in &snapshot.creates {
        if committed.instances.contains_key(&record.instance_id) {
            return Err(StorageError::AlreadyExists {
                instance_id: record.instance_id.clone(),
            });
        }
    }
    for (record, expected_version) in &snapshot.updates {
        match committed.instances.get(&record.instance_id) {
            None => {
                return Err(StorageError::InstanceNotFound {
                    instance_id: record.instance_id.clone(),
                });
            }
            Some(current) if current.version != *expected_version => {
                return Err(StorageError::ConcurrentConflict {
                    instance_id: record.instance_id.clone(),
                    expected_version: *expected_version,
                });
            }
            Some(_) => {}
        }
    }
    Ok(())
}

#[async_trait]
impl InstanceStore for MemoryStore {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
        Ok(MemorySnapshot {
            creates: Vec::new(),
            updates: Vec::new(),
            audit: Vec::new(),
        })
    }

    async fn commit_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        let mut committed = self.lock()?;
        // All-or-nothing: validate everything before applying anything.
        check_preconditions(&committed, &snapshot)?;
        for record in snapshot.creates {
            committed.audit.entry(record.instance_id.clone()).or_default();
            committed.instances.insert(record.instance_id.clone(), record);
        }
        for (record, _) in snapshot.updates {
            committed.instances.insert(record.instance_id.clone(), record);
        }
        for entry in snapshot.audit {
            committed
                .audit
                .entry(entry.instance_id.clone())
                .or_default()
                .push(entry);
        }
        Ok(())
    }

    async fn abort_snapshot(&self, _snapshot: MemorySnapshot) -> Result<(), StorageError> {
        Ok(())
    }

    async fn create_instance(
        &self,
        snapshot: &mut MemorySnapshot,
        record: InstanceRecord,
    ) -> Result<(), StorageError> {
        let committed = self.lock()?;
        let staged = snapshot
            .creates
            .iter()
            .any(|r| r.instance_id == record.instance_id);
        if staged || committed.instances.contains_key(&record.instance_id) {
            return Err(StorageError::AlreadyExists {
                instance_id: record.instance_id,
            });
        }
        drop(committed);
        snapshot.creates.push(record);
        Ok(())
    }

    async fn instance_for_update(
        &self,
        _snapshot: &mut MemorySnapshot,
        instance_id: &str,
    ) -> Result<InstanceRecord, StorageError> {
        let committed = self.lock()?;
        committed
            .instances
            .get(instance_id)
            .cloned()
            .ok_or_else(|| StorageError::InstanceNotFound {
                instance_id: instance_id.to_string(),
            })
    }

    async fn update_instance(
        &self,
        snapshot: &mut MemorySnapshot,
        record: InstanceRecord,
        expected_version: i64,
    ) -> Result<i64, StorageError> {
        if record.version != expected_version + 1 {
            return Err(StorageError::Backend(format!(
                "update for instance '{}' must carry version {}, got {}",
                record.instance_id,
                expected_version + 1,
                record.version
            )));
        }
        let committed = self.lock()?;
        match committed.instances.get(&record.instance_id) {
            None => {
                return Err(StorageError::InstanceNotFound {
                    instance_id: record.instance_id,
                });
            }
            Some(current) if current.version != expected_version => {
                return Err(StorageError::ConcurrentConflict {
                    instance_id: record.instance_id,
                    expected_version,
                });
            }
            Some(_) => {}
        }
        drop(committed);
        let new_version = record.version;
        snapshot.updates.push((record, expected_version));
        Ok(new_version)
    }

    async fn append_audit_entry(
        &self,
        snapshot: &mut MemorySnapshot,
        entry: AuditEntryRecord,
    ) -> Result<(), StorageError> {
        snapshot.audit.push(entry);
        Ok(())
    }

    async fn instance(&self, instance_id: &str) -> Result<InstanceRecord, StorageError> {
        let committed = self.lock()?;
        committed
            .instances
            .get(instance_id)
            .cloned()
            .ok_or_else(|| StorageError::InstanceNotFound {
                instance_id: instance_id.to_string(),
            })
    }

    async fn audit_trail(&self, instance_id: &str) -> Result<Vec<AuditEntryRecord>, StorageError> {
        let committed = self.lock()?;
        committed
            .audit
            .get(instance_id)
            .cloned()
            .ok_or_else(|| StorageError::InstanceNotFound {
                instance_id: instance_id.to_string(),
            })
    }
}
