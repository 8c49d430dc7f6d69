//! accord-storage: durable storage for workflow instances.
//!
//! Defines the [`InstanceStore`] trait that accord execution backends
//! implement, the record types it persists, the [`MemoryStore`]
//! reference backend, and a backend-agnostic [`conformance`] suite.
//!
//! The trait's contract carries the engine's two load-bearing
//! guarantees: optimistic concurrency control on the instance version
//! (single writer per instance) and atomic coupling of the state
//! update with its audit entry (no transition without an audit record,
//! no audit record without a transition).

pub mod conformance;
mod error;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use memory::MemoryStore;
pub use record::{AuditEntryRecord, InstanceRecord};
pub use traits::InstanceStore;
