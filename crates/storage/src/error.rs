/// All errors that can be returned by an `InstanceStore` implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// Optimistic concurrency conflict -- another transition committed
    /// against the instance concurrently and the expected version was
    /// not found.
    #[error("concurrent conflict on instance '{instance_id}': expected version {expected_version}")]
    ConcurrentConflict {
        instance_id: String,
        expected_version: i64,
    },

    /// No instance with the given id.
    #[error("instance not found: '{instance_id}'")]
    InstanceNotFound { instance_id: String },

    /// An instance with this id already exists.
    #[error("instance already exists: '{instance_id}'")]
    AlreadyExists { instance_id: String },

    /// A backend-specific failure (connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}
