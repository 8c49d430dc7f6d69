//! Engine error taxonomy.
//!
//! Every failure is a typed result returned to the caller; no error
//! path mutates persisted state or the audit trail. `Oracle`,
//! `Concurrency`, and backend `Storage` failures are transient and
//! worth retrying; `Authorization`, `State`, and `Validation` are not
//! retryable without a change of caller, state, or input; `Definition`
//! is fatal to protocol registration.

use std::fmt;

use accord_core::DefinitionError;
use accord_storage::StorageError;

use crate::eval::EvalFailure;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed protocol, caught at registration (or the unreachable
    /// unknown-permission case at invocation).
    Definition(DefinitionError),
    /// A protocol with this id is already registered.
    ProtocolExists { protocol_id: String },
    /// No protocol registered under this id.
    UnknownProtocol { protocol_id: String },
    /// No instance with this id.
    UnknownInstance { instance_id: String },
    /// The caller holds no eligible, bindable role for the permission.
    /// Raised before the state check so an unauthorized caller cannot
    /// learn the instance's current state from the error.
    Authorization { permission: String, actor: String },
    /// The instance is not in one of the permission's source states.
    State {
        permission: String,
        required: Vec<String>,
        actual: String,
    },
    /// A guard predicate (or argument/effect check) failed.
    Validation { check: String, message: String },
    /// An external lookup failed or timed out.
    Oracle { name: String, message: String },
    /// A conflicting transition committed concurrently on the same
    /// instance.
    Concurrency { instance_id: String },
    /// A backend storage failure distinct from an OCC conflict.
    Storage { message: String },
}

impl EngineError {
    /// Whether the caller may retry the same invocation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Oracle { .. }
                | EngineError::Concurrency { .. }
                | EngineError::Storage { .. }
        )
    }

    /// Map an evaluation failure at check site `check`: oracle failures
    /// keep their own variant, everything else is a validation failure
    /// carrying the interpreter's message.
    pub(crate) fn from_eval(check: &str, failure: EvalFailure) -> EngineError {
        match failure {
            EvalFailure::Oracle { name, message } => EngineError::Oracle { name, message },
            other => EngineError::Validation {
                check: check.to_string(),
                message: other.to_string(),
            },
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Definition(err) => write!(f, "{}", err),
            EngineError::ProtocolExists { protocol_id } => {
                write!(f, "protocol '{}' is already registered", protocol_id)
            }
            EngineError::UnknownProtocol { protocol_id } => {
                write!(f, "unknown protocol '{}'", protocol_id)
            }
            EngineError::UnknownInstance { instance_id } => {
                write!(f, "unknown instance '{}'", instance_id)
            }
            EngineError::Authorization { permission, actor } => {
                write!(f, "'{}' is not authorized to invoke '{}'", actor, permission)
            }
            EngineError::State {
                permission,
                required,
                actual,
            } => {
                write!(
                    f,
                    "'{}' requires one of {{{}}}, found {}",
                    permission,
                    required.join(", "),
                    actual
                )
            }
            EngineError::Validation { check, message } => {
                write!(f, "check '{}' failed: {}", check, message)
            }
            EngineError::Oracle { name, message } => {
                write!(f, "oracle '{}' failed: {}", name, message)
            }
            EngineError::Concurrency { instance_id } => {
                write!(
                    f,
                    "conflicting concurrent transition on instance '{}'",
                    instance_id
                )
            }
            EngineError::Storage { message } => write!(f, "storage backend error: {}", message),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<DefinitionError> for EngineError {
    fn from(err: DefinitionError) -> Self {
        EngineError::Definition(err)
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ConcurrentConflict { instance_id, .. } => {
                EngineError::Concurrency { instance_id }
            }
            StorageError::InstanceNotFound { instance_id } => {
                EngineError::UnknownInstance { instance_id }
            }
            other => EngineError::Storage {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(EngineError::Concurrency {
            instance_id: "i".into()
        }
        .is_retryable());
        assert!(EngineError::Oracle {
            name: "budget".into(),
            message: "timed out".into()
        }
        .is_retryable());
        assert!(!EngineError::Authorization {
            permission: "approve".into(),
            actor: "alice".into()
        }
        .is_retryable());
        assert!(!EngineError::Validation {
            check: "approval_limit".into(),
            message: "amount exceeds approval limit".into()
        }
        .is_retryable());
    }

    #[test]
    fn state_error_names_required_set() {
        let err = EngineError::State {
            permission: "approve".into(),
            required: vec!["submitted".into()],
            actual: "draft".into(),
        };
        assert_eq!(
            err.to_string(),
            "'approve' requires one of {submitted}, found draft"
        );
    }

    #[test]
    fn occ_conflict_maps_to_concurrency() {
        let err: EngineError = StorageError::ConcurrentConflict {
            instance_id: "exp-1".into(),
            expected_version: 3,
        }
        .into();
        assert_eq!(
            err,
            EngineError::Concurrency {
                instance_id: "exp-1".into()
            }
        );
    }
}
