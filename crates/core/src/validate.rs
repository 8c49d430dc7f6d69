//! Eager structural validation of protocol definitions.
//!
//! Every invariant here is checked before a protocol is registered,
//! so a definition that would misbehave at runtime is rejected before
//! any instance of it can exist. This is the load-time approximation
//! of a compile-time protocol check: unknown names, dead permissions,
//! and malformed state graphs never reach live workflow execution.

use std::collections::HashSet;

use crate::expr::Expr;
use crate::protocol::{Effect, PermissionSpec, Protocol, SourceStates};

/// A structural violation in a protocol definition. Fatal to
/// registration: a protocol that fails validation can never produce an
/// instance.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    #[error("protocol '{protocol}' declares no states")]
    NoStates { protocol: String },

    #[error("protocol '{protocol}' declares duplicate role '{role}'")]
    DuplicateRole { protocol: String, role: String },

    #[error("protocol '{protocol}' declares duplicate state '{state}'")]
    DuplicateState { protocol: String, state: String },

    #[error("protocol '{protocol}' declares duplicate permission '{permission}'")]
    DuplicatePermission { protocol: String, permission: String },

    #[error("protocol '{protocol}' must declare exactly one initial state, found {found}")]
    InitialStateCount { protocol: String, found: usize },

    #[error("initial state '{state}' of protocol '{protocol}' may not be terminal")]
    InitialStateTerminal { protocol: String, state: String },

    #[error("permission '{permission}' has no allowed roles and can never be invoked")]
    NoAllowedRoles { permission: String },

    #[error("permission '{permission}' references undeclared role '{role}'")]
    UnknownRole { permission: String, role: String },

    #[error("permission '{permission}' references undeclared state '{state}'")]
    UnknownState { permission: String, state: String },

    #[error("permission '{permission}' has an empty source-state set and can never be invoked")]
    EmptySourceStates { permission: String },

    #[error("permission '{permission}' lists terminal state '{state}' as a source state")]
    TerminalSourceState { permission: String, state: String },

    #[error("permission '{permission}' declares duplicate guard '{guard}'")]
    DuplicateGuard { permission: String, guard: String },

    #[error("permission '{permission}' declares duplicate parameter '{param}'")]
    DuplicateParam { permission: String, param: String },

    #[error("permission '{permission}' references undeclared parameter '{param}'")]
    UnknownParam { permission: String, param: String },

    #[error("protocol '{protocol}' has no permission named '{permission}'")]
    UnknownPermission {
        protocol: String,
        permission: String,
    },
}

/// Validate a protocol's structural invariants. Returns the first
/// violation found, in declaration order.
pub fn validate(protocol: &Protocol) -> Result<(), DefinitionError> {
    if protocol.states.is_empty() {
        return Err(DefinitionError::NoStates {
            protocol: protocol.id.clone(),
        });
    }

    let mut seen_roles: HashSet<&str> = HashSet::new();
    for role in &protocol.roles {
        if !seen_roles.insert(role.as_str()) {
            return Err(DefinitionError::DuplicateRole {
                protocol: protocol.id.clone(),
                role: role.clone(),
            });
        }
    }

    let mut seen_states: HashSet<&str> = HashSet::new();
    for state in &protocol.states {
        if !seen_states.insert(state.name.as_str()) {
            return Err(DefinitionError::DuplicateState {
                protocol: protocol.id.clone(),
                state: state.name.clone(),
            });
        }
    }

    let initial: Vec<_> = protocol.states.iter().filter(|s| s.initial).collect();
    if initial.len() != 1 {
        return Err(DefinitionError::InitialStateCount {
            protocol: protocol.id.clone(),
            found: initial.len(),
        });
    }
    if initial[0].terminal {
        return Err(DefinitionError::InitialStateTerminal {
            protocol: protocol.id.clone(),
            state: initial[0].name.clone(),
        });
    }

    let mut seen_permissions: HashSet<&str> = HashSet::new();
    for permission in &protocol.permissions {
        if !seen_permissions.insert(permission.name.as_str()) {
            return Err(DefinitionError::DuplicatePermission {
                protocol: protocol.id.clone(),
                permission: permission.name.clone(),
            });
        }
        validate_permission(protocol, permission)?;
    }

    Ok(())
}

fn validate_permission(
    protocol: &Protocol,
    permission: &PermissionSpec,
) -> Result<(), DefinitionError> {
    if permission.allowed_roles.is_empty() {
        return Err(DefinitionError::NoAllowedRoles {
            permission: permission.name.clone(),
        });
    }
    for role in &permission.allowed_roles {
        if !protocol.has_role(role) {
            return Err(DefinitionError::UnknownRole {
                permission: permission.name.clone(),
                role: role.clone(),
            });
        }
    }

    if let SourceStates::Of(states) = &permission.source_states {
        if states.is_empty() {
            return Err(DefinitionError::EmptySourceStates {
                permission: permission.name.clone(),
            });
        }
        for state in states {
            match protocol.state_def(state) {
                None => {
                    return Err(DefinitionError::UnknownState {
                        permission: permission.name.clone(),
                        state: state.clone(),
                    });
                }
                Some(def) if def.terminal => {
                    return Err(DefinitionError::TerminalSourceState {
                        permission: permission.name.clone(),
                        state: state.clone(),
                    });
                }
                Some(_) => {}
            }
        }
    }

    if let Some(target) = &permission.target_state {
        if protocol.state_def(target).is_none() {
            return Err(DefinitionError::UnknownState {
                permission: permission.name.clone(),
                state: target.clone(),
            });
        }
    }

    let mut seen_params: HashSet<&str> = HashSet::new();
    for param in &permission.params {
        if !seen_params.insert(param.as_str()) {
            return Err(DefinitionError::DuplicateParam {
                permission: permission.name.clone(),
                param: param.clone(),
            });
        }
    }

    let mut seen_guards: HashSet<&str> = HashSet::new();
    for guard in &permission.guards {
        if !seen_guards.insert(guard.name.as_str()) {
            return Err(DefinitionError::DuplicateGuard {
                permission: permission.name.clone(),
                guard: guard.name.clone(),
            });
        }
    }

    for effect in &permission.effects {
        if let Effect::BindRole { role, .. } = effect {
            if !protocol.has_role(role) {
                return Err(DefinitionError::UnknownRole {
                    permission: permission.name.clone(),
                    role: role.clone(),
                });
            }
        }
    }

    // Reference checking inside expression trees: args must be declared
    // parameters, parties must be declared roles. Oracle names are
    // deployment-supplied and resolve at invocation time.
    for guard in &permission.guards {
        validate_expr(protocol, permission, &guard.predicate)?;
    }
    for effect in &permission.effects {
        if let Effect::SetField { value, .. } = effect {
            validate_expr(protocol, permission, value)?;
        }
    }
    if let Some(returns) = &permission.returns {
        validate_expr(protocol, permission, returns)?;
    }

    Ok(())
}

fn validate_expr(
    protocol: &Protocol,
    permission: &PermissionSpec,
    expr: &Expr,
) -> Result<(), DefinitionError> {
    let mut violation: Option<DefinitionError> = None;
    expr.visit(&mut |node| {
        if violation.is_some() {
            return;
        }
        match node {
            Expr::Arg(name) if !permission.params.iter().any(|p| p == name) => {
                violation = Some(DefinitionError::UnknownParam {
                    permission: permission.name.clone(),
                    param: name.clone(),
                });
            }
            Expr::Party(role) if !protocol.has_role(role) => {
                violation = Some(DefinitionError::UnknownRole {
                    permission: permission.name.clone(),
                    role: role.clone(),
                });
            }
            _ => {}
        }
    });
    match violation {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
