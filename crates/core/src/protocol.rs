//! Protocol definitions: roles, states, and permissions.

use serde::{Deserialize, Serialize};

use crate::expr::Expr;

/// A workflow state declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDef {
    pub name: String,
    /// Instances start here. Exactly one state per protocol is initial.
    pub initial: bool,
    /// A logical end: terminal states may not appear in any
    /// permission's source-state set.
    pub terminal: bool,
}

impl StateDef {
    pub fn new(name: impl Into<String>) -> StateDef {
        StateDef {
            name: name.into(),
            initial: false,
            terminal: false,
        }
    }

    pub fn initial(name: impl Into<String>) -> StateDef {
        StateDef {
            name: name.into(),
            initial: true,
            terminal: false,
        }
    }

    pub fn terminal(name: impl Into<String>) -> StateDef {
        StateDef {
            name: name.into(),
            initial: false,
            terminal: true,
        }
    }
}

/// The states a permission may be invoked from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceStates {
    /// State-independent: invocable from every state, terminal included.
    Any,
    /// Invocable only from the listed states. Non-empty, no terminals.
    Of(Vec<String>),
}

impl SourceStates {
    pub fn allows(&self, state: &str) -> bool {
        match self {
            SourceStates::Any => true,
            SourceStates::Of(states) => states.iter().any(|s| s == state),
        }
    }
}

/// A named guard predicate. Guards run in declaration order and the
/// first failure aborts the invocation with the guard's message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guard {
    pub name: String,
    /// Human-readable reason reported when the predicate is false.
    pub message: String,
    pub predicate: Expr,
}

/// One step of a permission's effect body, applied in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Effect {
    /// Set an instance field to the value of `value`, evaluated against
    /// the fields as already updated by earlier effects.
    SetField { field: String, value: Expr },
    /// Bind a role through the injected party resolver. With
    /// `rebind: false` an existing binding is kept untouched; with
    /// `rebind: true` the role is re-resolved and replaced.
    BindRole { role: String, rebind: bool },
}

/// A role-restricted, state-restricted, guard-gated operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionSpec {
    pub name: String,
    /// Roles whose bound (or resolvable) subject may invoke this
    /// permission. Non-empty.
    pub allowed_roles: Vec<String>,
    pub source_states: SourceStates,
    /// Declared parameter names; invocation arguments must match
    /// exactly, and `Expr::Arg` may only reference these.
    pub params: Vec<String>,
    pub guards: Vec<Guard>,
    pub effects: Vec<Effect>,
    /// State the instance moves to on commit. `None` leaves the state
    /// unchanged.
    pub target_state: Option<String>,
    /// Optional return value, evaluated after all effects against the
    /// updated fields.
    pub returns: Option<Expr>,
}

impl PermissionSpec {
    pub fn new(name: impl Into<String>, allowed_roles: &[&str]) -> PermissionSpec {
        PermissionSpec {
            name: name.into(),
            allowed_roles: allowed_roles.iter().map(|r| r.to_string()).collect(),
            source_states: SourceStates::Any,
            params: Vec::new(),
            guards: Vec::new(),
            effects: Vec::new(),
            target_state: None,
            returns: None,
        }
    }

    pub fn from_states(mut self, states: &[&str]) -> Self {
        self.source_states = SourceStates::Of(states.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn any_state(mut self) -> Self {
        self.source_states = SourceStates::Any;
        self
    }

    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(name.into());
        self
    }

    pub fn guard(
        mut self,
        name: impl Into<String>,
        message: impl Into<String>,
        predicate: Expr,
    ) -> Self {
        self.guards.push(Guard {
            name: name.into(),
            message: message.into(),
            predicate,
        });
        self
    }

    pub fn set_field(mut self, field: impl Into<String>, value: Expr) -> Self {
        self.effects.push(Effect::SetField {
            field: field.into(),
            value,
        });
        self
    }

    pub fn bind_role(mut self, role: impl Into<String>) -> Self {
        self.effects.push(Effect::BindRole {
            role: role.into(),
            rebind: false,
        });
        self
    }

    pub fn rebind_role(mut self, role: impl Into<String>) -> Self {
        self.effects.push(Effect::BindRole {
            role: role.into(),
            rebind: true,
        });
        self
    }

    pub fn to_state(mut self, state: impl Into<String>) -> Self {
        self.target_state = Some(state.into());
        self
    }

    pub fn returns(mut self, expr: Expr) -> Self {
        self.returns = Some(expr);
        self
    }
}

/// A complete protocol definition. Static: no runtime data.
///
/// A `Protocol` must pass [`crate::validate`] before any instance of it
/// can exist; the engine enforces this at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
    pub id: String,
    pub roles: Vec<String>,
    pub states: Vec<StateDef>,
    pub permissions: Vec<PermissionSpec>,
}

impl Protocol {
    pub fn new(id: impl Into<String>) -> Protocol {
        Protocol {
            id: id.into(),
            roles: Vec::new(),
            states: Vec::new(),
            permissions: Vec::new(),
        }
    }

    pub fn role(mut self, name: impl Into<String>) -> Self {
        self.roles.push(name.into());
        self
    }

    pub fn state(mut self, state: StateDef) -> Self {
        self.states.push(state);
        self
    }

    pub fn permission(mut self, permission: PermissionSpec) -> Self {
        self.permissions.push(permission);
        self
    }

    pub fn has_role(&self, name: &str) -> bool {
        self.roles.iter().any(|r| r == name)
    }

    pub fn state_def(&self, name: &str) -> Option<&StateDef> {
        self.states.iter().find(|s| s.name == name)
    }

    pub fn permission_spec(&self, name: &str) -> Option<&PermissionSpec> {
        self.permissions.iter().find(|p| p.name == name)
    }

    /// The unique initial state. Present on every validated protocol.
    pub fn initial_state(&self) -> Option<&StateDef> {
        self.states.iter().find(|s| s.initial)
    }
}
