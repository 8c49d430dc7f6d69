//! accord-core: protocol model for the accord workflow engine.
//!
//! A [`Protocol`] is a static description of a multi-party workflow:
//! the roles that may act on it, the states an instance moves through,
//! and the permissions (role-restricted, state-restricted, guard-gated
//! operations) that move it. Protocols carry no runtime data; instances
//! and their audit trails live in `accord-storage`, and all evaluation
//! and mutation happens in `accord-engine`.
//!
//! # Public API
//!
//! - [`Protocol`], [`StateDef`], [`PermissionSpec`], [`Guard`],
//!   [`Effect`], [`SourceStates`] -- the definition model
//! - [`Expr`] -- declarative guard/effect/return expression trees
//! - [`Value`] -- runtime field and argument values
//! - [`validate`] / [`DefinitionError`] -- eager structural validation,
//!   run before a protocol is registered

pub mod expr;
pub mod protocol;
pub mod validate;
pub mod value;

pub use expr::{ArithOp, CmpOp, Expr};
pub use protocol::{Effect, Guard, PermissionSpec, Protocol, SourceStates, StateDef};
pub use validate::{validate, DefinitionError};
pub use value::Value;
