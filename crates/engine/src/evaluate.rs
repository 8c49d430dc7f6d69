//! Permission evaluation: the ordered, side-effect-free gate.
//!
//! Checks run in a fixed order and short-circuit:
//!
//! 1. the permission exists in the protocol;
//! 2. the caller is authorized -- this runs before the state check so
//!    an unauthorized caller cannot learn the instance's current state
//!    from a differently-worded error;
//! 3. the instance is in one of the permission's source states;
//! 4. each guard predicate, in declaration order; the first failure
//!    aborts and later guards are not evaluated.
//!
//! A passing evaluation performs no mutation. Roles resolved along the
//! authorization path are carried as pending bindings and committed by
//! the executor together with the transition.

use std::collections::BTreeMap;

use accord_core::{DefinitionError, PermissionSpec, Protocol, SourceStates, Value};
use accord_storage::InstanceRecord;

use crate::error::EngineError;
use crate::eval::{eval_expr, EvalEnv};
use crate::identity::Identity;
use crate::oracle::OracleRegistry;
use crate::party::PartyResolver;

/// A passing evaluation: everything the executor needs to run the
/// permission body, including the instance snapshot (and version) the
/// checks were computed against.
#[derive(Debug, Clone)]
pub struct EvaluationResult {
    pub(crate) permission: PermissionSpec,
    pub acting_subject: String,
    /// The allowed role the caller was authorized through.
    pub acting_role: String,
    pub(crate) instance: InstanceRecord,
    /// Bindings resolved during authorization, not yet committed.
    pub(crate) pending_bindings: BTreeMap<String, String>,
    pub(crate) args: BTreeMap<String, Value>,
}

pub(crate) async fn evaluate(
    protocol: &Protocol,
    instance: &InstanceRecord,
    acting: &Identity,
    permission_name: &str,
    args: &BTreeMap<String, Value>,
    resolver: &dyn PartyResolver,
    oracles: &OracleRegistry,
) -> Result<EvaluationResult, EngineError> {
    // 1. Permission exists. Unreachable for validated protocols unless
    // the caller guesses names.
    let permission = protocol.permission_spec(permission_name).ok_or_else(|| {
        EngineError::Definition(DefinitionError::UnknownPermission {
            protocol: protocol.id.clone(),
            permission: permission_name.to_string(),
        })
    })?;

    // 2. Authorization. The caller must be eligible for an allowed role
    // AND either already bound to it on this instance or resolvable to
    // it through the injected resolver. Resolution happening here is
    // recorded as a pending binding; it must not persist unless the
    // transition commits.
    let mut pending_bindings: BTreeMap<String, String> = BTreeMap::new();
    let mut acting_role: Option<String> = None;
    for role in &permission.allowed_roles {
        if !acting.is_eligible(role) {
            continue;
        }
        match instance.role_bindings.get(role) {
            Some(subject) if subject == &acting.subject => {
                acting_role = Some(role.clone());
                break;
            }
            Some(_) => continue,
            None => match resolver.resolve(role, instance).await {
                Ok(resolved) if resolved.subject == acting.subject => {
                    pending_bindings.insert(role.clone(), resolved.subject);
                    acting_role = Some(role.clone());
                    break;
                }
                // Unresolvable, or resolves to someone else: the caller
                // is simply not authorized through this role.
                _ => continue,
            },
        }
    }
    let acting_role = acting_role.ok_or_else(|| EngineError::Authorization {
        permission: permission.name.clone(),
        actor: acting.subject.clone(),
    })?;

    // 3. State membership.
    if let SourceStates::Of(required) = &permission.source_states {
        if !required.iter().any(|s| s == &instance.state) {
            return Err(EngineError::State {
                permission: permission.name.clone(),
                required: required.clone(),
                actual: instance.state.clone(),
            });
        }
    }

    // 4. Arguments, then guards in declaration order.
    for param in &permission.params {
        if !args.contains_key(param) {
            return Err(EngineError::Validation {
                check: "arguments".to_string(),
                message: format!("missing argument '{}'", param),
            });
        }
    }
    for name in args.keys() {
        if !permission.params.iter().any(|p| p == name) {
            return Err(EngineError::Validation {
                check: "arguments".to_string(),
                message: format!("unexpected argument '{}'", name),
            });
        }
    }

    let mut bindings = instance.role_bindings.clone();
    bindings.extend(pending_bindings.clone());
    let env = EvalEnv {
        instance,
        fields: &instance.fields,
        bindings: &bindings,
        args,
        oracles,
    };
    for guard in &permission.guards {
        let value = eval_expr(&guard.predicate, &env)
            .await
            .map_err(|failure| EngineError::from_eval(&guard.name, failure))?;
        match value.as_bool() {
            Ok(true) => {}
            Ok(false) => {
                return Err(EngineError::Validation {
                    check: guard.name.clone(),
                    message: guard.message.clone(),
                });
            }
            Err(message) => {
                return Err(EngineError::Validation {
                    check: guard.name.clone(),
                    message,
                });
            }
        }
    }

    Ok(EvaluationResult {
        permission: permission.clone(),
        acting_subject: acting.subject.clone(),
        acting_role,
        instance: instance.clone(),
        pending_bindings,
        args: args.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_core::{Expr, StateDef};
    use crate::party::StaticPartyResolver;
    use std::time::Duration;

    fn protocol() -> Protocol {
        Protocol::new("expense")
            .role("employee")
            .role("manager")
            .state(StateDef::initial("draft"))
            .state(StateDef::new("submitted"))
            .state(StateDef::terminal("approved"))
            .permission(
                accord_core::PermissionSpec::new("submit", &["employee"])
                    .from_states(&["draft"])
                    .guard(
                        "positive_amount",
                        "amount must be positive",
                        Expr::field("amount").gt(Expr::lit(0_i64)),
                    )
                    .to_state("submitted"),
            )
            .permission(
                accord_core::PermissionSpec::new("approve", &["manager"])
                    .from_states(&["submitted"])
                    .guard(
                        "approval_limit",
                        "amount exceeds approval limit",
                        Expr::field("amount").le(Expr::lit(1000_i64)),
                    )
                    .to_state("approved"),
            )
    }

    fn instance(state: &str, amount: i64) -> InstanceRecord {
        InstanceRecord {
            instance_id: "expense-1".to_string(),
            protocol_id: "expense".to_string(),
            state: state.to_string(),
            version: 0,
            role_bindings: BTreeMap::from([("employee".to_string(), "alice".to_string())]),
            fields: BTreeMap::from([("amount".to_string(), Value::Int(amount))]),
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    fn oracles() -> OracleRegistry {
        OracleRegistry::new(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn wrong_role_fails_before_state_is_revealed() {
        // alice is in the wrong state AND the wrong role; the error
        // must be Authorization, not State.
        let protocol = protocol();
        let inst = instance("approved", 500);
        let alice = Identity::new("alice", &["employee"]);
        let resolver = StaticPartyResolver::new();
        let err = evaluate(&protocol, &inst, &alice, "approve", &BTreeMap::new(), &resolver, &oracles())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::Authorization {
                permission: "approve".to_string(),
                actor: "alice".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn eligible_but_bound_to_someone_else_fails() {
        let protocol = protocol();
        let mut inst = instance("submitted", 500);
        inst.role_bindings
            .insert("manager".to_string(), "bob".to_string());
        let mallory = Identity::new("mallory", &["manager"]);
        let resolver = StaticPartyResolver::new();
        let err = evaluate(&protocol, &inst, &mallory, "approve", &BTreeMap::new(), &resolver, &oracles())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Authorization { .. }));
    }

    #[tokio::test]
    async fn unbound_role_resolves_to_caller() {
        let protocol = protocol();
        let inst = instance("submitted", 500);
        let bob = Identity::new("bob", &["manager"]);
        let resolver =
            StaticPartyResolver::new().assign("manager", Identity::new("bob", &["manager"]));
        let evaluation = evaluate(&protocol, &inst, &bob, "approve", &BTreeMap::new(), &resolver, &oracles())
            .await
            .unwrap();
        assert_eq!(evaluation.acting_role, "manager");
        assert_eq!(
            evaluation.pending_bindings.get("manager").map(String::as_str),
            Some("bob")
        );
        // Evaluation performed no mutation.
        assert!(!inst.role_bindings.contains_key("manager"));
    }

    #[tokio::test]
    async fn wrong_state_names_required_set() {
        let protocol = protocol();
        let inst = instance("draft", 500);
        let bob = Identity::new("bob", &["manager"]);
        let resolver =
            StaticPartyResolver::new().assign("manager", Identity::new("bob", &["manager"]));
        let err = evaluate(&protocol, &inst, &bob, "approve", &BTreeMap::new(), &resolver, &oracles())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "'approve' requires one of {submitted}, found draft"
        );
    }

    #[tokio::test]
    async fn failing_guard_carries_its_message() {
        let protocol = protocol();
        let inst = instance("submitted", 1500);
        let bob = Identity::new("bob", &["manager"]);
        let resolver =
            StaticPartyResolver::new().assign("manager", Identity::new("bob", &["manager"]));
        let err = evaluate(&protocol, &inst, &bob, "approve", &BTreeMap::new(), &resolver, &oracles())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::Validation {
                check: "approval_limit".to_string(),
                message: "amount exceeds approval limit".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn unknown_permission_is_a_definition_error() {
        let protocol = protocol();
        let inst = instance("draft", 500);
        let alice = Identity::new("alice", &["employee"]);
        let resolver = StaticPartyResolver::new();
        let err = evaluate(&protocol, &inst, &alice, "escalate", &BTreeMap::new(), &resolver, &oracles())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Definition(_)));
    }

    #[tokio::test]
    async fn unexpected_argument_rejected() {
        let protocol = protocol();
        let inst = instance("draft", 500);
        let alice = Identity::new("alice", &["employee"]);
        let resolver = StaticPartyResolver::new();
        let args = BTreeMap::from([("note".to_string(), Value::Text("x".to_string()))]);
        let err = evaluate(&protocol, &inst, &alice, "submit", &args, &resolver, &oracles())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::Validation {
                check: "arguments".to_string(),
                message: "unexpected argument 'note'".to_string(),
            }
        );
    }
}
