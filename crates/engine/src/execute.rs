//! Transition execution: effects, state change, and commit.
//!
//! Runs only on a passing [`EvaluationResult`]. Effects execute in
//! declaration order against a working copy of the instance; each
//! `SetField` sees the fields as left by earlier effects. Nothing
//! touches the store until every effect and the return expression have
//! succeeded; the state change and its audit entry then commit in one
//! snapshot, version-checked against the record the evaluation saw.

use accord_core::{DefinitionError, Effect, Protocol, Value};
use accord_storage::{AuditEntryRecord, InstanceRecord, InstanceStore, StorageError};

use crate::error::EngineError;
use crate::eval::{eval_expr, EvalEnv};
use crate::evaluate::EvaluationResult;
use crate::now_rfc3339;
use crate::oracle::OracleRegistry;
use crate::party::PartyResolver;

/// A committed transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub instance_id: String,
    /// The audit sequence number of this transition. Equal to the
    /// instance version it produced.
    pub sequence: i64,
    pub new_state: String,
    pub return_value: Option<Value>,
}

pub(crate) async fn execute<S: InstanceStore>(
    store: &S,
    protocol: &Protocol,
    evaluation: EvaluationResult,
    resolver: &dyn PartyResolver,
    oracles: &OracleRegistry,
) -> Result<TransitionOutcome, EngineError> {
    let EvaluationResult {
        permission,
        acting_subject,
        acting_role: _,
        instance: original,
        pending_bindings,
        args,
    } = evaluation;

    let mut working = original.clone();
    working.role_bindings.extend(pending_bindings);

    for effect in &permission.effects {
        match effect {
            Effect::SetField { field, value } => {
                let computed = {
                    let env = EvalEnv {
                        instance: &original,
                        fields: &working.fields,
                        bindings: &working.role_bindings,
                        args: &args,
                        oracles,
                    };
                    eval_expr(value, &env).await
                }
                .map_err(|failure| {
                    EngineError::from_eval(&format!("set_field {}", field), failure)
                })?;
                working.fields.insert(field.clone(), computed);
            }
            Effect::BindRole { role, rebind } => {
                if working.role_bindings.contains_key(role) && !rebind {
                    continue;
                }
                let resolved =
                    resolver
                        .resolve(role, &working)
                        .await
                        .map_err(|err| EngineError::Validation {
                            check: format!("bind_role {}", role),
                            message: err.to_string(),
                        })?;
                working.role_bindings.insert(role.clone(), resolved.subject);
            }
        }
    }

    if let Some(target) = &permission.target_state {
        if protocol.state_def(target).is_none() {
            return Err(EngineError::Definition(DefinitionError::UnknownState {
                permission: permission.name.clone(),
                state: target.clone(),
            }));
        }
        working.state = target.clone();
    }

    let return_value = match &permission.returns {
        Some(expr) => {
            let env = EvalEnv {
                instance: &original,
                fields: &working.fields,
                bindings: &working.role_bindings,
                args: &args,
                oracles,
            };
            Some(
                eval_expr(expr, &env)
                    .await
                    .map_err(|failure| EngineError::from_eval("returns", failure))?,
            )
        }
        None => None,
    };

    let expected_version = original.version;
    working.version = expected_version + 1;

    let mut description = format!(
        "{}: {} -> {}",
        permission.name, original.state, working.state
    );
    if let Some(value) = &return_value {
        description.push_str(&format!(" (returned {})", value));
    }
    let entry = AuditEntryRecord {
        instance_id: working.instance_id.clone(),
        sequence: working.version,
        actor: acting_subject,
        permission: permission.name.clone(),
        args,
        prior_state: original.state.clone(),
        new_state: working.state.clone(),
        timestamp: now_rfc3339(),
        description,
    };

    let outcome = TransitionOutcome {
        instance_id: working.instance_id.clone(),
        sequence: working.version,
        new_state: working.state.clone(),
        return_value,
    };

    let mut snapshot = store.begin_snapshot().await?;
    let staged = stage(store, &mut snapshot, working, expected_version, entry).await;
    match staged {
        Ok(()) => {
            store.commit_snapshot(snapshot).await?;
            Ok(outcome)
        }
        Err(err) => {
            // Roll back; the staging error is what the caller sees.
            let _ = store.abort_snapshot(snapshot).await;
            Err(err)
        }
    }
}

async fn stage<S: InstanceStore>(
    store: &S,
    snapshot: &mut S::Snapshot,
    record: InstanceRecord,
    expected_version: i64,
    entry: AuditEntryRecord,
) -> Result<(), EngineError> {
    // The record re-read here may already be newer than the one the
    // evaluation ran against; surface that as a conflict rather than
    // letting stale guard results commit.
    let committed = store
        .instance_for_update(snapshot, &record.instance_id)
        .await?;
    if committed.version != expected_version {
        return Err(StorageError::ConcurrentConflict {
            instance_id: record.instance_id.clone(),
            expected_version,
        }
        .into());
    }
    store
        .update_instance(snapshot, record, expected_version)
        .await?;
    store.append_audit_entry(snapshot, entry).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_core::{Expr, PermissionSpec, StateDef};
    use accord_storage::MemoryStore;
    use crate::identity::Identity;
    use crate::party::StaticPartyResolver;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn protocol() -> Protocol {
        Protocol::new("expense")
            .role("employee")
            .role("manager")
            .state(StateDef::initial("draft"))
            .state(StateDef::new("submitted"))
            .permission(
                PermissionSpec::new("submit", &["employee"])
                    .from_states(&["draft"])
                    .param("note")
                    .set_field("note", Expr::arg("note"))
                    .set_field("total", Expr::field("amount").add(Expr::field("amount")))
                    .bind_role("manager")
                    .to_state("submitted")
                    .returns(Expr::field("total")),
            )
    }

    fn record() -> InstanceRecord {
        InstanceRecord {
            instance_id: "expense-1".to_string(),
            protocol_id: "expense".to_string(),
            state: "draft".to_string(),
            version: 0,
            role_bindings: BTreeMap::from([("employee".to_string(), "alice".to_string())]),
            fields: BTreeMap::from([("amount".to_string(), Value::Int(250))]),
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    async fn seed(store: &MemoryStore) {
        let mut snapshot = store.begin_snapshot().await.unwrap();
        store.create_instance(&mut snapshot, record()).await.unwrap();
        store.commit_snapshot(snapshot).await.unwrap();
    }

    fn evaluation() -> EvaluationResult {
        let protocol = protocol();
        let permission = protocol.permission_spec("submit").unwrap().clone();
        EvaluationResult {
            permission,
            acting_subject: "alice".to_string(),
            acting_role: "employee".to_string(),
            instance: record(),
            pending_bindings: BTreeMap::new(),
            args: BTreeMap::from([("note".to_string(), Value::Text("taxi".to_string()))]),
        }
    }

    #[tokio::test]
    async fn effects_state_and_audit_commit_together() {
        let store = MemoryStore::default();
        seed(&store).await;
        let resolver =
            StaticPartyResolver::new().assign("manager", Identity::new("bob", &["manager"]));
        let oracles = OracleRegistry::new(Duration::from_secs(1));

        let outcome = execute(&store, &protocol(), evaluation(), &resolver, &oracles)
            .await
            .unwrap();
        assert_eq!(outcome.sequence, 1);
        assert_eq!(outcome.new_state, "submitted");
        assert_eq!(outcome.return_value, Some(Value::Int(500)));

        let committed = store.instance("expense-1").await.unwrap();
        assert_eq!(committed.version, 1);
        assert_eq!(committed.state, "submitted");
        assert_eq!(
            committed.fields.get("note"),
            Some(&Value::Text("taxi".to_string()))
        );
        assert_eq!(committed.fields.get("total"), Some(&Value::Int(500)));
        assert_eq!(
            committed.role_bindings.get("manager").map(String::as_str),
            Some("bob")
        );

        let trail = store.audit_trail("expense-1").await.unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].sequence, 1);
        assert_eq!(trail[0].actor, "alice");
        assert_eq!(trail[0].prior_state, "draft");
        assert_eq!(trail[0].new_state, "submitted");
        assert_eq!(
            trail[0].description,
            "submit: draft -> submitted (returned 500)"
        );
    }

    #[tokio::test]
    async fn failing_effect_leaves_no_trace() {
        let store = MemoryStore::default();
        seed(&store).await;
        // No manager assignment: the bind_role effect fails.
        let resolver = StaticPartyResolver::new();
        let oracles = OracleRegistry::new(Duration::from_secs(1));

        let err = execute(&store, &protocol(), evaluation(), &resolver, &oracles)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::Validation {
                check: "bind_role manager".to_string(),
                message: "cannot resolve role 'manager': no assignment for role".to_string(),
            }
        );

        let committed = store.instance("expense-1").await.unwrap();
        assert_eq!(committed.version, 0);
        assert_eq!(committed.state, "draft");
        assert!(store.audit_trail("expense-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_evaluation_conflicts_instead_of_committing() {
        let store = MemoryStore::default();
        seed(&store).await;
        let resolver =
            StaticPartyResolver::new().assign("manager", Identity::new("bob", &["manager"]));
        let oracles = OracleRegistry::new(Duration::from_secs(1));

        // A first transition bumps the committed version to 1; the
        // second runs from the same version-0 evaluation and must lose.
        execute(&store, &protocol(), evaluation(), &resolver, &oracles)
            .await
            .unwrap();
        let err = execute(&store, &protocol(), evaluation(), &resolver, &oracles)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::Concurrency {
                instance_id: "expense-1".to_string()
            }
        );
        assert_eq!(store.audit_trail("expense-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bound_role_is_not_rebound_without_rebind() {
        let store = MemoryStore::default();
        seed(&store).await;
        let resolver =
            StaticPartyResolver::new().assign("manager", Identity::new("carol", &["manager"]));
        let oracles = OracleRegistry::new(Duration::from_secs(1));

        let mut evaluation = evaluation();
        evaluation
            .instance
            .role_bindings
            .insert("manager".to_string(), "bob".to_string());

        let outcome = execute(&store, &protocol(), evaluation, &resolver, &oracles)
            .await
            .unwrap();
        assert_eq!(outcome.new_state, "submitted");
        let stored = store.instance("expense-1").await.unwrap();
        assert_eq!(
            stored.role_bindings.get("manager").map(String::as_str),
            Some("bob")
        );
    }
}
