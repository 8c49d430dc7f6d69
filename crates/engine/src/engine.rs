//! The engine facade: protocol registry, instance lifecycle, and the
//! single invocation entry point.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use accord_core::{validate, Protocol, Value};
use accord_storage::{AuditEntryRecord, InstanceRecord, InstanceStore};
use serde::Serialize;

use crate::error::EngineError;
use crate::evaluate::evaluate;
use crate::execute::{execute, TransitionOutcome};
use crate::identity::Identity;
use crate::now_rfc3339;
use crate::oracle::{Oracle, OracleFailure, OracleRegistry};
use crate::party::PartyResolver;
use crate::sink::{DeniedAttempt, DenialSink};

/// Deployment knobs for an [`Engine`].
pub struct EngineConfig {
    /// Per-call budget for oracle dispatch.
    pub oracle_timeout: Duration,
    /// Optional observer for rejected invocations.
    pub denial_sink: Option<Arc<dyn DenialSink>>,
}

impl Default for EngineConfig {
    fn default() -> EngineConfig {
        EngineConfig {
            oracle_timeout: Duration::from_secs(5),
            denial_sink: None,
        }
    }
}

/// Receipt for a registered protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolHandle {
    pub protocol_id: String,
}

/// A read-only view of an instance's committed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceStatus {
    pub instance_id: String,
    pub protocol_id: String,
    pub state: String,
    pub version: i64,
    pub role_bindings: BTreeMap<String, String>,
    pub fields: BTreeMap<String, Value>,
}

/// The workflow engine. Generic over its storage backend; all other
/// collaborators are injected at construction.
pub struct Engine<S: InstanceStore> {
    store: S,
    resolver: Arc<dyn PartyResolver>,
    oracles: OracleRegistry,
    protocols: RwLock<BTreeMap<String, Arc<Protocol>>>,
    denial_sink: Option<Arc<dyn DenialSink>>,
    instance_counter: AtomicU64,
}

impl<S: InstanceStore> Engine<S> {
    pub fn new(store: S, resolver: Arc<dyn PartyResolver>, config: EngineConfig) -> Engine<S> {
        Engine {
            store,
            resolver,
            oracles: OracleRegistry::new(config.oracle_timeout),
            protocols: RwLock::new(BTreeMap::new()),
            denial_sink: config.denial_sink,
            instance_counter: AtomicU64::new(0),
        }
    }

    /// Register an oracle under `name`. Oracles are installed before
    /// the engine starts serving invocations, hence `&mut self`.
    pub fn register_oracle(&mut self, name: impl Into<String>, oracle: Arc<dyn Oracle>) {
        self.oracles.register(name, oracle);
    }

    pub fn register_oracle_fn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&InstanceRecord, &[Value]) -> Result<Value, OracleFailure> + Send + Sync + 'static,
    {
        self.oracles.register_fn(name, f);
    }

    /// Validate and register a protocol. A malformed protocol is
    /// rejected here, before any instance of it can exist.
    pub fn register_protocol(&self, protocol: Protocol) -> Result<ProtocolHandle, EngineError> {
        validate(&protocol)?;
        let mut protocols = write_protocols(&self.protocols);
        if protocols.contains_key(&protocol.id) {
            return Err(EngineError::ProtocolExists {
                protocol_id: protocol.id.clone(),
            });
        }
        let handle = ProtocolHandle {
            protocol_id: protocol.id.clone(),
        };
        protocols.insert(protocol.id.clone(), Arc::new(protocol));
        Ok(handle)
    }

    /// Create an instance in the protocol's initial state, version 0,
    /// with the given seed bindings and fields. Creation is not a
    /// transition: the audit trail starts empty.
    pub async fn create_instance(
        &self,
        protocol_id: &str,
        initial_bindings: BTreeMap<String, String>,
        initial_fields: BTreeMap<String, Value>,
    ) -> Result<String, EngineError> {
        let protocol = self.protocol(protocol_id)?;
        for role in initial_bindings.keys() {
            if !protocol.has_role(role) {
                return Err(EngineError::Validation {
                    check: "initial_bindings".to_string(),
                    message: format!("protocol '{}' declares no role '{}'", protocol.id, role),
                });
            }
        }
        let initial = protocol
            .initial_state()
            .ok_or_else(|| EngineError::Definition(accord_core::DefinitionError::NoStates {
                protocol: protocol.id.clone(),
            }))?;

        let n = self.instance_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let record = InstanceRecord {
            instance_id: format!("{}-{}", protocol.id, n),
            protocol_id: protocol.id.clone(),
            state: initial.name.clone(),
            version: 0,
            role_bindings: initial_bindings,
            fields: initial_fields,
            created_at: now_rfc3339(),
        };
        let instance_id = record.instance_id.clone();

        let mut snapshot = self.store.begin_snapshot().await?;
        match self.store.create_instance(&mut snapshot, record).await {
            Ok(()) => {
                self.store.commit_snapshot(snapshot).await?;
                Ok(instance_id)
            }
            Err(err) => {
                let _ = self.store.abort_snapshot(snapshot).await;
                Err(err.into())
            }
        }
    }

    /// The one path by which an instance changes. Evaluates the
    /// permission against the committed record and, on a pass, executes
    /// its effects and commits the transition with its audit entry.
    pub async fn invoke_permission(
        &self,
        instance_id: &str,
        acting: &Identity,
        permission: &str,
        args: BTreeMap<String, Value>,
    ) -> Result<TransitionOutcome, EngineError> {
        let instance = self.store.instance(instance_id).await?;
        let protocol = self.protocol(&instance.protocol_id)?;

        let evaluation = match evaluate(
            &protocol,
            &instance,
            acting,
            permission,
            &args,
            self.resolver.as_ref(),
            &self.oracles,
        )
        .await
        {
            Ok(evaluation) => evaluation,
            Err(err) => {
                self.report_denial(instance_id, acting, permission, &args, &err);
                return Err(err);
            }
        };

        execute(
            &self.store,
            &protocol,
            evaluation,
            self.resolver.as_ref(),
            &self.oracles,
        )
        .await
    }

    /// The committed state of an instance.
    pub async fn status(&self, instance_id: &str) -> Result<InstanceStatus, EngineError> {
        let record = self.store.instance(instance_id).await?;
        Ok(InstanceStatus {
            instance_id: record.instance_id,
            protocol_id: record.protocol_id,
            state: record.state,
            version: record.version,
            role_bindings: record.role_bindings,
            fields: record.fields,
        })
    }

    /// The committed audit trail, ordered by sequence, gap-free from 1.
    pub async fn audit_trail(
        &self,
        instance_id: &str,
    ) -> Result<Vec<AuditEntryRecord>, EngineError> {
        Ok(self.store.audit_trail(instance_id).await?)
    }

    fn protocol(&self, protocol_id: &str) -> Result<Arc<Protocol>, EngineError> {
        read_protocols(&self.protocols)
            .get(protocol_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownProtocol {
                protocol_id: protocol_id.to_string(),
            })
    }

    /// Denials are observed only for decisions about the request
    /// itself; transient oracle, storage, and concurrency failures are
    /// not denials.
    fn report_denial(
        &self,
        instance_id: &str,
        acting: &Identity,
        permission: &str,
        args: &BTreeMap<String, Value>,
        err: &EngineError,
    ) {
        let Some(sink) = &self.denial_sink else {
            return;
        };
        if !matches!(
            err,
            EngineError::Authorization { .. }
                | EngineError::State { .. }
                | EngineError::Validation { .. }
        ) {
            return;
        }
        sink.record(DeniedAttempt {
            instance_id: instance_id.to_string(),
            actor: acting.subject.clone(),
            permission: permission.to_string(),
            args: args.clone(),
            reason: err.to_string(),
            timestamp: now_rfc3339(),
        });
    }
}

type ProtocolMap = BTreeMap<String, Arc<Protocol>>;

fn read_protocols(lock: &RwLock<ProtocolMap>) -> std::sync::RwLockReadGuard<'_, ProtocolMap> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_protocols(lock: &RwLock<ProtocolMap>) -> std::sync::RwLockWriteGuard<'_, ProtocolMap> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
