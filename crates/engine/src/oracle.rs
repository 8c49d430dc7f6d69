//! Business rule oracles: named external lookups usable from guards.
//!
//! An [`Oracle`] answers one named question (a budget lookup, a
//! blacklist check, a duplicate scan) against an instance snapshot.
//! Oracles are registered by the deployment; the engine only invokes
//! them by name through `Expr::Oracle` nodes, under the registry's
//! configured timeout. A timed-out or failed call aborts the whole
//! evaluation with no partial effect.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use accord_core::Value;
use accord_storage::InstanceRecord;
use async_trait::async_trait;

use crate::eval::EvalFailure;

/// An oracle-specific failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleFailure(pub String);

impl fmt::Display for OracleFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for OracleFailure {}

/// A named external lookup or predicate. May block on external I/O;
/// the registry bounds every call with its timeout.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn call(&self, instance: &InstanceRecord, args: &[Value])
        -> Result<Value, OracleFailure>;
}

/// An oracle that returns a fixed value. Useful for tests and for
/// deployment constants (limits, feature switches).
pub struct StaticOracle {
    value: Value,
}

impl StaticOracle {
    pub fn new(value: impl Into<Value>) -> StaticOracle {
        StaticOracle {
            value: value.into(),
        }
    }
}

#[async_trait]
impl Oracle for StaticOracle {
    async fn call(
        &self,
        _instance: &InstanceRecord,
        _args: &[Value],
    ) -> Result<Value, OracleFailure> {
        Ok(self.value.clone())
    }
}

/// An oracle backed by a synchronous closure over the instance
/// snapshot and the evaluated call arguments.
pub struct FnOracle<F> {
    f: F,
}

impl<F> FnOracle<F>
where
    F: Fn(&InstanceRecord, &[Value]) -> Result<Value, OracleFailure> + Send + Sync,
{
    pub fn new(f: F) -> FnOracle<F> {
        FnOracle { f }
    }
}

#[async_trait]
impl<F> Oracle for FnOracle<F>
where
    F: Fn(&InstanceRecord, &[Value]) -> Result<Value, OracleFailure> + Send + Sync,
{
    async fn call(
        &self,
        instance: &InstanceRecord,
        args: &[Value],
    ) -> Result<Value, OracleFailure> {
        (self.f)(instance, args)
    }
}

/// Named oracles plus the deployment-configured per-call timeout.
pub struct OracleRegistry {
    oracles: BTreeMap<String, Arc<dyn Oracle>>,
    timeout: Duration,
}

impl OracleRegistry {
    pub fn new(timeout: Duration) -> OracleRegistry {
        OracleRegistry {
            oracles: BTreeMap::new(),
            timeout,
        }
    }

    pub fn register(&mut self, name: impl Into<String>, oracle: Arc<dyn Oracle>) {
        self.oracles.insert(name.into(), oracle);
    }

    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&InstanceRecord, &[Value]) -> Result<Value, OracleFailure> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnOracle::new(f)));
    }

    /// Dispatch a call by name under the registry timeout.
    pub(crate) async fn call(
        &self,
        name: &str,
        instance: &InstanceRecord,
        args: &[Value],
    ) -> Result<Value, EvalFailure> {
        let oracle = self.oracles.get(name).ok_or_else(|| EvalFailure::Oracle {
            name: name.to_string(),
            message: "no oracle registered under this name".to_string(),
        })?;
        match tokio::time::timeout(self.timeout, oracle.call(instance, args)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(failure)) => Err(EvalFailure::Oracle {
                name: name.to_string(),
                message: failure.to_string(),
            }),
            Err(_) => Err(EvalFailure::Oracle {
                name: name.to_string(),
                message: format!("timed out after {:?}", self.timeout),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> InstanceRecord {
        InstanceRecord {
            instance_id: "exp-1".to_string(),
            protocol_id: "expense".to_string(),
            state: "draft".to_string(),
            version: 0,
            role_bindings: BTreeMap::new(),
            fields: BTreeMap::new(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn static_oracle_returns_value() {
        let mut registry = OracleRegistry::new(Duration::from_secs(1));
        registry.register("approval_limit", Arc::new(StaticOracle::new(1000_i64)));
        let got = registry
            .call("approval_limit", &instance(), &[])
            .await
            .unwrap();
        assert_eq!(got, Value::Int(1000));
    }

    #[tokio::test]
    async fn fn_oracle_sees_arguments() {
        let mut registry = OracleRegistry::new(Duration::from_secs(1));
        registry.register_fn("is_blacklisted", |_instance, args| {
            let vendor = args
                .first()
                .and_then(|v| v.as_str())
                .ok_or_else(|| OracleFailure("expected vendor id".to_string()))?;
            Ok(Value::Bool(vendor.ends_with("_BLOCKED")))
        });
        let got = registry
            .call(
                "is_blacklisted",
                &instance(),
                &[Value::Text("ACME_BLOCKED".to_string())],
            )
            .await
            .unwrap();
        assert_eq!(got, Value::Bool(true));
    }

    #[tokio::test]
    async fn unregistered_oracle_fails() {
        let registry = OracleRegistry::new(Duration::from_secs(1));
        let err = registry.call("budget", &instance(), &[]).await.unwrap_err();
        assert_eq!(
            err,
            EvalFailure::Oracle {
                name: "budget".to_string(),
                message: "no oracle registered under this name".to_string(),
            }
        );
    }

    struct StalledOracle;

    #[async_trait]
    impl Oracle for StalledOracle {
        async fn call(
            &self,
            _instance: &InstanceRecord,
            _args: &[Value],
        ) -> Result<Value, OracleFailure> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Value::Bool(true))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_oracle_times_out() {
        let mut registry = OracleRegistry::new(Duration::from_millis(50));
        registry.register("budget", Arc::new(StalledOracle));
        let err = registry.call("budget", &instance(), &[]).await.unwrap_err();
        match err {
            EvalFailure::Oracle { name, message } => {
                assert_eq!(name, "budget");
                assert!(message.contains("timed out"), "{}", message);
            }
            other => panic!("expected oracle failure, got {:?}", other),
        }
    }
}
