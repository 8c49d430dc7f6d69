//! Expression interpreter.
//!
//! Evaluates `Expr` trees against one instance snapshot: its fields
//! (as already updated by earlier effects, when evaluating an effect
//! body), its role bindings, the invocation arguments, and the oracle
//! registry. Logical nodes short-circuit left to right; arithmetic is
//! checked and Decimal-based, never floating point.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use accord_core::{ArithOp, CmpOp, Expr, Value};
use accord_storage::InstanceRecord;
use rust_decimal::Decimal;

use crate::oracle::OracleRegistry;

/// A failure while evaluating an expression. `Oracle` failures keep
/// their identity through to `EngineError::Oracle`; everything else is
/// reported as a validation failure at the evaluating check site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EvalFailure {
    UnknownField(String),
    UnknownArg(String),
    UnboundParty(String),
    Oracle { name: String, message: String },
    Type(String),
    Overflow(String),
}

impl fmt::Display for EvalFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalFailure::UnknownField(name) => write!(f, "unknown field '{}'", name),
            EvalFailure::UnknownArg(name) => write!(f, "unknown argument '{}'", name),
            EvalFailure::UnboundParty(role) => write!(f, "role '{}' is not bound", role),
            EvalFailure::Oracle { name, message } => {
                write!(f, "oracle '{}' failed: {}", name, message)
            }
            EvalFailure::Type(message) => write!(f, "type error: {}", message),
            EvalFailure::Overflow(message) => write!(f, "numeric overflow: {}", message),
        }
    }
}

/// Everything an expression may read.
pub(crate) struct EvalEnv<'a> {
    pub instance: &'a InstanceRecord,
    /// Working field values; during effect execution these lead the
    /// persisted record.
    pub fields: &'a BTreeMap<String, Value>,
    /// Effective role bindings, committed plus pending.
    pub bindings: &'a BTreeMap<String, String>,
    pub args: &'a BTreeMap<String, Value>,
    pub oracles: &'a OracleRegistry,
}

/// Evaluate an expression. Boxed recursion: oracle dispatch makes the
/// interpreter async, and async fns cannot recurse directly.
pub(crate) fn eval_expr<'a>(
    expr: &'a Expr,
    env: &'a EvalEnv<'a>,
) -> Pin<Box<dyn Future<Output = Result<Value, EvalFailure>> + Send + 'a>> {
    Box::pin(async move {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),

            Expr::Field(name) => env
                .fields
                .get(name)
                .cloned()
                .ok_or_else(|| EvalFailure::UnknownField(name.clone())),

            Expr::Arg(name) => env
                .args
                .get(name)
                .cloned()
                .ok_or_else(|| EvalFailure::UnknownArg(name.clone())),

            Expr::Party(role) => env
                .bindings
                .get(role)
                .map(|subject| Value::Text(subject.clone()))
                .ok_or_else(|| EvalFailure::UnboundParty(role.clone())),

            Expr::Oracle { name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(eval_expr(arg, env).await?);
                }
                env.oracles.call(name, env.instance, &values).await
            }

            Expr::Not(inner) => {
                let value = eval_expr(inner, env).await?;
                let b = value.as_bool().map_err(EvalFailure::Type)?;
                Ok(Value::Bool(!b))
            }

            Expr::All(items) => {
                for item in items {
                    let value = eval_expr(item, env).await?;
                    if !value.as_bool().map_err(EvalFailure::Type)? {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }

            Expr::Any(items) => {
                for item in items {
                    let value = eval_expr(item, env).await?;
                    if value.as_bool().map_err(EvalFailure::Type)? {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }

            Expr::Cmp { op, lhs, rhs } => {
                let l = eval_expr(lhs, env).await?;
                let r = eval_expr(rhs, env).await?;
                compare(*op, &l, &r).map(Value::Bool)
            }

            Expr::Arith { op, lhs, rhs } => {
                let l = eval_expr(lhs, env).await?;
                let r = eval_expr(rhs, env).await?;
                arith(*op, &l, &r)
            }
        }
    })
}

/// Numeric equality crosses Int/Decimal; other types compare exactly.
fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    if let (Some(l), Some(r)) = (lhs.as_decimal(), rhs.as_decimal()) {
        return l == r;
    }
    lhs == rhs
}

fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> Result<bool, EvalFailure> {
    match op {
        CmpOp::Eq => Ok(values_equal(lhs, rhs)),
        CmpOp::Ne => Ok(!values_equal(lhs, rhs)),
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let ordering = if let (Some(l), Some(r)) = (lhs.as_decimal(), rhs.as_decimal()) {
                l.cmp(&r)
            } else if let (Some(l), Some(r)) = (lhs.as_str(), rhs.as_str()) {
                // Text and RFC 3339 timestamps order lexicographically.
                l.cmp(r)
            } else {
                return Err(EvalFailure::Type(format!(
                    "cannot order {} against {}",
                    lhs.type_name(),
                    rhs.type_name()
                )));
            };
            Ok(match op {
                CmpOp::Lt => ordering.is_lt(),
                CmpOp::Le => ordering.is_le(),
                CmpOp::Gt => ordering.is_gt(),
                CmpOp::Ge => ordering.is_ge(),
                CmpOp::Eq | CmpOp::Ne => unreachable!("handled above"),
            })
        }
    }
}

fn arith(op: ArithOp, lhs: &Value, rhs: &Value) -> Result<Value, EvalFailure> {
    if let (Value::Int(l), Value::Int(r)) = (lhs, rhs) {
        let result = match op {
            ArithOp::Add => l.checked_add(*r),
            ArithOp::Sub => l.checked_sub(*r),
            ArithOp::Mul => l.checked_mul(*r),
        };
        return result
            .map(Value::Int)
            .ok_or_else(|| EvalFailure::Overflow(format!("{} on Int", op_name(op))));
    }
    let (l, r) = match (lhs.as_decimal(), rhs.as_decimal()) {
        (Some(l), Some(r)) => (l, r),
        _ => {
            return Err(EvalFailure::Type(format!(
                "cannot apply {} to {} and {}",
                op_name(op),
                lhs.type_name(),
                rhs.type_name()
            )));
        }
    };
    let result: Option<Decimal> = match op {
        ArithOp::Add => l.checked_add(r),
        ArithOp::Sub => l.checked_sub(r),
        ArithOp::Mul => l.checked_mul(r),
    };
    result
        .map(Value::Decimal)
        .ok_or_else(|| EvalFailure::Overflow(format!("{} on Decimal", op_name(op))))
}

fn op_name(op: ArithOp) -> &'static str {
    match op {
        ArithOp::Add => "add",
        ArithOp::Sub => "sub",
        ArithOp::Mul => "mul",
    }
}
