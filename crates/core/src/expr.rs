//! Guard, effect, and return-value expression trees.
//!
//! Permission bodies are declarative: a guard predicate, an effect
//! value, or a return value is an [`Expr`] tree interpreted by the
//! engine against the instance snapshot, the invocation arguments, the
//! resolved party bindings, and the registered oracles. Keeping bodies
//! as data (rather than host-language closures) lets validation check
//! every name reference at registration time and makes audit trails
//! replayable.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Checked arithmetic operators over `Int`/`Decimal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
}

/// A declarative expression over one instance snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// A literal value.
    Literal(Value),
    /// Current value of an instance field.
    Field(String),
    /// An invocation argument, by declared parameter name.
    Arg(String),
    /// The subject bound to a role, as `Text`.
    Party(String),
    /// An external lookup, dispatched by name through the oracle
    /// registry. Arguments are evaluated left to right.
    Oracle { name: String, args: Vec<Expr> },
    Not(Box<Expr>),
    /// True when every operand is true. Short-circuits.
    All(Vec<Expr>),
    /// True when any operand is true. Short-circuits.
    Any(Vec<Expr>),
    Cmp {
        op: CmpOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Arith {
        op: ArithOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    pub fn lit(value: impl Into<Value>) -> Expr {
        Expr::Literal(value.into())
    }

    pub fn field(name: impl Into<String>) -> Expr {
        Expr::Field(name.into())
    }

    pub fn arg(name: impl Into<String>) -> Expr {
        Expr::Arg(name.into())
    }

    pub fn party(role: impl Into<String>) -> Expr {
        Expr::Party(role.into())
    }

    pub fn oracle(name: impl Into<String>, args: Vec<Expr>) -> Expr {
        Expr::Oracle {
            name: name.into(),
            args,
        }
    }

    pub fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    pub fn all(exprs: Vec<Expr>) -> Expr {
        Expr::All(exprs)
    }

    pub fn any(exprs: Vec<Expr>) -> Expr {
        Expr::Any(exprs)
    }

    fn cmp(self, op: CmpOp, rhs: Expr) -> Expr {
        Expr::Cmp {
            op,
            lhs: Box::new(self),
            rhs: Box::new(rhs),
        }
    }

    pub fn eq(self, rhs: Expr) -> Expr {
        self.cmp(CmpOp::Eq, rhs)
    }

    pub fn ne(self, rhs: Expr) -> Expr {
        self.cmp(CmpOp::Ne, rhs)
    }

    pub fn lt(self, rhs: Expr) -> Expr {
        self.cmp(CmpOp::Lt, rhs)
    }

    pub fn le(self, rhs: Expr) -> Expr {
        self.cmp(CmpOp::Le, rhs)
    }

    pub fn gt(self, rhs: Expr) -> Expr {
        self.cmp(CmpOp::Gt, rhs)
    }

    pub fn ge(self, rhs: Expr) -> Expr {
        self.cmp(CmpOp::Ge, rhs)
    }

    fn arith(self, op: ArithOp, rhs: Expr) -> Expr {
        Expr::Arith {
            op,
            lhs: Box::new(self),
            rhs: Box::new(rhs),
        }
    }

    pub fn add(self, rhs: Expr) -> Expr {
        self.arith(ArithOp::Add, rhs)
    }

    pub fn sub(self, rhs: Expr) -> Expr {
        self.arith(ArithOp::Sub, rhs)
    }

    pub fn mul(self, rhs: Expr) -> Expr {
        self.arith(ArithOp::Mul, rhs)
    }

    /// Walk the tree, calling `f` on every node (pre-order).
    /// Used by validation to check arg/party/oracle references.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        match self {
            Expr::Literal(_) | Expr::Field(_) | Expr::Arg(_) | Expr::Party(_) => {}
            Expr::Oracle { args, .. } => {
                for a in args {
                    a.visit(f);
                }
            }
            Expr::Not(inner) => inner.visit(f),
            Expr::All(items) | Expr::Any(items) => {
                for item in items {
                    item.visit(f);
                }
            }
            Expr::Cmp { lhs, rhs, .. } | Expr::Arith { lhs, rhs, .. } => {
                lhs.visit(f);
                rhs.visit(f);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_compose() {
        let e = Expr::field("amount").gt(Expr::lit(0_i64));
        match e {
            Expr::Cmp { op: CmpOp::Gt, lhs, rhs } => {
                assert_eq!(*lhs, Expr::Field("amount".into()));
                assert_eq!(*rhs, Expr::Literal(Value::Int(0)));
            }
            other => panic!("unexpected expr: {:?}", other),
        }
    }

    #[test]
    fn visit_reaches_nested_oracle_args() {
        let e = Expr::all(vec![
            Expr::field("amount").le(Expr::oracle(
                "remaining_budget",
                vec![Expr::field("department"), Expr::arg("period")],
            )),
            Expr::party("manager").ne(Expr::party("employee")),
        ]);
        let mut args = Vec::new();
        let mut parties = Vec::new();
        e.visit(&mut |node| match node {
            Expr::Arg(name) => args.push(name.clone()),
            Expr::Party(role) => parties.push(role.clone()),
            _ => {}
        });
        assert_eq!(args, vec!["period"]);
        assert_eq!(parties, vec!["manager", "employee"]);
    }

    #[test]
    fn serde_round_trip() {
        let e = Expr::field("amount").le(Expr::lit(1000_i64)).not();
        let json = serde_json::to_string(&e).unwrap();
        let back: Expr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
