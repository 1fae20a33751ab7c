//! Algebraic expressions for rates and variables.
//!
//! Booleans are numbers: comparisons and logical operators yield 1.0 or 0.0,
//! and any non-zero value is true.

use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Log,
    Exp,
    Sin,
    Cos,
    Tan,
    Sqrt,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    /// Floored modulo: the result takes the sign of the divisor.
    Mod,
    Eq,
    Lt,
    Gt,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Number(f64),
    Bool(bool),
    Pi,
    /// Current simulated time.
    Time,
    /// Number of events fired so far.
    Events,
    Variable(String),
    /// Embedding count of a registered observable.
    Observable(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Max(Vec<Expr>),
    Min(Vec<Expr>),
    If {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

/// Values an expression can refer to.
pub trait Env {
    fn variable(&self, name: &str) -> Option<f64>;
    fn observable(&self, name: &str) -> Option<f64>;
    fn time(&self) -> f64;
    fn events(&self) -> u64;
}

/// An environment with nothing defined, at time zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyEnv;

impl Env for EmptyEnv {
    fn variable(&self, _name: &str) -> Option<f64> {
        None
    }

    fn observable(&self, _name: &str) -> Option<f64> {
        None
    }

    fn time(&self) -> f64 {
        0.0
    }

    fn events(&self) -> u64 {
        0
    }
}

fn truth(value: f64) -> bool {
    value != 0.0
}

fn number(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

impl Expr {
    pub fn num(value: f64) -> Self {
        Expr::Number(value)
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Variable(name.into())
    }

    pub fn obs(name: impl Into<String>) -> Self {
        Expr::Observable(name.into())
    }

    pub fn unary(op: UnaryOp, arg: Expr) -> Self {
        Expr::Unary(op, Box::new(arg))
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn if_else(condition: Expr, then: Expr, otherwise: Expr) -> Self {
        Expr::If {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn pow(self, exponent: Expr) -> Self {
        Expr::binary(BinaryOp::Pow, self, exponent)
    }

    pub fn lt(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Lt, self, rhs)
    }

    pub fn gt(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Gt, self, rhs)
    }

    pub fn eval(&self, env: &dyn Env) -> Result<f64, ModelError> {
        Ok(match self {
            Expr::Number(v) => *v,
            Expr::Bool(b) => number(*b),
            Expr::Pi => std::f64::consts::PI,
            Expr::Time => env.time(),
            Expr::Events => env.events() as f64,
            Expr::Variable(name) => env
                .variable(name)
                .ok_or_else(|| ModelError::UnknownVariable(name.clone()))?,
            Expr::Observable(name) => env
                .observable(name)
                .ok_or_else(|| ModelError::UnknownObservable(name.clone()))?,
            Expr::Unary(op, arg) => {
                let x = arg.eval(env)?;
                match op {
                    UnaryOp::Neg => -x,
                    UnaryOp::Log => x.ln(),
                    UnaryOp::Exp => x.exp(),
                    UnaryOp::Sin => x.sin(),
                    UnaryOp::Cos => x.cos(),
                    UnaryOp::Tan => x.tan(),
                    UnaryOp::Sqrt => x.sqrt(),
                    UnaryOp::Not => number(!truth(x)),
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                let a = lhs.eval(env)?;
                // Short-circuit like the logical operators they model.
                match op {
                    BinaryOp::And if !truth(a) => return Ok(0.0),
                    BinaryOp::Or if truth(a) => return Ok(1.0),
                    _ => {}
                }
                let b = rhs.eval(env)?;
                match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                    BinaryOp::Pow => a.powf(b),
                    BinaryOp::Mod => a - b * (a / b).floor(),
                    BinaryOp::Eq => number(a == b),
                    BinaryOp::Lt => number(a < b),
                    BinaryOp::Gt => number(a > b),
                    BinaryOp::And | BinaryOp::Or => number(truth(b)),
                }
            }
            Expr::Max(args) => fold(args, env, f64::max)?,
            Expr::Min(args) => fold(args, env, f64::min)?,
            Expr::If {
                condition,
                then,
                otherwise,
            } => {
                if truth(condition.eval(env)?) {
                    then.eval(env)?
                } else {
                    otherwise.eval(env)?
                }
            }
        })
    }

    /// Variable names referenced anywhere in the expression.
    pub fn variables(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.visit(&mut |e| {
            if let Expr::Variable(name) = e {
                out.insert(name.as_str());
            }
        });
        out
    }

    /// Observable names referenced anywhere in the expression.
    pub fn observables(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.visit(&mut |e| {
            if let Expr::Observable(name) = e {
                out.insert(name.as_str());
            }
        });
        out
    }

    /// Whether the value never changes during a run.
    pub fn is_constant(&self) -> bool {
        let mut constant = true;
        self.visit(&mut |e| {
            if matches!(e, Expr::Time | Expr::Events | Expr::Variable(_) | Expr::Observable(_)) {
                constant = false;
            }
        });
        constant
    }

    fn visit<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        f(self);
        match self {
            Expr::Unary(_, arg) => arg.visit(f),
            Expr::Binary(_, lhs, rhs) => {
                lhs.visit(f);
                rhs.visit(f);
            }
            Expr::Max(args) | Expr::Min(args) => args.iter().for_each(|a| a.visit(f)),
            Expr::If {
                condition,
                then,
                otherwise,
            } => {
                condition.visit(f);
                then.visit(f);
                otherwise.visit(f);
            }
            _ => {}
        }
    }
}

fn fold(args: &[Expr], env: &dyn Env, pick: fn(f64, f64) -> f64) -> Result<f64, ModelError> {
    let mut values = args.iter().map(|a| a.eval(env));
    let first = values.next().unwrap_or(Ok(f64::NAN))?;
    values.try_fold(first, |acc, v| Ok(pick(acc, v?)))
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Number(value)
    }
}

macro_rules! arith {
    ($trait:ident, $method:ident, $op:expr) => {
        impl ops::$trait for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, self, rhs)
            }
        }
    };
}

arith!(Add, add, BinaryOp::Add);
arith!(Sub, sub, BinaryOp::Sub);
arith!(Mul, mul, BinaryOp::Mul);
arith!(Div, div, BinaryOp::Div);

impl ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::unary(UnaryOp::Neg, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapEnv {
        vars: HashMap<&'static str, f64>,
        time: f64,
    }

    impl Env for MapEnv {
        fn variable(&self, name: &str) -> Option<f64> {
            self.vars.get(name).copied()
        }
        fn observable(&self, name: &str) -> Option<f64> {
            (name == "AB").then_some(4.0)
        }
        fn time(&self) -> f64 {
            self.time
        }
        fn events(&self) -> u64 {
            7
        }
    }

    fn env() -> MapEnv {
        MapEnv {
            vars: HashMap::from([("k", 2.5)]),
            time: 10.0,
        }
    }

    #[test]
    fn arithmetic_and_functions() {
        let e = Expr::var("k") * Expr::obs("AB") + Expr::num(1.0);
        assert_eq!(e.eval(&env()).unwrap(), 11.0);
        assert_eq!(Expr::num(2.0).pow(Expr::num(10.0)).eval(&EmptyEnv).unwrap(), 1024.0);
        assert_eq!(Expr::binary(BinaryOp::Mod, Expr::num(-7.0), Expr::num(3.0)).eval(&EmptyEnv).unwrap(), 2.0);
        assert_eq!(Expr::Max(vec![Expr::num(1.0), Expr::Time, Expr::num(3.0)]).eval(&env()).unwrap(), 10.0);
        assert_eq!(Expr::Min(vec![Expr::Events, Expr::num(9.0)]).eval(&env()).unwrap(), 7.0);
        let root = Expr::unary(UnaryOp::Sqrt, Expr::num(16.0));
        assert_eq!(root.eval(&EmptyEnv).unwrap(), 4.0);
    }

    #[test]
    fn conditionals_and_logic() {
        let early = Expr::Time.lt(Expr::num(5.0));
        let rate = Expr::if_else(early, Expr::num(1.0), Expr::num(0.0));
        assert_eq!(rate.eval(&env()).unwrap(), 0.0);

        let both = Expr::binary(BinaryOp::And, Expr::Bool(true), Expr::unary(UnaryOp::Not, Expr::Bool(false)));
        assert_eq!(both.eval(&EmptyEnv).unwrap(), 1.0);
        // The right side is never evaluated.
        let short = Expr::binary(BinaryOp::Or, Expr::Bool(true), Expr::var("missing"));
        assert_eq!(short.eval(&EmptyEnv).unwrap(), 1.0);
    }

    #[test]
    fn missing_references_are_model_errors() {
        assert_eq!(Expr::var("x").eval(&EmptyEnv), Err(ModelError::UnknownVariable("x".into())));
        assert_eq!(Expr::obs("y").eval(&EmptyEnv), Err(ModelError::UnknownObservable("y".into())));
    }

    #[test]
    fn references_and_constness() {
        let e = Expr::var("k") * Expr::obs("AB") + Expr::var("j");
        assert_eq!(e.variables().into_iter().collect::<Vec<_>>(), vec!["j", "k"]);
        assert_eq!(e.observables().into_iter().collect::<Vec<_>>(), vec!["AB"]);
        assert!(!e.is_constant());
        assert!((Expr::Pi * Expr::num(2.0)).is_constant());
    }
}
