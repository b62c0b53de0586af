//! Caller-facing expression trees.
//!
//! Predicates and key selectors are built as [`Expr`] values rooted at the query parameter
//! (`param()` / `field("A.B")`) and handed to the builder, which parses them into filter and ordering
//! ASTs. Whether the parameter means the base object or its dynamic properties is decided by the
//! builder call (`filter` vs `filter_base`, `order_by` vs `order_by_base`).

#![allow(clippy::should_implement_trait)]

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::value::{ListItemRef, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// The lambda parameter
    Param,
    Member { target: Box<Expr>, name: String },
    /// Positional (`[2]`) or keyed (`["key"]`) access
    Index { target: Box<Expr>, index: Box<Expr> },
    Constant(Value),
    Captured(Captured),
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { left: Box<Expr>, op: BinaryOp, right: Box<Expr> },
    Conditional { test: Box<Expr>, if_true: Box<Expr>, if_false: Box<Expr> },
    Call { target: Box<Expr>, method: Method, args: Vec<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    And,
    Or,
    Coalesce,
}

impl BinaryOp {
    pub fn is_arithmetic(&self) -> bool { matches!(self, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod) }

    pub fn is_comparison(&self) -> bool {
        matches!(self, BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Lt | BinaryOp::Le)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    ToLower,
    ToUpper,
    Trim,
    TrimStart,
    TrimEnd,
    StartsWith { ignore_case: bool },
    EndsWith { ignore_case: bool },
    Contains { ignore_case: bool },
    Length,
    Count,
    In,
    ArrayContains,
    ArrayAny,
    ArrayEmpty,
    ArrayCount,
    ArrayAt,
    ArrayFirst,
    ArrayLast,
    ArrayStartsWith,
    ArrayEndsWith,
    ArrayMatches,
    ArraySum,
    ArrayAvg,
    ArrayMin,
    ArrayMax,
}

/// A variable closed over by the caller. Read once, when the expression is parsed.
#[derive(Clone)]
pub struct Captured {
    pub name: String,
    getter: Arc<dyn Fn() -> Value + Send + Sync>,
}

impl Captured {
    pub fn new(name: impl Into<String>, getter: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        Self { name: name.into(), getter: Arc::new(getter) }
    }

    pub fn evaluate(&self) -> Value { (self.getter)() }
}

impl fmt::Debug for Captured {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.debug_struct("Captured").field("name", &self.name).finish() }
}

impl PartialEq for Captured {
    fn eq(&self, other: &Self) -> bool { self.name == other.name && Arc::ptr_eq(&self.getter, &other.getter) }
}

pub fn param() -> Expr { Expr::Param }

/// Member chain from the parameter, e.g. `field("Address.City")`.
pub fn field(path: &str) -> Expr { path.split('.').filter(|s| !s.is_empty()).fold(Expr::Param, Expr::member) }

pub fn lit(value: impl Into<Value>) -> Expr { Expr::Constant(value.into()) }

pub fn captured(name: impl Into<String>, getter: impl Fn() -> Value + Send + Sync + 'static) -> Expr {
    Expr::Captured(Captured::new(name, getter))
}

/// `test ? if_true : if_false`
pub fn cond(test: Expr, if_true: impl Into<Expr>, if_false: impl Into<Expr>) -> Expr {
    Expr::Conditional { test: Box::new(test), if_true: Box::new(if_true.into()), if_false: Box::new(if_false.into()) }
}

impl Expr {
    pub fn member(self, name: &str) -> Expr { Expr::Member { target: Box::new(self), name: name.to_string() } }

    pub fn at(self, index: i64) -> Expr { Expr::Index { target: Box::new(self), index: Box::new(lit(index)) } }

    pub fn key(self, key: &str) -> Expr { Expr::Index { target: Box::new(self), index: Box::new(lit(key)) } }

    fn binary(self, op: BinaryOp, right: impl Into<Expr>) -> Expr { Expr::Binary { left: Box::new(self), op, right: Box::new(right.into()) } }

    fn call(self, method: Method, args: Vec<Expr>) -> Expr { Expr::Call { target: Box::new(self), method, args } }

    pub fn eq(self, right: impl Into<Expr>) -> Expr { self.binary(BinaryOp::Eq, right) }
    pub fn ne(self, right: impl Into<Expr>) -> Expr { self.binary(BinaryOp::Ne, right) }
    pub fn gt(self, right: impl Into<Expr>) -> Expr { self.binary(BinaryOp::Gt, right) }
    pub fn ge(self, right: impl Into<Expr>) -> Expr { self.binary(BinaryOp::Ge, right) }
    pub fn lt(self, right: impl Into<Expr>) -> Expr { self.binary(BinaryOp::Lt, right) }
    pub fn le(self, right: impl Into<Expr>) -> Expr { self.binary(BinaryOp::Le, right) }
    pub fn is_null(self) -> Expr { self.binary(BinaryOp::Eq, Value::Null) }
    pub fn is_not_null(self) -> Expr { self.binary(BinaryOp::Ne, Value::Null) }

    pub fn and(self, right: Expr) -> Expr { self.binary(BinaryOp::And, right) }
    pub fn or(self, right: Expr) -> Expr { self.binary(BinaryOp::Or, right) }
    pub fn not(self) -> Expr { Expr::Unary { op: UnaryOp::Not, operand: Box::new(self) } }

    pub fn add(self, right: impl Into<Expr>) -> Expr { self.binary(BinaryOp::Add, right) }
    pub fn sub(self, right: impl Into<Expr>) -> Expr { self.binary(BinaryOp::Sub, right) }
    pub fn mul(self, right: impl Into<Expr>) -> Expr { self.binary(BinaryOp::Mul, right) }
    pub fn div(self, right: impl Into<Expr>) -> Expr { self.binary(BinaryOp::Div, right) }
    pub fn rem(self, right: impl Into<Expr>) -> Expr { self.binary(BinaryOp::Mod, right) }
    pub fn neg(self) -> Expr { Expr::Unary { op: UnaryOp::Negate, operand: Box::new(self) } }
    /// `self ?? fallback`
    pub fn coalesce(self, fallback: impl Into<Expr>) -> Expr { self.binary(BinaryOp::Coalesce, fallback) }

    pub fn to_lower(self) -> Expr { self.call(Method::ToLower, vec![]) }
    pub fn to_upper(self) -> Expr { self.call(Method::ToUpper, vec![]) }
    pub fn trim(self) -> Expr { self.call(Method::Trim, vec![]) }
    pub fn trim_start(self) -> Expr { self.call(Method::TrimStart, vec![]) }
    pub fn trim_end(self) -> Expr { self.call(Method::TrimEnd, vec![]) }

    pub fn starts_with(self, s: impl Into<Expr>) -> Expr { self.call(Method::StartsWith { ignore_case: false }, vec![s.into()]) }
    pub fn ends_with(self, s: impl Into<Expr>) -> Expr { self.call(Method::EndsWith { ignore_case: false }, vec![s.into()]) }
    pub fn contains(self, s: impl Into<Expr>) -> Expr { self.call(Method::Contains { ignore_case: false }, vec![s.into()]) }
    pub fn starts_with_ignore_case(self, s: impl Into<Expr>) -> Expr { self.call(Method::StartsWith { ignore_case: true }, vec![s.into()]) }
    pub fn ends_with_ignore_case(self, s: impl Into<Expr>) -> Expr { self.call(Method::EndsWith { ignore_case: true }, vec![s.into()]) }
    pub fn contains_ignore_case(self, s: impl Into<Expr>) -> Expr { self.call(Method::Contains { ignore_case: true }, vec![s.into()]) }

    pub fn length(self) -> Expr { self.call(Method::Length, vec![]) }
    pub fn count(self) -> Expr { self.call(Method::Count, vec![]) }

    pub fn is_in<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Expr {
        let values = values.into_iter().map(Into::into).collect();
        self.call(Method::In, vec![Expr::Constant(Value::List(values))])
    }

    pub fn array_contains(self, v: impl Into<Expr>) -> Expr { self.call(Method::ArrayContains, vec![v.into()]) }
    pub fn array_any(self) -> Expr { self.call(Method::ArrayAny, vec![]) }
    pub fn array_empty(self) -> Expr { self.call(Method::ArrayEmpty, vec![]) }
    /// Element count, to be compared with `gt`/`ge`/`lt`/`le`
    pub fn array_count(self) -> Expr { self.call(Method::ArrayCount, vec![]) }
    pub fn array_at(self, index: i64, v: impl Into<Expr>) -> Expr { self.call(Method::ArrayAt, vec![lit(index), v.into()]) }
    pub fn array_first(self, v: impl Into<Expr>) -> Expr { self.call(Method::ArrayFirst, vec![v.into()]) }
    pub fn array_last(self, v: impl Into<Expr>) -> Expr { self.call(Method::ArrayLast, vec![v.into()]) }
    pub fn array_starts_with(self, s: impl Into<Expr>) -> Expr { self.call(Method::ArrayStartsWith, vec![s.into()]) }
    pub fn array_ends_with(self, s: impl Into<Expr>) -> Expr { self.call(Method::ArrayEndsWith, vec![s.into()]) }
    pub fn array_matches(self, pattern: impl Into<Expr>) -> Expr { self.call(Method::ArrayMatches, vec![pattern.into()]) }
    pub fn array_sum(self) -> Expr { self.call(Method::ArraySum, vec![]) }
    pub fn array_avg(self) -> Expr { self.call(Method::ArrayAvg, vec![]) }
    pub fn array_min(self) -> Expr { self.call(Method::ArrayMin, vec![]) }
    pub fn array_max(self) -> Expr { self.call(Method::ArrayMax, vec![]) }

    /// Short name of the node kind, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Expr::Param => "parameter",
            Expr::Member { .. } => "member access",
            Expr::Index { .. } => "index",
            Expr::Constant(_) => "constant",
            Expr::Captured(_) => "captured variable",
            Expr::Unary { .. } => "unary",
            Expr::Binary { .. } => "binary",
            Expr::Conditional { .. } => "conditional",
            Expr::Call { .. } => "method call",
        }
    }

    /// Copy of the tree with every captured variable read exactly once and replaced by its value.
    pub fn snapshot(&self) -> Expr {
        let boxed = |expr: &Expr| Box::new(expr.snapshot());
        match self {
            Expr::Captured(captured) => Expr::Constant(captured.evaluate()),
            Expr::Param | Expr::Constant(_) => self.clone(),
            Expr::Member { target, name } => Expr::Member { target: boxed(target), name: name.clone() },
            Expr::Index { target, index } => Expr::Index { target: boxed(target), index: boxed(index) },
            Expr::Unary { op, operand } => Expr::Unary { op: *op, operand: boxed(operand) },
            Expr::Binary { left, op, right } => Expr::Binary { left: boxed(left), op: *op, right: boxed(right) },
            Expr::Conditional { test, if_true, if_false } => {
                Expr::Conditional { test: boxed(test), if_true: boxed(if_true), if_false: boxed(if_false) }
            }
            Expr::Call { target, method, args } => {
                Expr::Call { target: boxed(target), method: *method, args: args.iter().map(Expr::snapshot).collect() }
            }
        }
    }

    /// Evaluate a sub-tree that does not touch the parameter. Parsers fold a [`Expr::snapshot`], so
    /// captured variables seen here have already been read.
    pub fn fold(&self) -> Option<Value> {
        match self {
            Expr::Constant(value) => Some(value.clone()),
            Expr::Captured(captured) => Some(captured.evaluate()),
            Expr::Unary { op: UnaryOp::Negate, operand } => negate(operand.fold()?),
            Expr::Unary { op: UnaryOp::Not, operand } => match operand.fold()? {
                Value::Bool(b) => Some(Value::Bool(!b)),
                _ => None,
            },
            Expr::Binary { left, op, right } => fold_binary(left.fold()?, *op, right.fold()?),
            Expr::Conditional { test, if_true, if_false } => match test.fold()? {
                Value::Bool(true) => if_true.fold(),
                Value::Bool(false) => if_false.fold(),
                _ => None,
            },
            Expr::Param | Expr::Member { .. } | Expr::Index { .. } | Expr::Call { .. } => None,
        }
    }
}

fn negate(value: Value) -> Option<Value> {
    match value {
        Value::I64(i) => i.checked_neg().map(Value::I64),
        Value::F64(f) => Some(Value::F64(-f)),
        Value::Decimal(d) => Some(Value::Decimal(-d)),
        _ => None,
    }
}

fn fold_binary(left: Value, op: BinaryOp, right: Value) -> Option<Value> {
    use BinaryOp::*;
    match (op, &left, &right) {
        (Eq, _, _) => Some(Value::Bool(left == right)),
        (Ne, _, _) => Some(Value::Bool(left != right)),
        (And, Value::Bool(a), Value::Bool(b)) => Some(Value::Bool(*a && *b)),
        (Or, Value::Bool(a), Value::Bool(b)) => Some(Value::Bool(*a || *b)),
        (Coalesce, Value::Null, _) => Some(right.clone()),
        (Coalesce, _, _) => Some(left.clone()),
        (Add, Value::String(a), Value::String(b)) => Some(Value::String(format!("{a}{b}"))),
        (Add | Sub | Mul | Div | Mod, Value::I64(a), Value::I64(b)) => {
            let result = match op {
                Add => a.checked_add(*b),
                Sub => a.checked_sub(*b),
                Mul => a.checked_mul(*b),
                Div => a.checked_div(*b),
                _ => a.checked_rem(*b),
            };
            result.map(Value::I64)
        }
        (Add | Sub | Mul | Div | Mod, _, _) => {
            let (a, b) = (left.as_f64()?, right.as_f64()?);
            Some(Value::F64(match op {
                Add => a + b,
                Sub => a - b,
                Mul => a * b,
                Div => a / b,
                _ => a % b,
            }))
        }
        (Gt | Ge | Lt | Le, _, _) => {
            let ordering = left.as_f64()?.partial_cmp(&right.as_f64()?)?;
            Some(Value::Bool(match op {
                Gt => ordering.is_gt(),
                Ge => ordering.is_ge(),
                Lt => ordering.is_lt(),
                _ => ordering.is_le(),
            }))
        }
        _ => None,
    }
}

macro_rules! expr_from {
    ($($ty:ty),* $(,)?) => {
        $(impl From<$ty> for Expr {
            fn from(value: $ty) -> Self { Expr::Constant(value.into()) }
        })*
    };
}

expr_from!(Value, bool, u8, i16, i32, i64, f32, f64, Decimal, &str, String, Uuid, DateTime<Utc>, NaiveDateTime, DateTime<FixedOffset>, ListItemRef);
