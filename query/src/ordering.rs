//! Key-selector parsing into [`OrderingExpression`]s.
//!
//! A selector whose root is arithmetic, a string function or a negation becomes a computed ordering over a
//! [`ValueExpression`] tree. Anything else must reduce to a single property access.

use std::sync::Arc;

use tracing::trace;

use crate::ast::{ArithmeticOperator, Direction, OrderingExpression, StringFunction, ValueExpression};
use crate::error::QueryError;
use crate::expr::{BinaryOp, Expr, Method, UnaryOp};
use crate::property::{self, Origin, PropertyFunction, PropertyRef};
use crate::scheme::SchemeDef;
use crate::value::Value;

pub fn parse_ordering(expr: &Expr, direction: Direction, view: Origin, scheme: &SchemeDef) -> Result<OrderingExpression, QueryError> {
    OrderingParser { scheme, view }.parse(expr, direction)
}

struct OrderingParser<'a> {
    scheme: &'a SchemeDef,
    view: Origin,
}

impl OrderingParser<'_> {
    fn parse(&self, expr: &Expr, direction: Direction) -> Result<OrderingExpression, QueryError> {
        let expr = &expr.snapshot();
        if is_computed(expr) {
            let value = self.value(expr)?;
            let property = value.primary_property().cloned().ok_or(QueryError::MissingProperty)?;
            trace!(field = %property.field_key(), "computed ordering");
            return Ok(OrderingExpression { property, direction, computed: Some(Arc::new(value)) });
        }
        Ok(OrderingExpression::simple(self.extract(expr)?, direction))
    }

    fn property(&self, expr: &Expr) -> Result<Option<PropertyRef>, QueryError> {
        if let Some(property) = property::resolve(expr, self.view, self.scheme)? {
            return Ok(Some(property));
        }
        match expr {
            Expr::Call { target, method: Method::Length, .. } => self.function(target, PropertyFunction::Length),
            Expr::Call { target, method: Method::Count, .. } => self.function(target, PropertyFunction::Count),
            _ => Ok(None),
        }
    }

    fn function(&self, target: &Expr, function: PropertyFunction) -> Result<Option<PropertyRef>, QueryError> {
        match property::resolve(target, self.view, self.scheme)? {
            Some(property) => property.with_function(function).map(Some),
            None => Ok(None),
        }
    }

    /// Simple extraction. Tolerates `c ? x.A : x.B` and `x.A != null` / `x.A ?? y` by taking the side that is a property.
    fn extract(&self, expr: &Expr) -> Result<PropertyRef, QueryError> {
        if let Some(property) = self.property(expr)? {
            return Ok(property);
        }
        let (first, second) = match expr {
            Expr::Conditional { if_true, if_false, .. } => (if_true, if_false),
            Expr::Binary { left, op, right } if op.is_comparison() || *op == BinaryOp::Coalesce => (left, right),
            other => return Err(QueryError::unsupported(other.kind(), "ordering key must be a property access")),
        };
        match self.property(first)? {
            Some(property) => Ok(property),
            None => self.property(second)?.ok_or_else(|| QueryError::unsupported(expr.kind(), "no branch is a property access")),
        }
    }

    fn value(&self, expr: &Expr) -> Result<ValueExpression, QueryError> {
        if let Some(value) = expr.fold() {
            return Ok(ValueExpression::constant(value));
        }
        if let Some(property) = self.property(expr)? {
            return Ok(ValueExpression::PropertyValue(property));
        }
        match expr {
            Expr::Binary { left, op, right } => match arithmetic(*op) {
                Some(op) => Ok(ValueExpression::Arithmetic { left: Box::new(self.value(left)?), op, right: Box::new(self.value(right)?) }),
                None => Err(QueryError::unsupported_operator(op, "computed ordering")),
            },
            // -x is ordered as 0 - x
            Expr::Unary { op: UnaryOp::Negate, operand } => Ok(ValueExpression::Arithmetic {
                left: Box::new(ValueExpression::constant(Value::I64(0))),
                op: ArithmeticOperator::Sub,
                right: Box::new(self.value(operand)?),
            }),
            Expr::Call { target, method, .. } => match string_function(*method) {
                Some(function) => Ok(ValueExpression::FunctionCall { function, argument: Box::new(self.value(target)?) }),
                None => Err(QueryError::unsupported("method call", format!("{method:?} in computed ordering"))),
            },
            other => Err(QueryError::unsupported(other.kind(), "not supported in computed ordering")),
        }
    }
}

fn is_computed(expr: &Expr) -> bool {
    match expr {
        Expr::Binary { op, .. } => op.is_arithmetic(),
        Expr::Unary { op: UnaryOp::Negate, .. } => true,
        Expr::Call { method, .. } => string_function(*method).is_some(),
        _ => false,
    }
}

fn arithmetic(op: BinaryOp) -> Option<ArithmeticOperator> {
    match op {
        BinaryOp::Add => Some(ArithmeticOperator::Add),
        BinaryOp::Sub => Some(ArithmeticOperator::Sub),
        BinaryOp::Mul => Some(ArithmeticOperator::Mul),
        BinaryOp::Div => Some(ArithmeticOperator::Div),
        BinaryOp::Mod => Some(ArithmeticOperator::Mod),
        _ => None,
    }
}

fn string_function(method: Method) -> Option<StringFunction> {
    match method {
        Method::ToLower => Some(StringFunction::ToLower),
        Method::ToUpper => Some(StringFunction::ToUpper),
        Method::Trim => Some(StringFunction::Trim),
        Method::TrimStart => Some(StringFunction::TrimStart),
        Method::TrimEnd => Some(StringFunction::TrimEnd),
        _ => None,
    }
}
