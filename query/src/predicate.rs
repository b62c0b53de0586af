//! Translation of boolean [`Expr`] trees into [`FilterExpression`]s.

use tracing::trace;

use crate::ast::{ArrayAggregate, ComparisonOperator, FilterExpression, FilterOperator, LogicalOperator};
use crate::error::QueryError;
use crate::expr::{BinaryOp, Expr, Method, UnaryOp};
use crate::property::{self, Origin, PropertyFunction, PropertyRef};
use crate::scheme::SchemeDef;
use crate::value::{TypeTag, Value};

pub struct PredicateParser<'a> {
    scheme: &'a SchemeDef,
    view: Origin,
}

/// Left side of a comparison once it has been recognized.
enum Target {
    Property(PropertyRef),
    ArrayCount(PropertyRef),
    Aggregate(PropertyRef, ArrayAggregate),
}

enum Operand {
    Value(Value),
    Target(Target),
}

pub fn parse_predicate(expr: &Expr, view: Origin, scheme: &SchemeDef) -> Result<FilterExpression, QueryError> {
    PredicateParser::new(scheme, view).parse(expr)
}

impl<'a> PredicateParser<'a> {
    pub fn new(scheme: &'a SchemeDef, view: Origin) -> Self { Self { scheme, view } }

    /// Parse a predicate. Captured variables are read once, up front.
    pub fn parse(&self, expr: &Expr) -> Result<FilterExpression, QueryError> { self.node(&expr.snapshot()) }

    fn node(&self, expr: &Expr) -> Result<FilterExpression, QueryError> {
        if let Some(value) = expr.fold() {
            return match value {
                Value::Bool(b) => Ok(FilterExpression::Constant(b)),
                other => Err(QueryError::unsupported("constant", format!("{} constant is not a predicate", other.kind()))),
            };
        }

        trace!(kind = expr.kind(), "parsing predicate node");
        match expr {
            Expr::Binary { op: op @ (BinaryOp::And | BinaryOp::Or), .. } => {
                let mut operands = Vec::new();
                self.collect(expr, *op, &mut operands)?;
                Ok(simplify(if *op == BinaryOp::And { LogicalOperator::And } else { LogicalOperator::Or }, operands))
            }
            Expr::Unary { op: UnaryOp::Not, operand } => Ok(FilterExpression::negate(self.node(operand)?)),
            Expr::Binary { left, op, right } if op.is_comparison() => self.comparison(left, comparison_operator(*op), right),
            Expr::Member { .. } | Expr::Index { .. } => self.boolean_property(expr),
            Expr::Call { target, method, args } => self.call(target, *method, args),
            other => Err(QueryError::unsupported(other.kind(), "not a boolean expression")),
        }
    }

    /// Flatten a chain of the same logical operator.
    fn collect(&self, expr: &Expr, op: BinaryOp, out: &mut Vec<FilterExpression>) -> Result<(), QueryError> {
        match expr {
            Expr::Binary { left, op: inner, right } if *inner == op => {
                self.collect(left, op, out)?;
                self.collect(right, op, out)
            }
            other => {
                out.push(self.node(other)?);
                Ok(())
            }
        }
    }

    fn property(&self, expr: &Expr) -> Result<Option<PropertyRef>, QueryError> { property::resolve(expr, self.view, self.scheme) }

    fn target_property(&self, target: &Expr, method: Method) -> Result<PropertyRef, QueryError> {
        self.property(target)?.ok_or_else(|| QueryError::unsupported("method call", format!("{method:?} must be called on a property")))
    }

    fn boolean_property(&self, expr: &Expr) -> Result<FilterExpression, QueryError> {
        let property = self.property(expr)?.ok_or_else(|| QueryError::unsupported(expr.kind(), "not a property access"))?;
        if property.declared_type != TypeTag::Bool {
            return Err(QueryError::unsupported("member access", format!("{} is not boolean", property.path)));
        }
        FilterExpression::comparison(property, ComparisonOperator::Equal, true)
    }

    fn operand(&self, expr: &Expr) -> Result<Operand, QueryError> {
        if let Some(value) = expr.fold() {
            return Ok(Operand::Value(finite(value)?));
        }
        if let Some(property) = self.property(expr)? {
            return Ok(Operand::Target(Target::Property(property)));
        }
        match expr {
            Expr::Call { target, method: method @ (Method::Length | Method::Count), .. } => {
                let function = if *method == Method::Length { PropertyFunction::Length } else { PropertyFunction::Count };
                let property = self.target_property(target, *method)?.with_function(function)?;
                Ok(Operand::Target(Target::Property(property)))
            }
            Expr::Call { target, method: Method::ArrayCount, .. } => {
                Ok(Operand::Target(Target::ArrayCount(self.target_property(target, Method::ArrayCount)?)))
            }
            Expr::Call { target, method, .. } if aggregate(*method).is_some() => {
                let function = aggregate(*method).ok_or(QueryError::MissingProperty)?;
                Ok(Operand::Target(Target::Aggregate(self.target_property(target, *method)?, function)))
            }
            Expr::Call { method: Method::ToLower | Method::ToUpper | Method::Trim | Method::TrimStart | Method::TrimEnd, .. } => {
                Err(QueryError::FeatureRestricted { feature: "string function filter expressions" })
            }
            Expr::Binary { op, .. } if op.is_arithmetic() => Err(QueryError::FeatureRestricted { feature: "arithmetic filter expressions" }),
            Expr::Unary { op: UnaryOp::Negate, .. } => Err(QueryError::FeatureRestricted { feature: "arithmetic filter expressions" }),
            other => Err(QueryError::unsupported(other.kind(), "cannot be used as a comparison operand")),
        }
    }

    fn comparison(&self, left: &Expr, op: ComparisonOperator, right: &Expr) -> Result<FilterExpression, QueryError> {
        match (self.operand(left)?, self.operand(right)?) {
            (Operand::Target(target), Operand::Value(value)) => build(target, op, value),
            (Operand::Value(value), Operand::Target(target)) => build(target, op.flipped(), value),
            (Operand::Target(_), Operand::Target(_)) => Err(QueryError::unsupported("comparison", "property-to-property comparison")),
            (Operand::Value(l), Operand::Value(r)) => {
                Err(QueryError::unsupported("comparison", format!("cannot compare {} with {}", l.kind(), r.kind())))
            }
        }
    }

    fn call(&self, target: &Expr, method: Method, args: &[Expr]) -> Result<FilterExpression, QueryError> {
        let operator = match method {
            Method::StartsWith { ignore_case: false } => FilterOperator::StartsWith,
            Method::EndsWith { ignore_case: false } => FilterOperator::EndsWith,
            Method::Contains { ignore_case: false } => FilterOperator::Contains,
            Method::StartsWith { ignore_case: true } => FilterOperator::StartsWithIgnoreCase,
            Method::EndsWith { ignore_case: true } => FilterOperator::EndsWithIgnoreCase,
            Method::Contains { ignore_case: true } => FilterOperator::ContainsIgnoreCase,
            Method::ArrayContains => FilterOperator::ArrayContains,
            Method::ArrayFirst => FilterOperator::ArrayFirst,
            Method::ArrayLast => FilterOperator::ArrayLast,
            Method::ArrayStartsWith => FilterOperator::ArrayStartsWith,
            Method::ArrayEndsWith => FilterOperator::ArrayEndsWith,
            Method::ArrayMatches => FilterOperator::ArrayMatches,
            Method::ArrayAny => return FilterExpression::comparison(self.target_property(target, method)?, FilterOperator::ArrayAny, true),
            Method::ArrayEmpty => return FilterExpression::comparison(self.target_property(target, method)?, FilterOperator::ArrayEmpty, true),
            Method::ArrayAt => {
                let index = match argument(args, 0)? {
                    Value::I64(index) => index,
                    other => return Err(QueryError::unsupported("method call", format!("array index must be an integer, got {}", other.kind()))),
                };
                let property = self.target_property(target, method)?;
                return FilterExpression::comparison(property, FilterOperator::ArrayAt { index }, argument(args, 1)?);
            }
            Method::In => {
                let property = self.target_property(target, method)?;
                let values = match argument(args, 0)? {
                    Value::List(values) => values,
                    single => vec![single],
                };
                return Ok(FilterExpression::is_in(property, values));
            }
            other => return Err(QueryError::unsupported("method call", format!("{other:?} is not a boolean expression"))),
        };
        FilterExpression::comparison(self.target_property(target, method)?, operator, argument(args, 0)?)
    }
}

fn build(target: Target, op: ComparisonOperator, value: Value) -> Result<FilterExpression, QueryError> {
    match target {
        Target::Property(property) if value.is_null() => {
            if property.function.is_some() {
                return Err(QueryError::unsupported("null check", "property functions are never null"));
            }
            match op {
                ComparisonOperator::Equal => Ok(FilterExpression::NullCheck { property, is_null: true }),
                ComparisonOperator::NotEqual => Ok(FilterExpression::NullCheck { property, is_null: false }),
                other => Err(QueryError::unsupported_operator(other, "null comparison")),
            }
        }
        Target::Property(property) => FilterExpression::comparison(property, op, value),
        Target::ArrayCount(property) => {
            let operator = match op {
                ComparisonOperator::GreaterThan => FilterOperator::ArrayCountGt,
                ComparisonOperator::GreaterThanOrEqual => FilterOperator::ArrayCountGte,
                ComparisonOperator::LessThan => FilterOperator::ArrayCountLt,
                ComparisonOperator::LessThanOrEqual => FilterOperator::ArrayCountLte,
                other => return Err(QueryError::unsupported_operator(other, "array count")),
            };
            FilterExpression::comparison(property, operator, value)
        }
        Target::Aggregate(property, function) => {
            FilterExpression::comparison(property, FilterOperator::ArrayAggregate { function, compare: op }, value)
        }
    }
}

/// Drop neutral constants and collapse absorbing ones, so a provably empty predicate becomes `Constant(false)`.
fn simplify(operator: LogicalOperator, operands: Vec<FilterExpression>) -> FilterExpression {
    let (neutral, absorbing) = match operator {
        LogicalOperator::Or => (false, true),
        _ => (true, false),
    };
    let mut kept = Vec::with_capacity(operands.len());
    for operand in operands {
        match operand {
            FilterExpression::Constant(b) if b == absorbing => return FilterExpression::Constant(absorbing),
            FilterExpression::Constant(b) if b == neutral => {}
            other => kept.push(other),
        }
    }
    match kept.len() {
        0 => FilterExpression::Constant(neutral),
        1 => kept.remove(0),
        _ => FilterExpression::Logical { operator, operands: kept },
    }
}

fn argument(args: &[Expr], index: usize) -> Result<Value, QueryError> {
    let arg = args.get(index).ok_or_else(|| QueryError::unsupported("method call", format!("missing argument {index}")))?;
    let value = arg.fold().ok_or_else(|| QueryError::unsupported(arg.kind(), "method arguments must not depend on the parameter"))?;
    finite(value)
}

/// NaN and infinities have no JSON form, so they cannot be compared against.
fn finite(value: Value) -> Result<Value, QueryError> {
    let non_finite = match &value {
        Value::F64(f) => !f.is_finite(),
        Value::List(items) => items.iter().any(|item| matches!(item, Value::F64(f) if !f.is_finite())),
        _ => false,
    };
    if non_finite {
        return Err(QueryError::InvalidArgument { operation: "filter", reason: format!("non-finite number in {value:?}") });
    }
    Ok(value)
}

fn aggregate(method: Method) -> Option<ArrayAggregate> {
    match method {
        Method::ArraySum => Some(ArrayAggregate::Sum),
        Method::ArrayAvg => Some(ArrayAggregate::Avg),
        Method::ArrayMin => Some(ArrayAggregate::Min),
        Method::ArrayMax => Some(ArrayAggregate::Max),
        _ => None,
    }
}

fn comparison_operator(op: BinaryOp) -> ComparisonOperator {
    match op {
        BinaryOp::Ne => ComparisonOperator::NotEqual,
        BinaryOp::Gt => ComparisonOperator::GreaterThan,
        BinaryOp::Ge => ComparisonOperator::GreaterThanOrEqual,
        BinaryOp::Lt => ComparisonOperator::LessThan,
        BinaryOp::Le => ComparisonOperator::LessThanOrEqual,
        _ => ComparisonOperator::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{captured, field, lit};
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    fn scheme() -> SchemeDef {
        SchemeDef::new(1, "Product")
            .field("Name", TypeTag::String)
            .field("Price", TypeTag::Double)
            .field("Stock", TypeTag::Int)
            .field("IsActive", TypeTag::Bool)
            .field("Tags", TypeTag::Array(Box::new(TypeTag::String)))
            .field("Scores", TypeTag::Array(Box::new(TypeTag::Int)))
    }

    fn parse(expr: Expr) -> Result<FilterExpression, QueryError> { parse_predicate(&expr, Origin::Props, &scheme()) }

    fn prop(path: &str, ty: TypeTag) -> PropertyRef { PropertyRef::dynamic(path, ty) }

    #[test]
    fn test_simple_comparison() {
        assert_eq!(
            parse(field("Price").gt(100)).unwrap(),
            FilterExpression::Comparison {
                property: prop("Price", TypeTag::Double),
                operator: FilterOperator::Compare(ComparisonOperator::GreaterThan),
                value: Value::I64(100),
            }
        );
    }

    #[test]
    fn test_reversed_operands_flip_operator() {
        let FilterExpression::Comparison { operator, .. } = parse(lit(100).lt(field("Price"))).unwrap() else { panic!("expected comparison") };
        assert_eq!(operator, FilterOperator::Compare(ComparisonOperator::GreaterThan));
    }

    #[test]
    fn test_and_chain_is_flattened() {
        let FilterExpression::Logical { operator, operands } =
            parse(field("Price").gt(1).and(field("Stock").lt(5)).and(field("Name").eq("x"))).unwrap()
        else {
            panic!("expected logical")
        };
        assert_eq!(operator, LogicalOperator::And);
        assert_eq!(operands.len(), 3);
    }

    #[test]
    fn test_null_comparisons_become_null_checks() {
        assert_eq!(parse(field("Name").is_null()).unwrap(), FilterExpression::NullCheck { property: prop("Name", TypeTag::String), is_null: true });
        assert_eq!(
            parse(field("Name").ne(Value::Null)).unwrap(),
            FilterExpression::NullCheck { property: prop("Name", TypeTag::String), is_null: false }
        );
    }

    #[test]
    fn test_boolean_member_and_negation() {
        let active = FilterExpression::comparison(prop("IsActive", TypeTag::Bool), ComparisonOperator::Equal, true).unwrap();
        assert_eq!(parse(field("IsActive")).unwrap(), active);
        assert_eq!(parse(field("IsActive").not()).unwrap(), FilterExpression::negate(active));
    }

    #[test]
    fn test_constant_false_is_absorbing() {
        assert_eq!(parse(lit(false)).unwrap(), FilterExpression::Constant(false));
        assert_eq!(parse(field("Price").gt(1).and(lit(false))).unwrap(), FilterExpression::Constant(false));
        assert_eq!(parse(field("Price").gt(1).or(lit(true))).unwrap(), FilterExpression::Constant(true));
        assert_eq!(parse(field("Price").is_in(Vec::<i64>::new())).unwrap(), FilterExpression::Constant(false));
    }

    #[test]
    fn test_non_finite_numbers_are_rejected() {
        assert!(matches!(parse(field("Price").gt(f64::NAN)), Err(QueryError::InvalidArgument { operation: "filter", .. })));
        assert!(matches!(parse(lit(f64::INFINITY).le(field("Price"))), Err(QueryError::InvalidArgument { .. })));
        assert!(matches!(parse(field("Price").is_in([1.0, f64::NEG_INFINITY])), Err(QueryError::InvalidArgument { .. })));
    }

    #[test]
    fn test_length_function() {
        let FilterExpression::Comparison { property, .. } = parse(field("Name").length().gt(3)).unwrap() else { panic!("expected comparison") };
        assert_eq!(property.function, Some(PropertyFunction::Length));
    }

    #[test]
    fn test_array_operators() {
        let FilterExpression::Comparison { operator, .. } = parse(field("Scores").array_count().ge(2)).unwrap() else { panic!() };
        assert_eq!(operator, FilterOperator::ArrayCountGte);
        let FilterExpression::Comparison { operator, .. } = parse(field("Scores").array_sum().gt(10)).unwrap() else { panic!() };
        assert_eq!(operator, FilterOperator::ArrayAggregate { function: ArrayAggregate::Sum, compare: ComparisonOperator::GreaterThan });
        assert!(matches!(parse(field("Scores").array_count().eq(2)), Err(QueryError::UnsupportedOperator { .. })));
    }

    #[test]
    fn test_arithmetic_is_feature_restricted() {
        assert_eq!(parse(field("Price").mul(2).gt(10)), Err(QueryError::FeatureRestricted { feature: "arithmetic filter expressions" }));
        assert_eq!(parse(field("Name").to_lower().eq("x")), Err(QueryError::FeatureRestricted { feature: "string function filter expressions" }));
    }

    #[test]
    fn test_unsupported_shapes() {
        assert!(matches!(parse(field("Price").eq(field("Stock"))), Err(QueryError::UnsupportedExpression { .. })));
        assert!(matches!(parse(field("Price")), Err(QueryError::UnsupportedExpression { .. })));
        assert!(matches!(parse(lit(5)), Err(QueryError::UnsupportedExpression { .. })));
    }

    #[test]
    fn test_captured_value_is_snapshotted() {
        let parsed = parse(field("Stock").eq(captured("min", || Value::I64(3)))).unwrap();
        let FilterExpression::Comparison { value, .. } = parsed else { panic!() };
        assert_eq!(value, Value::I64(3));
    }

    #[test]
    fn test_captured_value_is_read_once_per_parse() {
        let reads = Arc::new(AtomicI64::new(0));
        let min = {
            let reads = reads.clone();
            captured("min", move || Value::I64(3 + reads.fetch_add(1, Ordering::SeqCst)))
        };
        let parsed = parse(min.lt(field("Stock")).and(field("IsActive")).and(field("Name").is_not_null().not())).unwrap();
        assert_eq!(reads.load(Ordering::SeqCst), 1);
        let FilterExpression::Logical { operands, .. } = parsed else { panic!("expected AND") };
        assert_eq!(operands.len(), 3);
    }
}
