use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::property::PropertyRef;
use crate::value::{TypeTag, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterExpression {
    Comparison { property: PropertyRef, operator: FilterOperator, value: Value },
    Logical { operator: LogicalOperator, operands: Vec<FilterExpression> },
    NullCheck { property: PropertyRef, is_null: bool },
    In { property: PropertyRef, values: Vec<Value> },
    /// Literal `true` (no restriction) or `false` (provably empty)
    Constant(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOperator {
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOperator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

impl ComparisonOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            ComparisonOperator::Equal => "$eq",
            ComparisonOperator::NotEqual => "$ne",
            ComparisonOperator::GreaterThan => "$gt",
            ComparisonOperator::GreaterThanOrEqual => "$gte",
            ComparisonOperator::LessThan => "$lt",
            ComparisonOperator::LessThanOrEqual => "$lte",
        }
    }

    /// The operator that holds when both operands swap sides.
    pub fn flipped(&self) -> Self {
        match self {
            ComparisonOperator::GreaterThan => ComparisonOperator::LessThan,
            ComparisonOperator::GreaterThanOrEqual => ComparisonOperator::LessThanOrEqual,
            ComparisonOperator::LessThan => ComparisonOperator::GreaterThan,
            ComparisonOperator::LessThanOrEqual => ComparisonOperator::GreaterThanOrEqual,
            other => *other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArrayAggregate {
    Sum,
    Avg,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOperator {
    Compare(ComparisonOperator),
    StartsWith,
    EndsWith,
    Contains,
    StartsWithIgnoreCase,
    EndsWithIgnoreCase,
    ContainsIgnoreCase,
    Exists,
    ArrayContains,
    ArrayAny,
    ArrayEmpty,
    ArrayCountGt,
    ArrayCountGte,
    ArrayCountLt,
    ArrayCountLte,
    ArrayAt { index: i64 },
    ArrayFirst,
    ArrayLast,
    ArrayStartsWith,
    ArrayEndsWith,
    ArrayMatches,
    /// Aggregate over the elements, compared with the nested operator
    ArrayAggregate { function: ArrayAggregate, compare: ComparisonOperator },
}

impl FilterOperator {
    pub const EQUAL: FilterOperator = FilterOperator::Compare(ComparisonOperator::Equal);

    pub fn symbol(&self) -> &'static str {
        match self {
            FilterOperator::Compare(op) => op.symbol(),
            FilterOperator::StartsWith => "$startsWith",
            FilterOperator::EndsWith => "$endsWith",
            FilterOperator::Contains => "$contains",
            FilterOperator::StartsWithIgnoreCase => "$startsWithIgnoreCase",
            FilterOperator::EndsWithIgnoreCase => "$endsWithIgnoreCase",
            FilterOperator::ContainsIgnoreCase => "$containsIgnoreCase",
            FilterOperator::Exists => "$exists",
            FilterOperator::ArrayContains => "$arrayContains",
            FilterOperator::ArrayAny => "$arrayAny",
            FilterOperator::ArrayEmpty => "$arrayEmpty",
            FilterOperator::ArrayCountGt => "$arrayCountGt",
            FilterOperator::ArrayCountGte => "$arrayCountGte",
            FilterOperator::ArrayCountLt => "$arrayCountLt",
            FilterOperator::ArrayCountLte => "$arrayCountLte",
            FilterOperator::ArrayAt { .. } => "$arrayAt",
            FilterOperator::ArrayFirst => "$arrayFirst",
            FilterOperator::ArrayLast => "$arrayLast",
            FilterOperator::ArrayStartsWith => "$arrayStartsWith",
            FilterOperator::ArrayEndsWith => "$arrayEndsWith",
            FilterOperator::ArrayMatches => "$arrayMatches",
            FilterOperator::ArrayAggregate { function: ArrayAggregate::Sum, .. } => "$arraySum",
            FilterOperator::ArrayAggregate { function: ArrayAggregate::Avg, .. } => "$arrayAvg",
            FilterOperator::ArrayAggregate { function: ArrayAggregate::Min, .. } => "$arrayMin",
            FilterOperator::ArrayAggregate { function: ArrayAggregate::Max, .. } => "$arrayMax",
        }
    }

    pub fn is_comparison(&self) -> bool { matches!(self, FilterOperator::Compare(_)) }

    pub fn is_array(&self) -> bool {
        matches!(
            self,
            FilterOperator::ArrayContains
                | FilterOperator::ArrayAny
                | FilterOperator::ArrayEmpty
                | FilterOperator::ArrayCountGt
                | FilterOperator::ArrayCountGte
                | FilterOperator::ArrayCountLt
                | FilterOperator::ArrayCountLte
                | FilterOperator::ArrayAt { .. }
                | FilterOperator::ArrayFirst
                | FilterOperator::ArrayLast
                | FilterOperator::ArrayStartsWith
                | FilterOperator::ArrayEndsWith
                | FilterOperator::ArrayMatches
                | FilterOperator::ArrayAggregate { .. }
        )
    }

    /// Type the operand is coerced to, given the field's declared type.
    pub fn operand_type(&self, declared: &TypeTag) -> TypeTag {
        match self {
            FilterOperator::Compare(_) => declared.clone(),
            FilterOperator::StartsWith
            | FilterOperator::EndsWith
            | FilterOperator::Contains
            | FilterOperator::StartsWithIgnoreCase
            | FilterOperator::EndsWithIgnoreCase
            | FilterOperator::ContainsIgnoreCase
            | FilterOperator::ArrayStartsWith
            | FilterOperator::ArrayEndsWith
            | FilterOperator::ArrayMatches => match declared.element() {
                TypeTag::String => TypeTag::String,
                // `Contains` on a non-text collection compares elements
                other => other.clone(),
            },
            FilterOperator::Exists | FilterOperator::ArrayAny | FilterOperator::ArrayEmpty => TypeTag::Bool,
            FilterOperator::ArrayCountGt | FilterOperator::ArrayCountGte | FilterOperator::ArrayCountLt | FilterOperator::ArrayCountLte => {
                TypeTag::Long
            }
            FilterOperator::ArrayAggregate { function: ArrayAggregate::Avg, .. } => TypeTag::Double,
            FilterOperator::ArrayContains
            | FilterOperator::ArrayAt { .. }
            | FilterOperator::ArrayFirst
            | FilterOperator::ArrayLast
            | FilterOperator::ArrayAggregate { .. } => declared.element().clone(),
        }
    }
}

impl From<ComparisonOperator> for FilterOperator {
    fn from(op: ComparisonOperator) -> Self { FilterOperator::Compare(op) }
}

impl FilterExpression {
    /// Canonical always-false predicate.
    pub fn always_false() -> Self { FilterExpression::Constant(false) }

    /// Build a comparison, rejecting operators a property function cannot take.
    pub fn comparison(property: PropertyRef, operator: impl Into<FilterOperator>, value: impl Into<Value>) -> Result<Self, QueryError> {
        let operator = operator.into();
        if property.function.is_some() && !operator.is_comparison() {
            return Err(QueryError::unsupported_operator(operator, "property function"));
        }
        Ok(FilterExpression::Comparison { property, operator, value: value.into() })
    }

    /// Empty value sets normalize to the always-false predicate.
    pub fn is_in(property: PropertyRef, values: Vec<Value>) -> Self {
        if values.is_empty() {
            return Self::always_false();
        }
        FilterExpression::In { property, values }
    }

    pub fn negate(inner: FilterExpression) -> Self {
        match inner {
            FilterExpression::Constant(b) => FilterExpression::Constant(!b),
            inner => FilterExpression::Logical { operator: LogicalOperator::Not, operands: vec![inner] },
        }
    }

    /// Conjunction of two filters, flattening nested ANDs.
    pub fn and(left: FilterExpression, right: FilterExpression) -> Self {
        let mut operands = Vec::new();
        for operand in [left, right] {
            match operand {
                FilterExpression::Logical { operator: LogicalOperator::And, operands: inner } => operands.extend(inner),
                other => operands.push(other),
            }
        }
        FilterExpression::Logical { operator: LogicalOperator::And, operands }
    }

    pub fn is_always_false(&self) -> bool { matches!(self, FilterExpression::Constant(false)) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueExpression {
    PropertyValue(PropertyRef),
    Constant { value: Value, ty: TypeTag },
    Arithmetic { left: Box<ValueExpression>, op: ArithmeticOperator, right: Box<ValueExpression> },
    FunctionCall { function: StringFunction, argument: Box<ValueExpression> },
}

impl ValueExpression {
    pub fn constant(value: Value) -> Self {
        let ty = value.type_tag();
        ValueExpression::Constant { value, ty }
    }

    /// Left-most property leaf: arithmetic prefers `left`, then `right`; a function call uses its argument.
    pub fn primary_property(&self) -> Option<&PropertyRef> {
        match self {
            ValueExpression::PropertyValue(property) => Some(property),
            ValueExpression::Constant { .. } => None,
            ValueExpression::Arithmetic { left, right, .. } => left.primary_property().or_else(|| right.primary_property()),
            ValueExpression::FunctionCall { argument, .. } => argument.primary_property(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArithmeticOperator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithmeticOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            ArithmeticOperator::Add => "$add",
            ArithmeticOperator::Sub => "$sub",
            ArithmeticOperator::Mul => "$mul",
            ArithmeticOperator::Div => "$div",
            ArithmeticOperator::Mod => "$mod",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StringFunction {
    ToLower,
    ToUpper,
    Trim,
    TrimStart,
    TrimEnd,
}

impl StringFunction {
    pub fn symbol(&self) -> &'static str {
        match self {
            StringFunction::ToLower => "$toLower",
            StringFunction::ToUpper => "$toUpper",
            StringFunction::Trim => "$trim",
            StringFunction::TrimStart => "$trimStart",
            StringFunction::TrimEnd => "$trimEnd",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderingExpression {
    /// For computed orderings, the primary (left-most) property of the tree
    pub property: PropertyRef,
    pub direction: Direction,
    pub computed: Option<Arc<ValueExpression>>,
}

impl OrderingExpression {
    pub fn simple(property: PropertyRef, direction: Direction) -> Self { Self { property, direction, computed: None } }

    pub fn is_computed(&self) -> bool { self.computed.is_some() }
}
