//! Facet compiler: turns filter and ordering ASTs into the JSON documents consumed by the store's search functions.

use std::collections::HashSet;

use serde_json::{json, Map, Value as JsonValue};
use tracing::{debug, trace};

use crate::ast::{FilterExpression, FilterOperator, LogicalOperator, OrderingExpression, ValueExpression};
use crate::coerce::{coerce, to_json, to_json_for_equality};
use crate::error::QueryError;
use crate::property::PropertyRef;
use crate::value::Value;

const AND: &str = "$and";
const OR: &str = "$or";
const NOT: &str = "$not";

/// Compile an optional filter. `None` is the empty document.
pub fn compile_filter(filter: Option<&FilterExpression>) -> Result<JsonValue, QueryError> {
    let document = match filter {
        Some(filter) => compile(filter)?,
        None => JsonValue::Object(Map::new()),
    };
    debug!(filter = %document, "compiled filter document");
    Ok(document)
}

/// The canonical always-false document.
pub fn always_false() -> JsonValue { json!({ "$not": {} }) }

fn compile(filter: &FilterExpression) -> Result<JsonValue, QueryError> {
    match filter {
        FilterExpression::Comparison { property, operator, value } => comparison(property, *operator, value),
        FilterExpression::Logical { operator: LogicalOperator::And, operands } => match operands.as_slice() {
            [single] => compile(single),
            operands => Ok(conjoin(operands.iter().map(compile).collect::<Result<Vec<_>, _>>()?)),
        },
        FilterExpression::Logical { operator: LogicalOperator::Or, operands } => {
            Ok(json!({ "$or": operands.iter().map(compile).collect::<Result<Vec<_>, _>>()? }))
        }
        FilterExpression::Logical { operator: LogicalOperator::Not, operands } => match operands.as_slice() {
            [operand] => Ok(json!({ "$not": compile(operand)? })),
            _ => Err(QueryError::unsupported("logical", format!("NOT takes exactly one operand, got {}", operands.len()))),
        },
        FilterExpression::NullCheck { property, is_null } => Ok(null_check(property, *is_null)),
        FilterExpression::In { property, values } if values.is_empty() => {
            trace!(field = %property.field_key(), "empty IN set");
            Ok(always_false())
        }
        FilterExpression::In { property, values } => {
            let ty = property.value_type();
            let values: Vec<JsonValue> = values.iter().map(|value| to_json(&coerce(value, ty.element()))).collect();
            Ok(single(property.field_key(), json!({ "$in": values })))
        }
        FilterExpression::Constant(true) => Ok(JsonValue::Object(Map::new())),
        FilterExpression::Constant(false) => Ok(always_false()),
    }
}

fn comparison(property: &PropertyRef, operator: FilterOperator, value: &Value) -> Result<JsonValue, QueryError> {
    if property.function.is_some() && !operator.is_comparison() {
        return Err(QueryError::unsupported_operator(operator, "property function"));
    }
    let mut key = property.field_key();
    if operator.is_array() && !key.contains("[]") {
        key.push_str("[]");
    }

    let target = match property.function {
        Some(_) => property.value_type(),
        None => operator.operand_type(&property.declared_type),
    };
    let coerced = coerce(value, &target);
    let rendered = match operator {
        FilterOperator::EQUAL => to_json_for_equality(&coerced, &property.value_type()),
        FilterOperator::ArrayAt { index } => json!({ "index": index, "value": to_json(&coerced) }),
        FilterOperator::ArrayAggregate { compare, .. } => single(compare.symbol().to_string(), to_json(&coerced)),
        _ => to_json(&coerced),
    };
    trace!(field = %key, operator = operator.symbol(), "compiled comparison");
    Ok(single(key, single(operator.symbol().to_string(), rendered)))
}

/// Base fields are nullable columns; dynamic attributes are optional rows, so "is null" means "does not exist".
fn null_check(property: &PropertyRef, is_null: bool) -> JsonValue {
    let condition = match (is_null, property.is_base_field) {
        (true, true) => JsonValue::Null,
        (true, false) => json!({ "$exists": false }),
        (false, _) => json!({ "$ne": null }),
    };
    single(property.field_key(), condition)
}

/// AND several compiled documents. Flat documents with disjoint keys are merged into one object, otherwise
/// all of them are wrapped in `$and`.
pub fn conjoin(parts: Vec<JsonValue>) -> JsonValue {
    let mut keys = HashSet::new();
    let mergeable = parts.iter().all(|part| part.as_object().is_some_and(|map| is_flat(map) && map.keys().all(|key| keys.insert(key.clone()))));
    if !mergeable {
        return json!({ "$and": parts });
    }
    let mut merged = Map::new();
    for part in parts {
        if let JsonValue::Object(map) = part {
            merged.extend(map);
        }
    }
    JsonValue::Object(merged)
}

fn is_flat(map: &Map<String, JsonValue>) -> bool { !map.keys().any(|key| key == AND || key == OR || key == NOT) }

pub(crate) fn single(key: String, value: JsonValue) -> JsonValue {
    let mut map = Map::new();
    map.insert(key, value);
    JsonValue::Object(map)
}

/// Compile orderings into `[{ "field", "direction" }]`, with an `"expression"` for computed ones.
pub fn compile_ordering(orderings: &[OrderingExpression]) -> JsonValue {
    let document = JsonValue::Array(
        orderings
            .iter()
            .map(|ordering| {
                let mut entry = Map::new();
                entry.insert("field".into(), JsonValue::String(ordering.property.field_key()));
                entry.insert("direction".into(), JsonValue::String(ordering.direction.as_str().into()));
                if let Some(computed) = &ordering.computed {
                    entry.insert("expression".into(), value_expression(computed));
                }
                JsonValue::Object(entry)
            })
            .collect(),
    );
    debug!(ordering = %document, "compiled ordering document");
    document
}

fn value_expression(expr: &ValueExpression) -> JsonValue {
    match expr {
        ValueExpression::PropertyValue(property) => json!({ "field": property.field_key() }),
        ValueExpression::Constant { value, ty } => to_json(&coerce(value, ty)),
        ValueExpression::Arithmetic { left, op, right } => single(op.symbol().into(), json!([value_expression(left), value_expression(right)])),
        ValueExpression::FunctionCall { function, argument } => single(function.symbol().into(), value_expression(argument)),
    }
}
