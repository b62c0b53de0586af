//! Value coercion to a field's declared type, and rendering of coerced values into the filter document.
//!
//! Coercion is best effort: a failed conversion is logged and the value is used as given. Date/times always
//! leave this module as UTC; a naive timestamp is taken to already be UTC, never server-local time.

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tracing::warn;
use uuid::Uuid;

use crate::error::CoercionError;
use crate::value::{TypeTag, Value};

const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// Convert `value` to `target`, falling back to the (list-unwrapped) input on failure.
pub fn coerce(value: &Value, target: &TypeTag) -> Value {
    let value = unwrap_list_item(value);
    match try_coerce(&value, target) {
        Ok(coerced) => coerced,
        Err(err) => {
            warn!(target_type = ?target, value = ?value, error = %err, "value coercion failed, using original value");
            value
        }
    }
}

fn unwrap_list_item(value: &Value) -> Value {
    match value {
        Value::ListItem(item) => Value::I64(item.id),
        other => other.clone(),
    }
}

pub fn try_coerce(value: &Value, target: &TypeTag) -> Result<Value, CoercionError> {
    if let Value::List(items) = value {
        let element = target.element();
        return Ok(Value::List(items.iter().map(|item| coerce(item, element)).collect()));
    }
    if value.is_null() {
        return Ok(Value::Null);
    }
    let value = &unwrap_list_item(value);

    match target {
        TypeTag::DateTime | TypeTag::DateTimeOffset => to_utc(value, target).map(Value::DateTime),
        TypeTag::Double | TypeTag::Float => to_f64(value, target).map(Value::F64),
        TypeTag::Decimal => to_decimal(value, target).map(Value::Decimal),
        TypeTag::Long => to_i64(value, target, i64::MIN, i64::MAX).map(Value::I64),
        TypeTag::Int => to_i64(value, target, i32::MIN as i64, i32::MAX as i64).map(Value::I64),
        TypeTag::Short => to_i64(value, target, i16::MIN as i64, i16::MAX as i64).map(Value::I64),
        TypeTag::Byte => to_i64(value, target, u8::MIN as i64, u8::MAX as i64).map(Value::I64),
        TypeTag::Bool => to_bool(value, target).map(Value::Bool),
        TypeTag::Guid => to_guid(value, target).map(Value::Guid),
        TypeTag::String => Ok(Value::String(to_text(value))),
        _ => Ok(value.clone()),
    }
}

fn incompatible(value: &Value, to: &TypeTag) -> CoercionError { CoercionError::IncompatibleTypes { from: value.kind(), to: to.clone() } }

fn invalid(value: impl ToString, to: &TypeTag) -> CoercionError { CoercionError::InvalidFormat { value: value.to_string(), to: to.clone() } }

/// Offset-aware input keeps its instant; naive input is read as UTC; strings are parsed, with an explicit
/// offset taking priority over the naive formats.
fn to_utc(value: &Value, target: &TypeTag) -> Result<DateTime<Utc>, CoercionError> {
    match value {
        Value::DateTime(dt) => Ok(*dt),
        Value::DateTimeOffset(dt) => Ok(dt.with_timezone(&Utc)),
        Value::NaiveDateTime(naive) => Ok(Utc.from_utc_datetime(naive)),
        Value::String(s) => parse_utc(s).ok_or_else(|| invalid(s, target)),
        other => Err(incompatible(other, target)),
    }
}

fn parse_utc(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().and_then(|d| d.and_hms_opt(0, 0, 0)).map(|naive| Utc.from_utc_datetime(&naive))
}

fn to_f64(value: &Value, target: &TypeTag) -> Result<f64, CoercionError> {
    match value {
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()).ok_or_else(|| invalid(s, target)),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        other => other.as_f64().ok_or_else(|| incompatible(other, target)),
    }
}

fn to_decimal(value: &Value, target: &TypeTag) -> Result<Decimal, CoercionError> {
    match value {
        Value::Decimal(d) => Ok(*d),
        Value::I64(i) => Ok(Decimal::from(*i)),
        Value::F64(f) => Decimal::from_f64(*f).ok_or_else(|| CoercionError::NumericOverflow { value: f.to_string(), to: target.clone() }),
        Value::String(s) => s.trim().parse::<Decimal>().map_err(|_| invalid(s, target)),
        other => Err(incompatible(other, target)),
    }
}

fn to_i64(value: &Value, target: &TypeTag, min: i64, max: i64) -> Result<i64, CoercionError> {
    let n = match value {
        Value::I64(i) => *i,
        Value::Bool(b) => *b as i64,
        Value::F64(f) => {
            if f.fract() != 0.0 || !f.is_finite() {
                return Err(invalid(f, target));
            }
            if *f < i64::MIN as f64 || *f > i64::MAX as f64 {
                return Err(CoercionError::NumericOverflow { value: f.to_string(), to: target.clone() });
            }
            *f as i64
        }
        Value::Decimal(d) => {
            if !d.fract().is_zero() {
                return Err(invalid(d, target));
            }
            d.to_i64().ok_or_else(|| CoercionError::NumericOverflow { value: d.to_string(), to: target.clone() })?
        }
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| invalid(s, target))?,
        other => return Err(incompatible(other, target)),
    };
    if n < min || n > max {
        return Err(CoercionError::NumericOverflow { value: n.to_string(), to: target.clone() });
    }
    Ok(n)
}

fn to_bool(value: &Value, target: &TypeTag) -> Result<bool, CoercionError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::I64(i) => Ok(*i != 0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(invalid(s, target)),
        },
        other => Err(incompatible(other, target)),
    }
}

fn to_guid(value: &Value, target: &TypeTag) -> Result<Uuid, CoercionError> {
    match value {
        Value::Guid(g) => Ok(*g),
        Value::String(s) => Uuid::parse_str(s.trim()).map_err(|_| invalid(s, target)),
        Value::Bytes(bytes) => Uuid::from_slice(bytes).map_err(|_| invalid(format!("{} bytes", bytes.len()), target)),
        other => Err(incompatible(other, target)),
    }
}

fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Guid(g) => g.to_string(),
        Value::DateTime(_) | Value::NaiveDateTime(_) | Value::DateTimeOffset(_) => match to_json(value) {
            JsonValue::String(s) => s,
            other => other.to_string(),
        },
        other => to_json(other).to_string(),
    }
}

/// Render a value into the filter document. Timestamps are always emitted in UTC with a `Z` marker.
pub fn to_json(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::I64(i) => JsonValue::from(*i),
        Value::F64(f) => match serde_json::Number::from_f64(*f) {
            Some(n) => JsonValue::Number(n),
            None => {
                warn!(value = %f, "non-finite number rendered as null");
                JsonValue::Null
            }
        },
        Value::Decimal(d) => decimal_json(d),
        Value::String(s) => JsonValue::String(s.clone()),
        Value::Guid(g) => JsonValue::String(g.to_string()),
        Value::DateTime(dt) => utc_json(*dt),
        Value::NaiveDateTime(naive) => utc_json(Utc.from_utc_datetime(naive)),
        Value::DateTimeOffset(dt) => utc_json(dt.with_timezone(&Utc)),
        Value::Bytes(bytes) => JsonValue::String(general_purpose::STANDARD.encode(bytes)),
        Value::ListItem(item) => JsonValue::from(item.id),
        Value::List(items) => JsonValue::Array(items.iter().map(to_json).collect()),
    }
}

fn utc_json(dt: DateTime<Utc>) -> JsonValue { JsonValue::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)) }

/// Decimals keep every digit: the number is built from the decimal's own text, not through `f64`.
fn decimal_json(d: &Decimal) -> JsonValue {
    let d = d.normalize();
    if let Some(i) = d.to_i64().filter(|_| d.fract().is_zero()) {
        return JsonValue::from(i);
    }
    serde_json::from_str::<serde_json::Number>(&d.to_string()).map(JsonValue::Number).unwrap_or_else(|_| JsonValue::String(d.to_string()))
}

/// Equality against a float-typed field: an integral value is sent as `"2000.0"` so the backend still sees
/// a floating-point literal. Anything else renders normally.
pub fn to_json_for_equality(value: &Value, declared: &TypeTag) -> JsonValue {
    if declared.element().is_float_like() {
        match value {
            Value::F64(f) if f.is_finite() && f.fract() == 0.0 => return JsonValue::String(format!("{f:.1}")),
            Value::Decimal(d) if d.fract().is_zero() => return JsonValue::String(format!("{}.0", d.trunc().normalize())),
            _ => {}
        }
    }
    to_json(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ListItemRef;
    use chrono::{FixedOffset, NaiveDate};
    use serde_json::json;

    fn naive(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime { NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, 0, 0).unwrap() }

    #[test]
    fn test_list_item_becomes_identifier() {
        let item = Value::ListItem(ListItemRef { id: 42, value: Some("Red".into()) });
        assert_eq!(coerce(&item, &TypeTag::ListItem), Value::I64(42));
        assert_eq!(coerce(&item, &TypeTag::Long), Value::I64(42));
    }

    #[test]
    fn test_naive_datetime_is_treated_as_utc() {
        let coerced = coerce(&Value::NaiveDateTime(naive(2024, 1, 15, 10)), &TypeTag::DateTime);
        assert_eq!(to_json(&coerced), json!("2024-01-15T10:00:00Z"));
    }

    #[test]
    fn test_offset_datetime_is_converted_to_utc() {
        let offset = FixedOffset::east_opt(3 * 3600).unwrap();
        let dt = offset.from_local_datetime(&naive(2024, 1, 15, 10)).unwrap();
        let coerced = coerce(&Value::DateTimeOffset(dt), &TypeTag::DateTime);
        assert_eq!(to_json(&coerced), json!("2024-01-15T07:00:00Z"));
        assert_eq!(to_json(&coerce(&Value::NaiveDateTime(naive(2024, 1, 15, 10)), &TypeTag::DateTimeOffset)), json!("2024-01-15T10:00:00Z"));
    }

    #[test]
    fn test_datetime_strings_are_parsed() {
        assert_eq!(to_json(&coerce(&"2024-01-15T10:00:00+02:00".into(), &TypeTag::DateTime)), json!("2024-01-15T08:00:00Z"));
        assert_eq!(to_json(&coerce(&"2024-01-15 10:00:00".into(), &TypeTag::DateTime)), json!("2024-01-15T10:00:00Z"));
        assert_eq!(to_json(&coerce(&"2024-01-15".into(), &TypeTag::DateTime)), json!("2024-01-15T00:00:00Z"));
    }

    #[test]
    fn test_numeric_conversions() {
        assert_eq!(coerce(&Value::I64(5), &TypeTag::Double), Value::F64(5.0));
        assert_eq!(coerce(&"12".into(), &TypeTag::Int), Value::I64(12));
        assert_eq!(coerce(&Value::F64(3.0), &TypeTag::Long), Value::I64(3));
        assert_eq!(coerce(&Value::I64(7), &TypeTag::Decimal), Value::Decimal(Decimal::from(7)));
        assert_eq!(coerce(&"true".into(), &TypeTag::Bool), Value::Bool(true));
    }

    #[test]
    fn test_failed_conversion_keeps_original() {
        assert_eq!(coerce(&"abc".into(), &TypeTag::Int), Value::String("abc".into()));
        assert_eq!(coerce(&Value::I64(300), &TypeTag::Byte), Value::I64(300));
        assert_eq!(coerce(&Value::F64(2.5), &TypeTag::Long), Value::F64(2.5));
        assert!(try_coerce(&Value::I64(70_000), &TypeTag::Short).is_err());
    }

    #[test]
    fn test_guid_and_string() {
        let id = Uuid::parse_str("6f9619ff-8b86-d011-b42d-00c04fc964ff").unwrap();
        assert_eq!(coerce(&"6F9619FF-8B86-D011-B42D-00C04FC964FF".into(), &TypeTag::Guid), Value::Guid(id));
        assert_eq!(coerce(&Value::Guid(id), &TypeTag::String), Value::String("6f9619ff-8b86-d011-b42d-00c04fc964ff".into()));
        assert_eq!(coerce(&Value::I64(10), &TypeTag::String), Value::String("10".into()));
    }

    #[test]
    fn test_unknown_targets_pass_through() {
        let bytes = Value::Bytes(vec![1, 2]);
        assert_eq!(coerce(&bytes, &TypeTag::Class), bytes);
        assert_eq!(to_json(&bytes), json!("AQI="));
    }

    #[test]
    fn test_decimals_render_without_precision_loss() {
        let precise: Decimal = "12345678901234567.89".parse().unwrap();
        assert_eq!(to_json(&Value::Decimal(precise)).to_string(), "12345678901234567.89");
        let wide: Decimal = "79228162514264337593543950335".parse().unwrap();
        assert_eq!(to_json(&Value::Decimal(wide)).to_string(), "79228162514264337593543950335");
        assert_eq!(to_json(&Value::Decimal(Decimal::new(1250, 2))).to_string(), "12.5");
        assert_eq!(to_json(&Value::Decimal(Decimal::new(700, 2))), json!(7));
    }

    #[test]
    fn test_non_finite_strings_do_not_coerce_to_floats() {
        assert_eq!(coerce(&Value::String("NaN".into()), &TypeTag::Double), Value::String("NaN".into()));
        assert_eq!(coerce(&Value::String("inf".into()), &TypeTag::Float), Value::String("inf".into()));
        assert_eq!(to_json(&Value::F64(f64::NAN)), JsonValue::Null);
    }

    #[test]
    fn test_integral_float_equality_keeps_fraction() {
        assert_eq!(to_json_for_equality(&Value::F64(2000.0), &TypeTag::Double), json!("2000.0"));
        assert_eq!(to_json_for_equality(&Value::F64(-3.0), &TypeTag::Float), json!("-3.0"));
        assert_eq!(to_json_for_equality(&Value::F64(2000.5), &TypeTag::Double), json!(2000.5));
        assert_eq!(to_json_for_equality(&Value::Decimal(Decimal::new(20000, 1)), &TypeTag::Decimal), json!("2000.0"));
        assert_eq!(to_json_for_equality(&Value::I64(2000), &TypeTag::Long), json!(2000));
    }
}
