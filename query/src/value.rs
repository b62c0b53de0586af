use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A runtime value appearing in a query: a comparison operand, an `IN` member or an ordering constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Decimal(Decimal),
    String(String),
    Guid(Uuid),
    /// Timestamp with an explicit UTC marker
    DateTime(DateTime<Utc>),
    /// Timezone-naive timestamp. Always interpreted as UTC, never as server-local time.
    NaiveDateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
    Bytes(Vec<u8>),
    /// Reference to a lookup-list entry; compiled as its identifier
    ListItem(ListItemRef),
    List(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListItemRef {
    pub id: i64,
    pub value: Option<String>,
}

impl ListItemRef {
    pub fn new(id: i64) -> Self { Self { id, value: None } }
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I64(_) => "long",
            Value::F64(_) => "double",
            Value::Decimal(_) => "decimal",
            Value::String(_) => "string",
            Value::Guid(_) => "guid",
            Value::DateTime(_) => "datetime",
            Value::NaiveDateTime(_) => "naive datetime",
            Value::DateTimeOffset(_) => "datetimeoffset",
            Value::Bytes(_) => "bytes",
            Value::ListItem(_) => "list item",
            Value::List(_) => "list",
        }
    }

    pub fn is_null(&self) -> bool { matches!(self, Value::Null) }

    /// The type tag a literal of this value naturally carries.
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Null => TypeTag::Object,
            Value::Bool(_) => TypeTag::Bool,
            Value::I64(_) => TypeTag::Long,
            Value::F64(_) => TypeTag::Double,
            Value::Decimal(_) => TypeTag::Decimal,
            Value::String(_) => TypeTag::String,
            Value::Guid(_) => TypeTag::Guid,
            Value::DateTime(_) | Value::NaiveDateTime(_) => TypeTag::DateTime,
            Value::DateTimeOffset(_) => TypeTag::DateTimeOffset,
            Value::Bytes(_) => TypeTag::Bytes,
            Value::ListItem(_) => TypeTag::ListItem,
            Value::List(items) => TypeTag::Array(Box::new(items.first().map(Value::type_tag).unwrap_or(TypeTag::Object))),
        }
    }

    pub(crate) fn as_f64(&self) -> Option<f64> {
        match self {
            Value::I64(i) => Some(*i as f64),
            Value::F64(f) => Some(*f),
            Value::Decimal(d) => rust_decimal::prelude::ToPrimitive::to_f64(d),
            _ => None,
        }
    }
}

/// Declared type of a field, as described by its scheme.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeTag {
    Bool,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Decimal,
    String,
    Guid,
    DateTime,
    DateTimeOffset,
    Bytes,
    ListItem,
    /// Nested class; its fields come from the owning [`crate::scheme::FieldDef`]
    Class,
    /// Untyped / unknown; values pass through unchanged
    Object,
    Array(Box<TypeTag>),
    Dictionary(Box<TypeTag>, Box<TypeTag>),
}

impl TypeTag {
    /// Arrays and dictionaries. Text is never a collection even though it is enumerable.
    pub fn is_collection(&self) -> bool { matches!(self, TypeTag::Array(_) | TypeTag::Dictionary(..)) }

    /// Types whose integral values would otherwise serialize as bare JSON integers.
    pub fn is_float_like(&self) -> bool { matches!(self, TypeTag::Float | TypeTag::Double | TypeTag::Decimal) }

    /// Element type for collections, the type itself otherwise.
    pub fn element(&self) -> &TypeTag {
        match self {
            TypeTag::Array(inner) => inner,
            TypeTag::Dictionary(_, value) => value,
            other => other,
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => |$v:ident| $body:expr),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from($v: $ty) -> Self { $body }
        })*
    };
}

value_from! {
    bool => |v| Value::Bool(v),
    u8 => |v| Value::I64(v as i64),
    i16 => |v| Value::I64(v as i64),
    i32 => |v| Value::I64(v as i64),
    i64 => |v| Value::I64(v),
    f32 => |v| Value::F64(v as f64),
    f64 => |v| Value::F64(v),
    Decimal => |v| Value::Decimal(v),
    &str => |v| Value::String(v.to_string()),
    String => |v| Value::String(v),
    Uuid => |v| Value::Guid(v),
    DateTime<Utc> => |v| Value::DateTime(v),
    NaiveDateTime => |v| Value::NaiveDateTime(v),
    DateTime<FixedOffset> => |v| Value::DateTimeOffset(v),
    Vec<u8> => |v| Value::Bytes(v),
    ListItemRef => |v| Value::ListItem(v),
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self { value.map(Into::into).unwrap_or(Value::Null) }
}
