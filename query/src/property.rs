//! Property classification: turns an access path into a [`PropertyRef`] that knows whether it addresses a
//! fixed base column or a dynamic attribute, and how its filter key is rendered.

use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::expr::Expr;
use crate::scheme::SchemeDef;
use crate::value::{TypeTag, Value};

/// Prefix marking base-column keys. `$` and `:` cannot appear in a dynamic attribute identifier in any
/// supported language, so `0$:Name` never collides with a dynamic `Name`.
pub const BASE_FIELD_PREFIX: &str = "0$:";

/// Member name that switches from the base-object view to the dynamic-properties view.
pub const PROPS_MEMBER: &str = "Props";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    /// The object record itself (fixed columns)
    Base,
    /// The object's dynamic properties
    Props,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyFunction {
    Length,
    Count,
}

impl PropertyFunction {
    pub fn suffix(&self) -> &'static str {
        match self {
            PropertyFunction::Length => "$length",
            PropertyFunction::Count => "$count",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyRef {
    pub path: String,
    pub declared_type: TypeTag,
    pub is_base_field: bool,
    pub function: Option<PropertyFunction>,
}

impl PropertyRef {
    pub fn base(field: BaseField) -> Self {
        Self { path: field.name().to_string(), declared_type: field.type_tag(), is_base_field: true, function: None }
    }

    pub fn dynamic(path: impl Into<String>, declared_type: TypeTag) -> Self {
        Self { path: path.into(), declared_type, is_base_field: false, function: None }
    }

    pub fn with_function(self, function: PropertyFunction) -> Result<Self, QueryError> {
        if self.is_base_field {
            return Err(QueryError::unsupported("property function", format!("{function:?} on base field {}", self.path)));
        }
        Ok(Self { function: Some(function), ..self })
    }

    /// Key used in the filter and ordering documents.
    pub fn field_key(&self) -> String {
        let mut key = if self.is_base_field { format!("{BASE_FIELD_PREFIX}{}", self.path) } else { self.path.clone() };
        if let Some(function) = self.function {
            key.push('.');
            key.push_str(function.suffix());
        }
        key
    }

    /// Type the compared value is coerced to. Functions always yield counts.
    pub fn value_type(&self) -> TypeTag {
        match self.function {
            Some(_) => TypeTag::Long,
            None => self.declared_type.clone(),
        }
    }
}

/// Fixed columns of the object record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseField {
    Id,
    ParentId,
    SchemeId,
    OwnerId,
    WhoChangeId,
    DateCreate,
    DateModify,
    DateBegin,
    DateComplete,
    Key,
    CodeInt,
    CodeString,
    CodeGuid,
    Name,
    Note,
    Bool,
    Hash,
    ValueLong,
    ValueString,
    ValueGuid,
    ValueBool,
    ValueDouble,
    ValueNumeric,
    ValueDatetime,
    ValueBytes,
}

impl BaseField {
    pub const ALL: [BaseField; 25] = [
        BaseField::Id,
        BaseField::ParentId,
        BaseField::SchemeId,
        BaseField::OwnerId,
        BaseField::WhoChangeId,
        BaseField::DateCreate,
        BaseField::DateModify,
        BaseField::DateBegin,
        BaseField::DateComplete,
        BaseField::Key,
        BaseField::CodeInt,
        BaseField::CodeString,
        BaseField::CodeGuid,
        BaseField::Name,
        BaseField::Note,
        BaseField::Bool,
        BaseField::Hash,
        BaseField::ValueLong,
        BaseField::ValueString,
        BaseField::ValueGuid,
        BaseField::ValueBool,
        BaseField::ValueDouble,
        BaseField::ValueNumeric,
        BaseField::ValueDatetime,
        BaseField::ValueBytes,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BaseField::Id => "Id",
            BaseField::ParentId => "ParentId",
            BaseField::SchemeId => "SchemeId",
            BaseField::OwnerId => "OwnerId",
            BaseField::WhoChangeId => "WhoChangeId",
            BaseField::DateCreate => "DateCreate",
            BaseField::DateModify => "DateModify",
            BaseField::DateBegin => "DateBegin",
            BaseField::DateComplete => "DateComplete",
            BaseField::Key => "Key",
            BaseField::CodeInt => "CodeInt",
            BaseField::CodeString => "CodeString",
            BaseField::CodeGuid => "CodeGuid",
            BaseField::Name => "Name",
            BaseField::Note => "Note",
            BaseField::Bool => "Bool",
            BaseField::Hash => "Hash",
            BaseField::ValueLong => "ValueLong",
            BaseField::ValueString => "ValueString",
            BaseField::ValueGuid => "ValueGuid",
            BaseField::ValueBool => "ValueBool",
            BaseField::ValueDouble => "ValueDouble",
            BaseField::ValueNumeric => "ValueNumeric",
            BaseField::ValueDatetime => "ValueDatetime",
            BaseField::ValueBytes => "ValueBytes",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> { Self::ALL.into_iter().find(|field| field.name() == name) }

    pub fn type_tag(&self) -> TypeTag {
        match self {
            BaseField::Id
            | BaseField::ParentId
            | BaseField::SchemeId
            | BaseField::OwnerId
            | BaseField::WhoChangeId
            | BaseField::Key
            | BaseField::CodeInt
            | BaseField::ValueLong => TypeTag::Long,
            BaseField::DateCreate | BaseField::DateModify | BaseField::DateBegin | BaseField::DateComplete | BaseField::ValueDatetime => {
                TypeTag::DateTime
            }
            BaseField::CodeString | BaseField::Name | BaseField::Note | BaseField::ValueString => TypeTag::String,
            BaseField::CodeGuid | BaseField::Hash | BaseField::ValueGuid => TypeTag::Guid,
            BaseField::Bool | BaseField::ValueBool => TypeTag::Bool,
            BaseField::ValueDouble => TypeTag::Double,
            BaseField::ValueNumeric => TypeTag::Decimal,
            BaseField::ValueBytes => TypeTag::Bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Member(String),
    Index(i64),
    Key(String),
}

/// Decompose a member/index chain rooted at the parameter into segments, most significant first.
///
/// Returns `Ok(None)` when the expression is not a property access at all. A leading `Props` member in the
/// base view switches to the dynamic view.
pub fn decompose(expr: &Expr, view: Origin) -> Result<Option<(Origin, Vec<PathSegment>)>, QueryError> {
    let mut segments = Vec::new();
    let mut current = expr;
    loop {
        match current {
            Expr::Param => break,
            Expr::Member { target, name } => {
                segments.push(PathSegment::Member(name.clone()));
                current = target;
            }
            Expr::Index { target, index } => {
                segments.push(match index.fold() {
                    Some(Value::I64(i)) => PathSegment::Index(i),
                    Some(Value::String(key)) => PathSegment::Key(key),
                    Some(other) => return Err(QueryError::unsupported("index", format!("{} index", other.kind()))),
                    None => return Err(QueryError::unsupported("index", "index must not depend on the parameter")),
                });
                current = target;
            }
            _ => return Ok(None),
        }
    }
    segments.reverse();

    let mut origin = view;
    if view == Origin::Base && matches!(segments.first(), Some(PathSegment::Member(name)) if name == PROPS_MEMBER) {
        segments.remove(0);
        origin = Origin::Props;
    }
    if segments.is_empty() {
        return Ok(None);
    }
    Ok(Some((origin, segments)))
}

/// Classify an access path against the scheme.
pub fn classify(segments: &[PathSegment], origin: Origin, scheme: &SchemeDef) -> Result<PropertyRef, QueryError> {
    match origin {
        Origin::Base => classify_base(segments),
        Origin::Props => classify_props(segments, scheme),
    }
}

fn classify_base(segments: &[PathSegment]) -> Result<PropertyRef, QueryError> {
    match segments {
        [PathSegment::Member(name)] => {
            BaseField::from_name(name).map(PropertyRef::base).ok_or_else(|| QueryError::UnknownProperty { path: name.clone() })
        }
        _ => Err(QueryError::unsupported("base field", render(segments))),
    }
}

fn classify_props(segments: &[PathSegment], scheme: &SchemeDef) -> Result<PropertyRef, QueryError> {
    let mut path = String::new();
    let mut class = Some(scheme);
    let mut ty: Option<TypeTag> = None;

    for segment in segments {
        match segment {
            PathSegment::Member(name) => {
                if let Some(current) = &ty {
                    // stepping into the elements of a class array
                    if matches!(current, TypeTag::Array(_)) && !path.ends_with(']') {
                        path.push_str("[]");
                    }
                    path.push('.');
                }
                let field = class
                    .and_then(|c| c.get(name))
                    .ok_or_else(|| QueryError::UnknownProperty { path: format!("{path}{name}") })?;
                path.push_str(name);
                class = field.class.as_deref();
                ty = Some(field.ty.clone());
            }
            PathSegment::Index(i) => match ty.take() {
                Some(TypeTag::Array(element)) => {
                    path.push_str(&format!("[{i}]"));
                    ty = Some(*element);
                }
                _ => return Err(QueryError::unsupported("index", format!("positional index on non-array {path}"))),
            },
            PathSegment::Key(key) => match ty.take() {
                Some(TypeTag::Dictionary(_, value)) => {
                    path.push_str(&format!("[{key}]"));
                    ty = Some(*value);
                }
                _ => return Err(QueryError::unsupported("index", format!("keyed access on non-dictionary {path}"))),
            },
        }
    }

    let declared_type = ty.ok_or(QueryError::MissingProperty)?;
    if declared_type.is_collection() && !path.ends_with("[]") {
        path.push_str("[]");
    }
    Ok(PropertyRef::dynamic(path, declared_type))
}

fn render(segments: &[PathSegment]) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            PathSegment::Member(name) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(name);
            }
            PathSegment::Index(i) => out.push_str(&format!("[{i}]")),
            PathSegment::Key(key) => out.push_str(&format!("[{key}]")),
        }
    }
    out
}

/// Resolve an expression to a property, if it is a (possibly function-wrapped) property access.
pub fn resolve(expr: &Expr, view: Origin, scheme: &SchemeDef) -> Result<Option<PropertyRef>, QueryError> {
    match decompose(expr, view)? {
        Some((origin, segments)) => classify(&segments, origin, scheme).map(Some),
        None => Ok(None),
    }
}
