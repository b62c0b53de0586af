use crate::value::TypeTag;
use thiserror::Error;

/// Errors raised while building or compiling a query.
///
/// Every variant is fatal to the single construction call that produced it. Value coercion failures are
/// not represented here; they are logged and the original value is kept (see [`CoercionError`]).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum QueryError {
    #[error("unsupported expression ({kind}): {detail}")]
    UnsupportedExpression { kind: &'static str, detail: String },
    #[error("unsupported operator {operator} in {context}")]
    UnsupportedOperator { operator: String, context: &'static str },
    /// Recognized, but not available in this edition.
    #[error("feature not available: {feature}")]
    FeatureRestricted { feature: &'static str },
    #[error("unknown property: {path}")]
    UnknownProperty { path: String },
    #[error("expression does not reference any property")]
    MissingProperty,
    #[error("invalid argument for {operation}: {reason}")]
    InvalidArgument { operation: &'static str, reason: String },
    #[error("{operation} is not supported outside tree queries")]
    TreeOnly { operation: &'static str },
}

impl QueryError {
    pub(crate) fn unsupported(kind: &'static str, detail: impl Into<String>) -> Self {
        QueryError::UnsupportedExpression { kind, detail: detail.into() }
    }

    pub(crate) fn unsupported_operator(operator: impl std::fmt::Debug, context: &'static str) -> Self {
        QueryError::UnsupportedOperator { operator: format!("{operator:?}"), context }
    }
}

/// Value coercion failure. Never propagated to callers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoercionError {
    #[error("cannot convert {from} to {to:?}")]
    IncompatibleTypes { from: &'static str, to: TypeTag },
    #[error("invalid format '{value}' for {to:?}")]
    InvalidFormat { value: String, to: TypeTag },
    #[error("numeric overflow: '{value}' cannot fit in {to:?}")]
    NumericOverflow { value: String, to: TypeTag },
}

/// Errors surfaced by a [`crate::provider::QueryProvider`].
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("invalid query: {0}")]
    Query(#[from] QueryError),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("materialization failed: {0}")]
    Materialize(String),
}
