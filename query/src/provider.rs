//! Execution boundary. A provider receives a fully compiled query and never calls back into the compiler.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::context::CompiledQuery;
use crate::error::ProviderError;
use crate::property::PropertyRef;

/// An object row as returned by the store: base columns plus its dynamic properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub id: i64,
    pub scheme_id: i64,
    pub parent_id: Option<i64>,
    pub name: Option<String>,
    pub props: Map<String, JsonValue>,
    /// Populated only for materialized tree results
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ObjectRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunction {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl AggregateFunction {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::Sum => "Sum",
            AggregateFunction::Avg => "Avg",
            AggregateFunction::Min => "Min",
            AggregateFunction::Max => "Max",
            AggregateFunction::Count => "Count",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateRequest {
    /// Field key, as used in the filter document
    pub field: String,
    pub function: AggregateFunction,
    /// Name of the result column, e.g. `Sum(Price)`
    pub alias: String,
}

impl AggregateRequest {
    pub fn new(property: &PropertyRef, function: AggregateFunction) -> Self {
        let field = property.field_key();
        Self { alias: format!("{}({})", function.name(), property.path), field, function }
    }

    pub fn with_alias(self, alias: impl Into<String>) -> Self { Self { alias: alias.into(), ..self } }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRequest {
    pub keys: Vec<String>,
    pub aggregates: Vec<AggregateRequest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowFunction {
    RowNumber,
    Rank,
    DenseRank,
    Sum,
    Avg,
    Min,
    Max,
    Count,
    Lag,
    Lead,
}

impl WindowFunction {
    /// Ranking functions take no field argument.
    pub fn is_ranking(&self) -> bool { matches!(self, WindowFunction::RowNumber | WindowFunction::Rank | WindowFunction::DenseRank) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowColumn {
    pub function: WindowFunction,
    pub field: Option<String>,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowRequest {
    pub partition_by: Vec<String>,
    /// Ordering document for the window frame; empty uses the query's own ordering
    pub order_by: JsonValue,
    pub columns: Vec<WindowColumn>,
}

#[async_trait]
pub trait QueryProvider: Send + Sync {
    async fn execute(&self, query: &CompiledQuery) -> Result<Vec<ObjectRecord>, ProviderError>;

    async fn count(&self, query: &CompiledQuery) -> Result<u64, ProviderError>;

    /// Delete every object matching the filter; returns the number removed
    async fn delete(&self, query: &CompiledQuery) -> Result<u64, ProviderError>;

    async fn aggregate(&self, query: &CompiledQuery, request: &AggregateRequest) -> Result<JsonValue, ProviderError>;

    /// Several aggregates over the same query, keyed by alias
    async fn aggregate_batch(&self, query: &CompiledQuery, requests: &[AggregateRequest]) -> Result<Map<String, JsonValue>, ProviderError> {
        let mut results = Map::new();
        for request in requests {
            results.insert(request.alias.clone(), self.aggregate(query, request).await?);
        }
        Ok(results)
    }

    async fn group_by(&self, query: &CompiledQuery, request: &GroupRequest) -> Result<Vec<JsonValue>, ProviderError>;

    async fn window(&self, query: &CompiledQuery, request: &WindowRequest) -> Result<Vec<JsonValue>, ProviderError>;

    async fn group_by_window(&self, query: &CompiledQuery, group: &GroupRequest, window: &WindowRequest) -> Result<Vec<JsonValue>, ProviderError>;

    /// SQL the provider would run, for diagnostics
    async fn to_sql(&self, query: &CompiledQuery) -> Result<String, ProviderError>;
}
