use std::sync::{Arc, LazyLock, Mutex};

use async_trait::async_trait;
use redbase_query::provider::{AggregateRequest, GroupRequest, ObjectRecord, QueryProvider, WindowRequest};
use redbase_query::{CompiledQuery, ProviderError, Props, SchemeDef, TypeTag};
use serde_json::{json, Map, Value as JsonValue};
use tracing::Level;

// Initialize tracing for tests
#[ctor::ctor]
fn init_tracing() { tracing_subscriber::fmt().with_max_level(Level::INFO).with_test_writer().init(); }

static PRODUCT: LazyLock<SchemeDef> = LazyLock::new(|| {
    let address = SchemeDef::new(11, "Address").field("City", TypeTag::String).field("Zip", TypeTag::Int);
    let item = SchemeDef::new(12, "OrderItem").field("Sku", TypeTag::String).field("Qty", TypeTag::Int);
    SchemeDef::new(10, "Product")
        .field("Name", TypeTag::String)
        .field("Price", TypeTag::Double)
        .field("Stock", TypeTag::Int)
        .field("IsActive", TypeTag::Bool)
        .field("ReleasedAt", TypeTag::DateTime)
        .field("Category", TypeTag::ListItem)
        .field("Tags", TypeTag::Array(Box::new(TypeTag::String)))
        .field("Scores", TypeTag::Array(Box::new(TypeTag::Int)))
        .field("Attributes", TypeTag::Dictionary(Box::new(TypeTag::String), Box::new(TypeTag::String)))
        .class_field("Address", TypeTag::Class, address)
        .class_field("Items", TypeTag::Array(Box::new(TypeTag::Class)), item)
});

static CATEGORY: LazyLock<SchemeDef> = LazyLock::new(|| SchemeDef::new(20, "Category").field("Title", TypeTag::String).field("Level", TypeTag::Int));

pub struct Product;

impl Props for Product {
    fn scheme() -> &'static SchemeDef { &PRODUCT }
}

pub struct Category;

impl Props for Category {
    fn scheme() -> &'static SchemeDef { &CATEGORY }
}

#[allow(unused)]
pub fn record(id: i64, name: &str) -> ObjectRecord {
    ObjectRecord { id, scheme_id: 10, parent_id: None, name: Some(name.to_string()), props: Map::new(), children: Vec::new() }
}

/// In-memory provider that remembers every compiled query it receives.
#[derive(Default)]
pub struct RecordingProvider {
    records: Vec<ObjectRecord>,
    calls: Mutex<Vec<(&'static str, CompiledQuery)>>,
}

#[allow(unused)]
impl RecordingProvider {
    pub fn new(records: Vec<ObjectRecord>) -> Arc<Self> { Arc::new(Self { records, calls: Mutex::new(Vec::new()) }) }

    pub fn calls(&self) -> Vec<(&'static str, CompiledQuery)> { self.calls.lock().unwrap().clone() }

    pub fn last(&self) -> Option<CompiledQuery> { self.calls.lock().unwrap().last().map(|(_, query)| query.clone()) }

    fn record(&self, operation: &'static str, query: &CompiledQuery) { self.calls.lock().unwrap().push((operation, query.clone())); }
}

#[async_trait]
impl QueryProvider for RecordingProvider {
    async fn execute(&self, query: &CompiledQuery) -> Result<Vec<ObjectRecord>, ProviderError> {
        self.record("execute", query);
        let limit = query.limit.map(|limit| limit as usize).unwrap_or(usize::MAX);
        Ok(self.records.iter().skip(query.offset.unwrap_or(0) as usize).take(limit).cloned().collect())
    }

    async fn count(&self, query: &CompiledQuery) -> Result<u64, ProviderError> {
        self.record("count", query);
        Ok(self.records.len() as u64)
    }

    async fn delete(&self, query: &CompiledQuery) -> Result<u64, ProviderError> {
        self.record("delete", query);
        Ok(self.records.len() as u64)
    }

    async fn aggregate(&self, query: &CompiledQuery, request: &AggregateRequest) -> Result<JsonValue, ProviderError> {
        self.record("aggregate", query);
        Ok(json!({ "field": request.field, "function": request.function.name() }))
    }

    async fn group_by(&self, query: &CompiledQuery, request: &GroupRequest) -> Result<Vec<JsonValue>, ProviderError> {
        self.record("group_by", query);
        Ok(vec![json!({ "keys": request.keys, "aggregates": request.aggregates.len() })])
    }

    async fn window(&self, query: &CompiledQuery, request: &WindowRequest) -> Result<Vec<JsonValue>, ProviderError> {
        self.record("window", query);
        Ok(vec![json!({ "partition_by": request.partition_by })])
    }

    async fn group_by_window(&self, query: &CompiledQuery, _group: &GroupRequest, _window: &WindowRequest) -> Result<Vec<JsonValue>, ProviderError> {
        self.record("group_by_window", query);
        Ok(Vec::new())
    }

    async fn to_sql(&self, query: &CompiledQuery) -> Result<String, ProviderError> {
        self.record("to_sql", query);
        Ok(format!("SELECT * FROM search_objects({}, '{}', '{}')", query.scheme_id, query.filter, query.ordering))
    }
}
