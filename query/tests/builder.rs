mod common;

use anyhow::Result;
use common::*;
use redbase_query::ast::ComparisonOperator;
use redbase_query::provider::{AggregateFunction, AggregateRequest, GroupRequest, WindowColumn, WindowFunction, WindowRequest};
use redbase_query::{field, lit, Query, QueryError, QueryOptions, UserContext};
use serde_json::json;

#[tokio::test]
async fn test_to_list_hands_off_compiled_query() -> Result<()> {
    let provider = RecordingProvider::new(vec![record(1, "a"), record(2, "b"), record(3, "c")]);
    let query = Query::<Product>::new(provider.clone()).filter(field("Stock").gt(0))?.order_by_desc(field("Price"))?.skip(1)?.take(1)?;

    let results = query.to_list().await?;
    assert_eq!(results.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2]);

    let compiled = provider.last().expect("provider was called");
    assert_eq!(compiled.scheme_id, 10);
    assert_eq!(compiled.filter, json!({"Stock": {"$gt": 0}}));
    assert_eq!(compiled.ordering, json!([{"field": "Price", "direction": "DESC"}]));
    assert_eq!((compiled.limit, compiled.offset), (Some(1), Some(1)));
    Ok(())
}

#[tokio::test]
async fn test_empty_query_skips_provider() -> Result<()> {
    let provider = RecordingProvider::new(vec![record(1, "a")]);
    let query = Query::<Product>::new(provider.clone()).filter_in(field("Name"), Vec::<String>::new())?;

    assert!(query.to_list().await?.is_empty());
    assert_eq!(query.count().await?, 0);
    assert!(!query.any().await?);
    assert_eq!(query.delete().await?, 0);
    assert!(query.first().await?.is_none());
    assert!(provider.calls().is_empty());

    let zero = Query::<Product>::new(provider.clone()).take(0)?;
    assert!(zero.to_list().await?.is_empty());
    assert!(provider.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_first_limits_to_one() -> Result<()> {
    let provider = RecordingProvider::new(vec![record(1, "a"), record(2, "b")]);
    let first = Query::<Product>::new(provider.clone()).order_by_base(field("Name"))?.first().await?;
    assert_eq!(first.map(|r| r.id), Some(1));
    assert_eq!(provider.last().and_then(|q| q.limit), Some(1));
    assert!(Query::<Product>::new(provider.clone()).any().await?);
    Ok(())
}

#[tokio::test]
async fn test_count_and_delete_delegate() -> Result<()> {
    let provider = RecordingProvider::new(vec![record(1, "a"), record(2, "b")]);
    let query = Query::<Product>::new(provider.clone()).filter(field("IsActive").not())?;
    assert_eq!(query.count().await?, 2);
    assert_eq!(query.delete().await?, 2);
    let operations: Vec<_> = provider.calls().into_iter().map(|(operation, _)| operation).collect();
    assert_eq!(operations, vec!["count", "delete"]);
    assert_eq!(provider.last().map(|q| q.filter), Some(json!({"$not": {"IsActive": {"$eq": true}}})));
    Ok(())
}

#[test]
fn test_builder_calls_do_not_mutate_receiver() -> Result<()> {
    let base = Query::<Product>::new(RecordingProvider::new(Vec::new())).order_by(field("Name"))?;
    let filtered = base.filter(field("Stock").gt(1))?;
    let reordered = base.then_by_desc(field("Price"))?;

    assert!(base.context().filter.is_none());
    assert_eq!(base.context().orderings.len(), 1);
    assert!(filtered.context().filter.is_some());
    assert_eq!(reordered.context().orderings.len(), 2);
    Ok(())
}

#[test]
fn test_order_by_replaces_and_then_by_appends() -> Result<()> {
    let query = Query::<Product>::new(RecordingProvider::new(Vec::new()))
        .order_by(field("Name"))?
        .then_by_base_desc(field("DateCreate"))?
        .order_by_base(field("Id"))?
        .then_by(field("Price").mul(field("Stock")))?;
    assert_eq!(
        query.compile()?.ordering,
        json!([
            {"field": "0$:Id", "direction": "ASC"},
            {"field": "Price", "direction": "ASC", "expression": {"$mul": [{"field": "Price"}, {"field": "Stock"}]}},
        ])
    );
    Ok(())
}

#[test]
fn test_distinct_by_inserts_leading_ordering() -> Result<()> {
    let query = Query::<Product>::new(RecordingProvider::new(Vec::new())).order_by_desc(field("Price"))?.distinct_by(field("Name"))?;
    let compiled = query.compile()?;
    assert_eq!(compiled.ordering, json!([{"field": "Name", "direction": "ASC"}, {"field": "Price", "direction": "DESC"}]));
    assert_eq!(compiled.distinct_by.as_deref(), Some("Name"));

    let flags = Query::<Product>::new(RecordingProvider::new(Vec::new())).distinct().distinct_by_base_fields().compile()?;
    assert!(flags.is_distinct && flags.is_distinct_by_base_fields);
    Ok(())
}

#[test]
fn test_order_by_after_distinct_by_keeps_distinct_key_first() -> Result<()> {
    let query = Query::<Product>::new(RecordingProvider::new(Vec::new())).distinct_by(field("Name"))?.order_by_desc(field("Price"))?;
    let compiled = query.compile()?;
    assert_eq!(compiled.ordering, json!([{"field": "Name", "direction": "ASC"}, {"field": "Price", "direction": "DESC"}]));
    assert_eq!(compiled.distinct_by.as_deref(), Some("Name"));
    Ok(())
}

#[test]
fn test_paging_preconditions() {
    let query = Query::<Product>::new(RecordingProvider::new(Vec::new()));
    assert!(matches!(query.take(-1), Err(QueryError::InvalidArgument { operation: "take", .. })));
    assert!(matches!(query.skip(-1), Err(QueryError::InvalidArgument { operation: "skip", .. })));
}

#[test]
fn test_loading_and_projection_options() -> Result<()> {
    let options = QueryOptions { props_depth: Some(2), ..QueryOptions::new() };
    let compiled = Query::<Product>::with_options(RecordingProvider::new(Vec::new()), &options)
        .with_lazy_loading(false)
        .with_max_depth(3)
        .skip_props_loading()
        .select_fields([field("Name"), field("Address.City")])?
        .select_structures([11, 12])
        .for_user(UserContext::new(77))
        .within_parents([5])
        .compile()?;
    assert_eq!(compiled.props_depth, Some(2));
    assert_eq!(compiled.lazy_loading, Some(false));
    assert_eq!(compiled.max_recursion_depth, 3);
    assert!(compiled.skip_props_loading);
    assert_eq!(compiled.projection_fields, vec!["Name".to_string(), "Address.City".to_string()]);
    assert_eq!(compiled.projection_structures, vec![11, 12]);
    assert_eq!(compiled.user_id, Some(77));
    assert_eq!(compiled.parent_ids, Some(vec![5]));
    Ok(())
}

#[test]
fn test_tree_operations_require_tree_builder() {
    let query = Query::<Category>::new(RecordingProvider::new(Vec::new()));
    assert!(!query.is_tree());
    assert_eq!(query.where_roots().unwrap_err(), QueryError::TreeOnly { operation: "where_roots" });
    assert_eq!(query.where_leaves().unwrap_err(), QueryError::TreeOnly { operation: "where_leaves" });
    assert_eq!(query.where_has_ancestor(field("Title").eq("x"), 3).unwrap_err(), QueryError::TreeOnly { operation: "where_has_ancestor" });
    assert_eq!(query.where_has_descendant(field("Title").eq("x"), 3).unwrap_err(), QueryError::TreeOnly { operation: "where_has_descendant" });
    assert_eq!(query.where_level(ComparisonOperator::Equal, 1).unwrap_err(), QueryError::TreeOnly { operation: "where_level" });
    assert_eq!(query.where_children_of(1).unwrap_err(), QueryError::TreeOnly { operation: "where_children_of" });
    assert_eq!(query.where_descendants_of(1, 2).unwrap_err(), QueryError::TreeOnly { operation: "where_descendants_of" });
    assert_eq!(query.to_tree().unwrap_err(), QueryError::TreeOnly { operation: "to_tree" });
}

#[test]
fn test_tree_filters_compile_into_document() -> Result<()> {
    let query = Query::<Category>::tree(RecordingProvider::new(Vec::new()), Some(1), Some(4))
        .filter(field("Level").gt(0))?
        .where_has_ancestor(field("Title").eq("Root"), 5)?
        .where_level(ComparisonOperator::LessThanOrEqual, 3)?
        .to_tree()?;
    let compiled = query.compile()?;
    assert_eq!(
        compiled.filter,
        json!({
            "Level": {"$gt": 0},
            "$hasAncestor": {"filter": {"Title": {"$eq": "Root"}}, "maxDepth": 5},
            "$level": {"$lte": 3},
        })
    );
    let tree = compiled.tree.expect("tree target");
    assert_eq!((tree.root_id, tree.max_depth, tree.materialize), (Some(1), Some(4), true));
    Ok(())
}

#[test]
fn test_unsatisfiable_ancestor_marks_empty() -> Result<()> {
    let query = Query::<Category>::tree(RecordingProvider::new(Vec::new()), None, None).where_has_ancestor(lit(false), 2)?;
    assert!(query.context().is_empty);
    Ok(())
}

#[tokio::test]
async fn test_analytics_delegate_to_provider() -> Result<()> {
    let provider = RecordingProvider::new(Vec::new());
    let query = Query::<Product>::new(provider.clone()).filter(field("Stock").gt(0))?;

    let sum = query.aggregate(field("Price"), AggregateFunction::Sum).await?;
    assert_eq!(sum, json!({"field": "Price", "function": "Sum"}));

    let price = query.property(&field("Price"))?;
    let stock = query.property(&field("Stock"))?;
    let requests = [AggregateRequest::new(&price, AggregateFunction::Avg), AggregateRequest::new(&stock, AggregateFunction::Max)];
    let batch = query.aggregate_batch(&requests).await?;
    assert_eq!(batch.keys().cloned().collect::<Vec<_>>(), vec!["Avg(Price)".to_string(), "Max(Stock)".to_string()]);

    let group = GroupRequest {
        keys: vec![query.base_property(&field("ParentId"))?.field_key()],
        aggregates: vec![AggregateRequest::new(&price, AggregateFunction::Count)],
    };
    assert_eq!(query.group_by(&group).await?, vec![json!({"keys": ["0$:ParentId"], "aggregates": 1})]);

    let window = WindowRequest {
        partition_by: vec!["Name".into()],
        order_by: json!([]),
        columns: vec![WindowColumn { function: WindowFunction::RowNumber, field: None, alias: "rn".into() }],
    };
    assert_eq!(query.window(&window).await?, vec![json!({"partition_by": ["Name"]})]);
    assert!(query.group_by_window(&group, &window).await?.is_empty());

    let sql = query.to_sql().await?;
    assert!(sql.contains(r#"{"Stock":{"$gt":0}}"#));
    assert!(provider.calls().iter().all(|(_, compiled)| compiled.filter == json!({"Stock": {"$gt": 0}})));
    Ok(())
}
