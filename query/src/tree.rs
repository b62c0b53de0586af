//! Hierarchy scoping for tree-aware queries.
//!
//! Tree filters are kept apart from the regular predicate and compiled into their own `$`-operators, then
//! conjoined with the regular filter document.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::ast::{ComparisonOperator, FilterExpression};
use crate::error::QueryError;
use crate::facet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeFilter {
    /// Some ancestor within `max_depth` levels matches
    HasAncestor { filter: FilterExpression, max_depth: u32 },
    HasDescendant { filter: FilterExpression, max_depth: u32 },
    Level { operator: ComparisonOperator, level: u32 },
    IsRoot,
    IsLeaf,
    ChildrenOf { parent_id: i64 },
    DescendantsOf { ancestor_id: i64, max_depth: u32 },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeScope {
    /// Start traversal at this object instead of the scheme's roots
    pub root_id: Option<i64>,
    pub max_depth: Option<u32>,
    pub filters: Vec<TreeFilter>,
    /// Return results as a materialized hierarchy
    pub materialize: bool,
}

impl TreeScope {
    pub fn new(root_id: Option<i64>, max_depth: Option<u32>) -> Self { Self { root_id, max_depth, ..Self::default() } }

    pub fn with_filter(mut self, filter: TreeFilter) -> Self {
        self.filters.push(filter);
        self
    }
}

impl TreeFilter {
    pub fn operation(&self) -> &'static str {
        match self {
            TreeFilter::HasAncestor { .. } => "$hasAncestor",
            TreeFilter::HasDescendant { .. } => "$hasDescendant",
            TreeFilter::Level { .. } => "$level",
            TreeFilter::IsRoot => "$isRoot",
            TreeFilter::IsLeaf => "$isLeaf",
            TreeFilter::ChildrenOf { .. } => "$childrenOf",
            TreeFilter::DescendantsOf { .. } => "$descendantsOf",
        }
    }

    pub fn compile(&self) -> Result<JsonValue, QueryError> {
        let body = match self {
            TreeFilter::HasAncestor { filter, max_depth } | TreeFilter::HasDescendant { filter, max_depth } => {
                json!({ "filter": facet::compile_filter(Some(filter))?, "maxDepth": max_depth })
            }
            TreeFilter::Level { operator, level } => facet::single(operator.symbol().to_string(), json!(level)),
            TreeFilter::IsRoot | TreeFilter::IsLeaf => JsonValue::Bool(true),
            TreeFilter::ChildrenOf { parent_id } => json!(parent_id),
            TreeFilter::DescendantsOf { ancestor_id, max_depth } => json!({ "id": ancestor_id, "maxDepth": max_depth }),
        };
        Ok(facet::single(self.operation().to_string(), body))
    }
}

/// Conjoin the regular filter document with every tree filter.
pub fn compile_scoped(filter: JsonValue, scope: &TreeScope) -> Result<JsonValue, QueryError> {
    if scope.filters.is_empty() {
        return Ok(filter);
    }
    let mut parts = Vec::with_capacity(scope.filters.len() + 1);
    if filter.as_object().is_some_and(|map| !map.is_empty()) {
        parts.push(filter);
    }
    for tree_filter in &scope.filters {
        parts.push(tree_filter.compile()?);
    }
    Ok(facet::conjoin(parts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::FilterOperator;
    use crate::property::PropertyRef;
    use crate::value::TypeTag;

    fn name_is(value: &str) -> FilterExpression {
        FilterExpression::comparison(PropertyRef::dynamic("Name", TypeTag::String), FilterOperator::EQUAL, value).unwrap()
    }

    #[test]
    fn test_tree_filter_documents() {
        let ancestor = TreeFilter::HasAncestor { filter: name_is("Root"), max_depth: 5 };
        assert_eq!(ancestor.compile().unwrap(), json!({"$hasAncestor": {"filter": {"Name": {"$eq": "Root"}}, "maxDepth": 5}}));
        let level = TreeFilter::Level { operator: ComparisonOperator::LessThanOrEqual, level: 2 };
        assert_eq!(level.compile().unwrap(), json!({"$level": {"$lte": 2}}));
        assert_eq!(TreeFilter::IsLeaf.compile().unwrap(), json!({"$isLeaf": true}));
        assert_eq!(TreeFilter::ChildrenOf { parent_id: 7 }.compile().unwrap(), json!({"$childrenOf": 7}));
        assert_eq!(
            TreeFilter::DescendantsOf { ancestor_id: 7, max_depth: 3 }.compile().unwrap(),
            json!({"$descendantsOf": {"id": 7, "maxDepth": 3}})
        );
    }

    #[test]
    fn test_scoped_filter_merges_with_regular_filter() {
        let scope = TreeScope::default().with_filter(TreeFilter::IsRoot);
        let merged = compile_scoped(json!({"Name": {"$eq": "a"}}), &scope).unwrap();
        assert_eq!(merged.to_string(), r#"{"Name":{"$eq":"a"},"$isRoot":true}"#);
        assert_eq!(compile_scoped(json!({}), &scope).unwrap(), json!({"$isRoot": true}));
        assert_eq!(compile_scoped(json!({"A": 1}), &TreeScope::default()).unwrap(), json!({"A": 1}));
    }

    #[test]
    fn test_scoped_filter_falls_back_to_and() {
        let scope = TreeScope::default().with_filter(TreeFilter::IsLeaf);
        let merged = compile_scoped(json!({"$or": [{"A": 1}, {"B": 2}]}), &scope).unwrap();
        assert_eq!(merged, json!({"$and": [{"$or": [{"A": 1}, {"B": 2}]}, {"$isLeaf": true}]}));
    }
}
