//! Fluent query builder.
//!
//! `Query<T>` pairs a [`QueryContext`] with the provider that will run it. Builder calls parse their expressions
//! against `T`'s scheme and return a new `Query`; the receiver is never modified. Terminal operations compile the
//! context and hand it to the provider.

use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::ast::{ComparisonOperator, Direction, FilterExpression, OrderingExpression};
use crate::config::QueryOptions;
use crate::context::{CompiledQuery, QueryContext, UserContext};
use crate::error::{ProviderError, QueryError};
use crate::expr::Expr;
use crate::ordering::parse_ordering;
use crate::predicate::parse_predicate;
use crate::property::{self, Origin, PropertyRef};
use crate::provider::{AggregateFunction, AggregateRequest, GroupRequest, ObjectRecord, QueryProvider, WindowRequest};
use crate::scheme::Props;
use crate::tree::{TreeFilter, TreeScope};
use crate::value::Value;

pub struct Query<T: Props> {
    provider: Arc<dyn QueryProvider>,
    context: QueryContext<T>,
}

impl<T: Props> Clone for Query<T> {
    fn clone(&self) -> Self { Self { provider: self.provider.clone(), context: self.context.clone() } }
}

impl<T: Props> std::fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.debug_struct("Query").field("context", &self.context).finish() }
}

impl<T: Props> Query<T> {
    pub fn new(provider: Arc<dyn QueryProvider>) -> Self { Self::with_options(provider, &QueryOptions::default()) }

    pub fn with_options(provider: Arc<dyn QueryProvider>, options: &QueryOptions) -> Self {
        Self { provider, context: QueryContext::for_props(options) }
    }

    /// A tree-aware query, optionally rooted at `root_id` and limited to `max_depth` levels.
    pub fn tree(provider: Arc<dyn QueryProvider>, root_id: Option<i64>, max_depth: Option<u32>) -> Self {
        let query = Self::new(provider);
        let context = query.context.with_tree(TreeScope::new(root_id, max_depth));
        query.derive(context)
    }

    pub fn context(&self) -> &QueryContext<T> { &self.context }

    pub fn is_tree(&self) -> bool { self.context.tree.is_some() }

    fn derive(&self, context: QueryContext<T>) -> Self { Self { provider: self.provider.clone(), context } }

    /// Resolve a selector against the dynamic properties.
    pub fn property(&self, selector: &Expr) -> Result<PropertyRef, QueryError> { resolve::<T>(selector, Origin::Props) }

    /// Resolve a selector against the base object. A leading `Props` member reaches the dynamic properties.
    pub fn base_property(&self, selector: &Expr) -> Result<PropertyRef, QueryError> { resolve::<T>(selector, Origin::Base) }

    // filtering

    pub fn filter(&self, predicate: Expr) -> Result<Self, QueryError> { self.filter_view(&predicate, Origin::Props) }

    pub fn filter_base(&self, predicate: Expr) -> Result<Self, QueryError> { self.filter_view(&predicate, Origin::Base) }

    fn filter_view(&self, predicate: &Expr, view: Origin) -> Result<Self, QueryError> {
        let filter = parse_predicate(predicate, view, T::scheme())?;
        Ok(self.derive(self.context.with_filter(filter)))
    }

    /// Membership filter. An empty `values` makes the query provably empty.
    pub fn filter_in<V: Into<Value>>(&self, selector: Expr, values: impl IntoIterator<Item = V>) -> Result<Self, QueryError> {
        let property = self.property(&selector)?;
        Ok(self.derive(self.context.with_filter(FilterExpression::is_in(property, values.into_iter().map(Into::into).collect()))))
    }

    pub fn filter_base_in<V: Into<Value>>(&self, selector: Expr, values: impl IntoIterator<Item = V>) -> Result<Self, QueryError> {
        let property = self.base_property(&selector)?;
        Ok(self.derive(self.context.with_filter(FilterExpression::is_in(property, values.into_iter().map(Into::into).collect()))))
    }

    // ordering

    fn ordering(&self, selector: &Expr, direction: Direction, view: Origin) -> Result<OrderingExpression, QueryError> {
        parse_ordering(selector, direction, view, T::scheme())
    }

    pub fn order_by(&self, selector: Expr) -> Result<Self, QueryError> {
        Ok(self.derive(self.context.with_ordering(self.ordering(&selector, Direction::Asc, Origin::Props)?)))
    }

    pub fn order_by_desc(&self, selector: Expr) -> Result<Self, QueryError> {
        Ok(self.derive(self.context.with_ordering(self.ordering(&selector, Direction::Desc, Origin::Props)?)))
    }

    pub fn then_by(&self, selector: Expr) -> Result<Self, QueryError> {
        Ok(self.derive(self.context.then_ordering(self.ordering(&selector, Direction::Asc, Origin::Props)?)))
    }

    pub fn then_by_desc(&self, selector: Expr) -> Result<Self, QueryError> {
        Ok(self.derive(self.context.then_ordering(self.ordering(&selector, Direction::Desc, Origin::Props)?)))
    }

    pub fn order_by_base(&self, selector: Expr) -> Result<Self, QueryError> {
        Ok(self.derive(self.context.with_ordering(self.ordering(&selector, Direction::Asc, Origin::Base)?)))
    }

    pub fn order_by_base_desc(&self, selector: Expr) -> Result<Self, QueryError> {
        Ok(self.derive(self.context.with_ordering(self.ordering(&selector, Direction::Desc, Origin::Base)?)))
    }

    pub fn then_by_base(&self, selector: Expr) -> Result<Self, QueryError> {
        Ok(self.derive(self.context.then_ordering(self.ordering(&selector, Direction::Asc, Origin::Base)?)))
    }

    pub fn then_by_base_desc(&self, selector: Expr) -> Result<Self, QueryError> {
        Ok(self.derive(self.context.then_ordering(self.ordering(&selector, Direction::Desc, Origin::Base)?)))
    }

    // distinct

    pub fn distinct(&self) -> Self { self.derive(self.context.with_distinct()) }

    pub fn distinct_by_base_fields(&self) -> Self { self.derive(self.context.with_distinct_by_base_fields()) }

    pub fn distinct_by(&self, selector: Expr) -> Result<Self, QueryError> {
        Ok(self.derive(self.context.with_distinct_by(self.ordering(&selector, Direction::Asc, Origin::Props)?)))
    }

    pub fn distinct_by_desc(&self, selector: Expr) -> Result<Self, QueryError> {
        Ok(self.derive(self.context.with_distinct_by(self.ordering(&selector, Direction::Desc, Origin::Props)?)))
    }

    // paging, loading and scoping

    pub fn take(&self, count: i64) -> Result<Self, QueryError> { Ok(self.derive(self.context.with_limit(count)?)) }

    pub fn skip(&self, count: i64) -> Result<Self, QueryError> { Ok(self.derive(self.context.with_offset(count)?)) }

    pub fn with_lazy_loading(&self, enabled: bool) -> Self { self.derive(self.context.with_lazy_loading(enabled)) }

    pub fn with_max_depth(&self, depth: u32) -> Self { self.derive(self.context.with_max_recursion_depth(depth)) }

    pub fn with_props_depth(&self, depth: u32) -> Self { self.derive(self.context.with_props_depth(depth)) }

    pub fn skip_props_loading(&self) -> Self { self.derive(self.context.with_skip_props_loading()) }

    /// Load only the given dynamic properties.
    pub fn select_fields(&self, selectors: impl IntoIterator<Item = Expr>) -> Result<Self, QueryError> {
        let paths = selectors.into_iter().map(|selector| self.property(&selector).map(|property| property.path)).collect::<Result<Vec<_>, _>>()?;
        Ok(self.derive(self.context.with_projection_fields(paths)))
    }

    pub fn select_structures(&self, ids: impl IntoIterator<Item = i64>) -> Self { self.derive(self.context.with_projection_structures(ids)) }

    pub fn for_user(&self, user: UserContext) -> Self { self.derive(self.context.with_user(user)) }

    pub fn within_parents(&self, ids: impl IntoIterator<Item = i64>) -> Self { self.derive(self.context.with_parents(ids)) }

    // tree scoping

    fn tree_filter(&self, operation: &'static str, filter: TreeFilter) -> Result<Self, QueryError> {
        Ok(self.derive(self.context.with_tree_filter(operation, filter)?))
    }

    /// Objects with an ancestor, at most `max_depth` levels up, matching `predicate`.
    pub fn where_has_ancestor(&self, predicate: Expr, max_depth: u32) -> Result<Self, QueryError> {
        self.require_tree("where_has_ancestor")?;
        let filter = parse_predicate(&predicate, Origin::Props, T::scheme())?;
        self.tree_filter("where_has_ancestor", TreeFilter::HasAncestor { filter, max_depth })
    }

    pub fn where_has_descendant(&self, predicate: Expr, max_depth: u32) -> Result<Self, QueryError> {
        self.require_tree("where_has_descendant")?;
        let filter = parse_predicate(&predicate, Origin::Props, T::scheme())?;
        self.tree_filter("where_has_descendant", TreeFilter::HasDescendant { filter, max_depth })
    }

    pub fn where_level(&self, operator: ComparisonOperator, level: u32) -> Result<Self, QueryError> {
        self.tree_filter("where_level", TreeFilter::Level { operator, level })
    }

    pub fn where_roots(&self) -> Result<Self, QueryError> { self.tree_filter("where_roots", TreeFilter::IsRoot) }

    pub fn where_leaves(&self) -> Result<Self, QueryError> { self.tree_filter("where_leaves", TreeFilter::IsLeaf) }

    pub fn where_children_of(&self, parent_id: i64) -> Result<Self, QueryError> {
        self.tree_filter("where_children_of", TreeFilter::ChildrenOf { parent_id })
    }

    pub fn where_descendants_of(&self, ancestor_id: i64, max_depth: u32) -> Result<Self, QueryError> {
        self.tree_filter("where_descendants_of", TreeFilter::DescendantsOf { ancestor_id, max_depth })
    }

    /// Return results as a hierarchy instead of a flat list.
    pub fn to_tree(&self) -> Result<Self, QueryError> { Ok(self.derive(self.context.with_materialized_tree()?)) }

    fn require_tree(&self, operation: &'static str) -> Result<(), QueryError> {
        match self.context.tree {
            Some(_) => Ok(()),
            None => Err(QueryError::TreeOnly { operation }),
        }
    }

    // terminal operations

    pub fn compile(&self) -> Result<CompiledQuery, QueryError> { self.context.compile() }

    pub async fn to_list(&self) -> Result<Vec<ObjectRecord>, ProviderError> {
        if self.context.is_empty {
            debug!(scheme_id = self.context.scheme_id, "empty query, skipping provider");
            return Ok(Vec::new());
        }
        self.provider.execute(&self.compile()?).await
    }

    pub async fn first(&self) -> Result<Option<ObjectRecord>, ProviderError> { Ok(self.take(1)?.to_list().await?.into_iter().next()) }

    pub async fn count(&self) -> Result<u64, ProviderError> {
        if self.context.is_empty {
            debug!(scheme_id = self.context.scheme_id, "empty query, skipping provider");
            return Ok(0);
        }
        self.provider.count(&self.compile()?).await
    }

    pub async fn any(&self) -> Result<bool, ProviderError> { Ok(self.first().await?.is_some()) }

    pub async fn delete(&self) -> Result<u64, ProviderError> {
        if self.context.is_empty {
            debug!(scheme_id = self.context.scheme_id, "empty query, skipping provider");
            return Ok(0);
        }
        self.provider.delete(&self.compile()?).await
    }

    pub async fn aggregate(&self, selector: Expr, function: AggregateFunction) -> Result<JsonValue, ProviderError> {
        let request = AggregateRequest::new(&self.property(&selector)?, function);
        self.provider.aggregate(&self.compile()?, &request).await
    }

    pub async fn aggregate_batch(&self, requests: &[AggregateRequest]) -> Result<Map<String, JsonValue>, ProviderError> {
        self.provider.aggregate_batch(&self.compile()?, requests).await
    }

    pub async fn group_by(&self, request: &GroupRequest) -> Result<Vec<JsonValue>, ProviderError> {
        self.provider.group_by(&self.compile()?, request).await
    }

    pub async fn window(&self, request: &WindowRequest) -> Result<Vec<JsonValue>, ProviderError> {
        self.provider.window(&self.compile()?, request).await
    }

    pub async fn group_by_window(&self, group: &GroupRequest, window: &WindowRequest) -> Result<Vec<JsonValue>, ProviderError> {
        self.provider.group_by_window(&self.compile()?, group, window).await
    }

    pub async fn to_sql(&self) -> Result<String, ProviderError> { self.provider.to_sql(&self.compile()?).await }
}

fn resolve<T: Props>(selector: &Expr, view: Origin) -> Result<PropertyRef, QueryError> {
    property::resolve(selector, view, T::scheme())?.ok_or_else(|| QueryError::unsupported(selector.kind(), "selector must be a property access"))
}
