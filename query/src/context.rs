//! Immutable query state and its hand-off form.
//!
//! Every transition takes `&self` and returns a new context. Filter trees are shared between derived contexts
//! through `Arc`; orderings, flags and projection sets are copied.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::ast::{FilterExpression, OrderingExpression};
use crate::config::QueryOptions;
use crate::error::QueryError;
use crate::facet;
use crate::scheme::Props;
use crate::tree::{self, TreeFilter, TreeScope};

/// Identity the query runs as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: i64,
    /// Restrict results to objects the user may read
    pub check_permissions: bool,
}

impl UserContext {
    pub fn new(user_id: i64) -> Self { Self { user_id, check_permissions: true } }
}

pub struct QueryContext<T> {
    pub scheme_id: i64,
    pub user: Option<UserContext>,
    pub parent_ids: Option<Vec<i64>>,
    pub filter: Option<Arc<FilterExpression>>,
    pub orderings: Vec<OrderingExpression>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub is_distinct: bool,
    pub is_distinct_by_base_fields: bool,
    pub distinct_by: Option<OrderingExpression>,
    /// Provably empty; terminal operations answer without a provider round trip
    pub is_empty: bool,
    pub lazy_loading: Option<bool>,
    pub projection_fields: Option<IndexSet<String>>,
    pub projection_structures: Option<IndexSet<i64>>,
    pub skip_props_loading: bool,
    pub max_recursion_depth: u32,
    pub props_depth: Option<u32>,
    pub tree: Option<TreeScope>,
    _props: PhantomData<fn() -> T>,
}

impl<T> Clone for QueryContext<T> {
    fn clone(&self) -> Self {
        Self {
            scheme_id: self.scheme_id,
            user: self.user.clone(),
            parent_ids: self.parent_ids.clone(),
            filter: self.filter.clone(),
            orderings: self.orderings.clone(),
            limit: self.limit,
            offset: self.offset,
            is_distinct: self.is_distinct,
            is_distinct_by_base_fields: self.is_distinct_by_base_fields,
            distinct_by: self.distinct_by.clone(),
            is_empty: self.is_empty,
            lazy_loading: self.lazy_loading,
            projection_fields: self.projection_fields.clone(),
            projection_structures: self.projection_structures.clone(),
            skip_props_loading: self.skip_props_loading,
            max_recursion_depth: self.max_recursion_depth,
            props_depth: self.props_depth,
            tree: self.tree.clone(),
            _props: PhantomData,
        }
    }
}

impl<T> fmt::Debug for QueryContext<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryContext")
            .field("scheme_id", &self.scheme_id)
            .field("filter", &self.filter)
            .field("orderings", &self.orderings)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .field("is_empty", &self.is_empty)
            .field("tree", &self.tree)
            .finish_non_exhaustive()
    }
}

impl<T: Props> QueryContext<T> {
    pub fn for_props(options: &QueryOptions) -> Self { Self::new(T::scheme().id, options) }
}

impl<T> QueryContext<T> {
    pub fn new(scheme_id: i64, options: &QueryOptions) -> Self {
        Self {
            scheme_id,
            user: None,
            parent_ids: None,
            filter: None,
            orderings: Vec::new(),
            limit: None,
            offset: None,
            is_distinct: false,
            is_distinct_by_base_fields: false,
            distinct_by: None,
            is_empty: false,
            lazy_loading: options.lazy_loading,
            projection_fields: None,
            projection_structures: None,
            skip_props_loading: options.skip_props_loading,
            max_recursion_depth: options.max_recursion_depth,
            props_depth: options.props_depth,
            tree: None,
            _props: PhantomData,
        }
    }

    fn derive(&self, apply: impl FnOnce(&mut Self)) -> Self {
        let mut next = self.clone();
        apply(&mut next);
        next
    }

    /// AND `filter` into the current filter. A literal `false` marks the context empty; a literal `true` is a no-op.
    pub fn with_filter(&self, filter: FilterExpression) -> Self {
        self.derive(|ctx| match filter {
            FilterExpression::Constant(true) => {}
            filter => {
                if filter.is_always_false() {
                    ctx.is_empty = true;
                }
                let combined = match ctx.filter.take() {
                    Some(existing) => FilterExpression::and(existing.as_ref().clone(), filter),
                    None => filter,
                };
                ctx.filter = Some(Arc::new(combined));
            }
        })
    }

    /// Replaces the ordering list. An active distinct-by key stays in front.
    pub fn with_ordering(&self, ordering: OrderingExpression) -> Self {
        self.derive(|ctx| {
            ctx.orderings = match &ctx.distinct_by {
                Some(distinct) if distinct.property != ordering.property => vec![distinct.clone(), ordering],
                Some(distinct) => vec![distinct.clone()],
                None => vec![ordering],
            }
        })
    }

    pub fn then_ordering(&self, ordering: OrderingExpression) -> Self { self.derive(|ctx| ctx.orderings.push(ordering)) }

    pub fn with_distinct(&self) -> Self { self.derive(|ctx| ctx.is_distinct = true) }

    pub fn with_distinct_by_base_fields(&self) -> Self { self.derive(|ctx| ctx.is_distinct_by_base_fields = true) }

    /// Per-field dedup needs its key to lead the ordering list.
    pub fn with_distinct_by(&self, ordering: OrderingExpression) -> Self {
        self.derive(|ctx| {
            if let Some(previous) = ctx.distinct_by.take() {
                if ctx.orderings.first() == Some(&previous) {
                    ctx.orderings.remove(0);
                }
            }
            ctx.orderings.insert(0, ordering.clone());
            ctx.distinct_by = Some(ordering);
        })
    }

    pub fn with_limit(&self, count: i64) -> Result<Self, QueryError> {
        let count = u64::try_from(count)
            .map_err(|_| QueryError::InvalidArgument { operation: "take", reason: format!("count must not be negative, got {count}") })?;
        Ok(self.derive(|ctx| {
            ctx.limit = Some(count);
            if count == 0 {
                ctx.is_empty = true;
            }
        }))
    }

    pub fn with_offset(&self, count: i64) -> Result<Self, QueryError> {
        let count = u64::try_from(count)
            .map_err(|_| QueryError::InvalidArgument { operation: "skip", reason: format!("count must not be negative, got {count}") })?;
        Ok(self.derive(|ctx| ctx.offset = Some(count)))
    }

    pub fn with_lazy_loading(&self, enabled: bool) -> Self { self.derive(|ctx| ctx.lazy_loading = Some(enabled)) }

    pub fn with_max_recursion_depth(&self, depth: u32) -> Self { self.derive(|ctx| ctx.max_recursion_depth = depth) }

    pub fn with_props_depth(&self, depth: u32) -> Self { self.derive(|ctx| ctx.props_depth = Some(depth)) }

    pub fn with_skip_props_loading(&self) -> Self { self.derive(|ctx| ctx.skip_props_loading = true) }

    pub fn with_projection_fields(&self, fields: impl IntoIterator<Item = String>) -> Self {
        self.derive(|ctx| ctx.projection_fields.get_or_insert_with(IndexSet::new).extend(fields))
    }

    pub fn with_projection_structures(&self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.derive(|ctx| ctx.projection_structures.get_or_insert_with(IndexSet::new).extend(ids))
    }

    pub fn with_user(&self, user: UserContext) -> Self { self.derive(|ctx| ctx.user = Some(user)) }

    /// Scope to children of the given parents. No parents means no results.
    pub fn with_parents(&self, ids: impl IntoIterator<Item = i64>) -> Self {
        let ids: Vec<i64> = ids.into_iter().collect();
        self.derive(|ctx| {
            if ids.is_empty() {
                ctx.is_empty = true;
            }
            ctx.parent_ids = Some(ids);
        })
    }

    pub fn with_tree(&self, scope: TreeScope) -> Self { self.derive(|ctx| ctx.tree = Some(scope)) }

    pub fn with_tree_filter(&self, operation: &'static str, filter: TreeFilter) -> Result<Self, QueryError> {
        let scope = self.tree.clone().ok_or(QueryError::TreeOnly { operation })?;
        let unsatisfiable = matches!(
            &filter,
            TreeFilter::HasAncestor { filter: inner, .. } | TreeFilter::HasDescendant { filter: inner, .. } if inner.is_always_false()
        );
        Ok(self.derive(|ctx| {
            ctx.is_empty |= unsatisfiable;
            ctx.tree = Some(scope.with_filter(filter));
        }))
    }

    pub fn with_materialized_tree(&self) -> Result<Self, QueryError> {
        let mut scope = self.tree.clone().ok_or(QueryError::TreeOnly { operation: "to_tree" })?;
        scope.materialize = true;
        Ok(self.derive(|ctx| ctx.tree = Some(scope)))
    }

    /// Compile the accumulated state into the provider hand-off.
    pub fn compile(&self) -> Result<CompiledQuery, QueryError> {
        let mut filter = facet::compile_filter(self.filter.as_deref())?;
        if let Some(scope) = &self.tree {
            filter = tree::compile_scoped(filter, scope)?;
        }
        let compiled = CompiledQuery {
            scheme_id: self.scheme_id,
            user_id: self.user.as_ref().map(|user| user.user_id),
            check_permissions: self.user.as_ref().is_some_and(|user| user.check_permissions),
            parent_ids: self.parent_ids.clone(),
            filter,
            ordering: facet::compile_ordering(&self.orderings),
            limit: self.limit,
            offset: self.offset,
            is_distinct: self.is_distinct,
            is_distinct_by_base_fields: self.is_distinct_by_base_fields,
            distinct_by: self.distinct_by.as_ref().map(|ordering| ordering.property.field_key()),
            is_empty: self.is_empty,
            lazy_loading: self.lazy_loading,
            projection_fields: self.projection_fields.iter().flatten().cloned().collect(),
            projection_structures: self.projection_structures.iter().flatten().copied().collect(),
            skip_props_loading: self.skip_props_loading,
            max_recursion_depth: self.max_recursion_depth,
            props_depth: self.props_depth,
            tree: self.tree.as_ref().map(|scope| TreeTarget { root_id: scope.root_id, max_depth: scope.max_depth, materialize: scope.materialize }),
        };
        debug!(scheme_id = compiled.scheme_id, filter = %compiled.filter, limit = ?compiled.limit, "compiled query");
        Ok(compiled)
    }
}

/// Everything a provider needs to run the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledQuery {
    pub scheme_id: i64,
    pub user_id: Option<i64>,
    pub check_permissions: bool,
    pub parent_ids: Option<Vec<i64>>,
    pub filter: JsonValue,
    pub ordering: JsonValue,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub is_distinct: bool,
    pub is_distinct_by_base_fields: bool,
    /// Field key of the per-field dedup, always the first ordering entry
    pub distinct_by: Option<String>,
    pub is_empty: bool,
    pub lazy_loading: Option<bool>,
    pub projection_fields: Vec<String>,
    pub projection_structures: Vec<i64>,
    pub skip_props_loading: bool,
    pub max_recursion_depth: u32,
    pub props_depth: Option<u32>,
    pub tree: Option<TreeTarget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeTarget {
    pub root_id: Option<i64>,
    pub max_depth: Option<u32>,
    pub materialize: bool,
}
