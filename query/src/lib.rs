pub mod ast;
pub mod coerce;
pub mod config;
pub mod context;
pub mod dialect;
pub mod error;
pub mod expr;
pub mod facet;
pub mod ordering;
pub mod predicate;
pub mod property;
pub mod provider;
pub mod query;
pub mod scheme;
pub mod tree;
pub mod value;

pub use config::QueryOptions;
pub use context::{CompiledQuery, QueryContext, UserContext};
pub use error::{CoercionError, ProviderError, QueryError};
pub use expr::{captured, cond, field, lit, param, Expr};
pub use query::Query;
pub use scheme::{Props, SchemeDef};
pub use value::{ListItemRef, TypeTag, Value};
