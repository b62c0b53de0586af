use serde::{Deserialize, Serialize};

/// Defaults applied to every new query context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    /// How deep nested objects are followed when materializing results
    pub max_recursion_depth: u32,
    /// Depth of nested props to load; `None` leaves it to the provider
    pub props_depth: Option<u32>,
    /// `None` means the provider default
    pub lazy_loading: Option<bool>,
    pub skip_props_loading: bool,
}

impl QueryOptions {
    pub const DEFAULT_MAX_RECURSION_DEPTH: u32 = 10;

    pub fn new() -> Self {
        Self { max_recursion_depth: Self::DEFAULT_MAX_RECURSION_DEPTH, props_depth: None, lazy_loading: None, skip_props_loading: false }
    }

    /// Top-level objects only, loaded eagerly
    pub fn shallow() -> Self { Self { max_recursion_depth: 1, props_depth: Some(1), lazy_loading: Some(false), ..Self::new() } }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> { serde_json::from_str(json) }
}

impl Default for QueryOptions {
    fn default() -> Self { Self::new() }
}
