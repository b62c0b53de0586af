//! Typed "properties" descriptors.
//!
//! A scheme lists the dynamic attributes an object carries, with their declared types. Nested classes
//! (and arrays/dictionaries of classes) point at the scheme describing their own fields.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::value::TypeTag;

#[derive(Debug, Clone, PartialEq)]
pub struct SchemeDef {
    pub id: i64,
    pub name: String,
    fields: IndexMap<String, FieldDef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub ty: TypeTag,
    /// Structure of the innermost class element, if any
    pub class: Option<Arc<SchemeDef>>,
}

impl SchemeDef {
    pub fn new(id: i64, name: impl Into<String>) -> Self { Self { id, name: name.into(), fields: IndexMap::new() } }

    pub fn field(mut self, name: impl Into<String>, ty: TypeTag) -> Self {
        let name = name.into();
        self.fields.insert(name.clone(), FieldDef { name, ty, class: None });
        self
    }

    /// Adds a field whose type (or element type) is a nested class described by `class`.
    pub fn class_field(mut self, name: impl Into<String>, ty: TypeTag, class: SchemeDef) -> Self {
        let name = name.into();
        self.fields.insert(name.clone(), FieldDef { name, ty, class: Some(Arc::new(class)) });
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldDef> { self.fields.get(name) }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDef> { self.fields.values() }
}

/// Implemented by typed properties structs to expose the scheme queries compile against.
pub trait Props: Send + Sync + 'static {
    fn scheme() -> &'static SchemeDef;
}
