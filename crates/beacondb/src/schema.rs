//! Collaborator contracts consumed by the shard.
//!
//! The schema manager, vectorizer, authorizer and lock provider are external
//! subsystems; the shard consumes them through the traits below, injected at
//! construction. The in-memory implementations here serve composition roots
//! and tests.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::object::{Kind, PropertyValue};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub username: String,
    pub groups: Vec<String>,
}

impl Principal {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            groups: Vec::new(),
        }
    }
}

/// Schema-declared property type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    String,
    Int,
    Number,
    Bool,
    Date,
    Geo,
    Text,
    Phone,
    SingleRef,
    MultiRef,
}

impl DataType {
    pub fn matches(self, value: &PropertyValue) -> bool {
        matches!(
            (self, value),
            (DataType::String, PropertyValue::String(_))
                | (DataType::Int, PropertyValue::Int(_))
                | (DataType::Number, PropertyValue::Number(_))
                | (DataType::Bool, PropertyValue::Bool(_))
                | (DataType::Date, PropertyValue::Date(_))
                | (DataType::Geo, PropertyValue::Geo { .. })
                | (DataType::Text, PropertyValue::Text(_))
                | (DataType::Phone, PropertyValue::Phone(_))
                | (DataType::SingleRef, PropertyValue::SingleRef(_))
                | (DataType::MultiRef, PropertyValue::MultiRef(_))
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub data_type: DataType,
    /// Whether a multi-reference property may hold the same beacon twice.
    pub allow_duplicate_refs: bool,
}

impl PropertyDef {
    pub fn of(data_type: DataType) -> Self {
        Self {
            data_type,
            allow_duplicate_refs: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: String,
    pub properties: BTreeMap<String, PropertyDef>,
}

impl ClassDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, def: PropertyDef) -> Self {
        self.properties.insert(name.into(), def);
        self
    }
}

/// Read access to the user-declared schema.
pub trait SchemaGetter: Send + Sync {
    fn class(&self, kind: Kind, name: &str) -> Option<ClassDef>;
}

/// Turns an object's content into its dense vector when the caller supplied
/// none.
pub trait Vectorizer: Send + Sync {
    fn vectorize(
        &self,
        class: &str,
        properties: &BTreeMap<String, PropertyValue>,
    ) -> Result<Vec<f32>>;
}

/// Principal + verb + resource → allow or deny.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, principal: &Principal, verb: &str, resource: &str) -> Result<()>;
}

/// Provides the schema read/write lock. The shard takes the read side for the
/// duration of any operation touching schema-typed data; the schema manager
/// takes the write side during class alterations.
pub trait LockProvider: Send + Sync {
    fn schema_lock(&self) -> &RwLock<()>;
}

/// In-memory schema for composition roots and tests.
#[derive(Default)]
pub struct MapSchema {
    classes: FxHashMap<(Kind, String), ClassDef>,
}

impl MapSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_class(mut self, kind: Kind, def: ClassDef) -> Self {
        self.classes.insert((kind, def.name.clone()), def);
        self
    }
}

impl SchemaGetter for MapSchema {
    fn class(&self, kind: Kind, name: &str) -> Option<ClassDef> {
        self.classes.get(&(kind, name.to_string())).cloned()
    }
}

/// Deny-nothing authorizer.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _principal: &Principal, _verb: &str, _resource: &str) -> Result<()> {
        Ok(())
    }
}

/// Process-local lock provider for single-node deployments.
#[derive(Default)]
pub struct LocalLocks {
    schema: RwLock<()>,
}

impl LocalLocks {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockProvider for LocalLocks {
    fn schema_lock(&self) -> &RwLock<()> {
        &self.schema
    }
}

/// Vectorizer stand-in for deployments where every write carries its vector.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoVectorizer;

impl Vectorizer for NoVectorizer {
    fn vectorize(
        &self,
        class: &str,
        _properties: &BTreeMap<String, PropertyValue>,
    ) -> Result<Vec<f32>> {
        Err(Error::invalid_input(format!(
            "object of class {class} has no vector and no vectorizer is configured"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_type_matching() {
        assert!(DataType::Int.matches(&PropertyValue::Int(3)));
        assert!(!DataType::Int.matches(&PropertyValue::Number(3.0)));
        assert!(DataType::Geo.matches(&PropertyValue::Geo {
            lat: 52.4,
            lon: 13.2
        }));
        assert!(!DataType::Text.matches(&PropertyValue::String("x".into())));
    }

    #[test]
    fn map_schema_is_kind_scoped() {
        let schema = MapSchema::new().with_class(Kind::Thing, ClassDef::new("City"));
        assert!(schema.class(Kind::Thing, "City").is_some());
        assert!(schema.class(Kind::Action, "City").is_none());
        assert!(schema.class(Kind::Thing, "Town").is_none());
    }
}
