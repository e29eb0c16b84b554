//! Parameter and attribute values.
//!
//! `Value` is the closed set of shapes the cache understands. Anything that
//! must be walked for dependencies appears here as its own variant instead of
//! being discovered at runtime.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use super::entities::{Entity, EntityCollection, EntityRef};
use super::query::{ColumnSet, Query, RelationshipQueryCollection, sort_by_encoding};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Guid(Uuid),
    EntityRef(EntityRef),
    /// Unordered set of references (e.g. the targets of an associate call).
    EntityRefs(Vec<EntityRef>),
    Entity(Arc<Entity>),
    Entities(Arc<EntityCollection>),
    Query(Arc<Query>),
    RelatedQueries(RelationshipQueryCollection),
    Columns(ColumnSet),
}

impl Value {
    /// Whether this value terminates a dependency walk on its own.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Value::Null
                | Value::Bool(_)
                | Value::Int(_)
                | Value::Float(_)
                | Value::Text(_)
                | Value::Guid(_)
                | Value::Columns(_)
        )
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(flag) => Some(*flag),
            _ => None,
        }
    }

    /// Rewrite order-insensitive parts into a stable order so that
    /// semantically equal values encode identically.
    pub(crate) fn canonicalize(&mut self) -> Result<(), serde_json::Error> {
        match self {
            Value::EntityRefs(refs) => {
                refs.sort();
                refs.dedup();
            }
            Value::Query(query) => Arc::make_mut(query).canonicalize()?,
            Value::RelatedQueries(queries) => queries.canonicalize()?,
            Value::Entity(entity) => {
                for value in Arc::make_mut(entity).attributes.values_mut() {
                    value.canonicalize()?;
                }
            }
            Value::Entities(collection) => {
                for entity in &mut Arc::make_mut(collection).entities {
                    for value in Arc::make_mut(entity).attributes.values_mut() {
                        value.canonicalize()?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub(crate) fn canonicalize_all(values: &mut Vec<Value>) -> Result<(), serde_json::Error> {
        for value in values.iter_mut() {
            value.canonicalize()?;
        }
        sort_by_encoding(values)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Value::Guid(value)
    }
}

impl From<EntityRef> for Value {
    fn from(value: EntityRef) -> Self {
        Value::EntityRef(value)
    }
}

impl From<Vec<EntityRef>> for Value {
    fn from(value: Vec<EntityRef>) -> Self {
        Value::EntityRefs(value)
    }
}

impl From<Entity> for Value {
    fn from(value: Entity) -> Self {
        Value::Entity(Arc::new(value))
    }
}

impl From<Arc<Entity>> for Value {
    fn from(value: Arc<Entity>) -> Self {
        Value::Entity(value)
    }
}

impl From<EntityCollection> for Value {
    fn from(value: EntityCollection) -> Self {
        Value::Entities(Arc::new(value))
    }
}

impl From<Query> for Value {
    fn from(value: Query) -> Self {
        Value::Query(Arc::new(value))
    }
}

impl From<RelationshipQueryCollection> for Value {
    fn from(value: RelationshipQueryCollection) -> Self {
        Value::RelatedQueries(value)
    }
}

impl From<ColumnSet> for Value {
    fn from(value: ColumnSet) -> Self {
        Value::Columns(value)
    }
}
