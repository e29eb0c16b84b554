//! Records exchanged with the entity service.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::types::Value;

/// Opaque record identifier as issued by the entity service.
///
/// An empty identifier means "not yet assigned" and never produces an
/// instance-level dependency.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Uuid> for RecordId {
    fn from(value: Uuid) -> Self {
        if value.is_nil() {
            Self::default()
        } else {
            Self(value.to_string())
        }
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u64> for RecordId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

/// Reference to a record by type name and (optional) identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub type_name: String,
    #[serde(
        default,
        deserialize_with = "non_empty_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<RecordId>,
}

fn non_empty_id<'de, D>(deserializer: D) -> Result<Option<RecordId>, D::Error>
where
    D: Deserializer<'de>,
{
    let id = Option::<RecordId>::deserialize(deserializer)?;
    Ok(id.filter(|id| !id.is_empty()))
}

impl EntityRef {
    /// Build a reference; an empty identifier is normalized to `None`.
    pub fn new(type_name: impl Into<String>, id: impl Into<RecordId>) -> Self {
        let id = id.into();
        Self {
            type_name: type_name.into(),
            id: (!id.is_empty()).then_some(id),
        }
    }

    /// A reference to the type as a whole.
    pub fn class(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: None,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}#{}", self.type_name, id),
            None => f.write_str(&self.type_name),
        }
    }
}

/// A domain record: attribute bag plus any related collections that were
/// fetched alongside it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
    pub type_name: String,
    pub id: Option<RecordId>,
    pub attributes: BTreeMap<String, Value>,
    /// Related records keyed by relationship name.
    pub related: BTreeMap<String, Arc<EntityCollection>>,
}

impl Entity {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: None,
            attributes: BTreeMap::new(),
            related: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<RecordId>) -> Self {
        let id = id.into();
        self.id = (!id.is_empty()).then_some(id);
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_related(mut self, relationship: impl Into<String>, records: EntityCollection) -> Self {
        self.related.insert(relationship.into(), Arc::new(records));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn to_ref(&self) -> EntityRef {
        EntityRef {
            type_name: self.type_name.clone(),
            id: self.id.clone(),
        }
    }
}

/// Result of a bulk read. `type_name` is the declared record type and is
/// meaningful even when `entities` is empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityCollection {
    pub type_name: String,
    pub entities: Vec<Arc<Entity>>,
    pub more_records: bool,
}

impl EntityCollection {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            entities: Vec::new(),
            more_records: false,
        }
    }

    pub fn with_entities(mut self, entities: impl IntoIterator<Item = Entity>) -> Self {
        self.entities.extend(entities.into_iter().map(Arc::new));
        self
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
