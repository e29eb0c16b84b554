//! Request and response envelopes for calls to the entity service.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use super::entities::{Entity, EntityCollection, EntityRef, RecordId};
use super::metadata::{EntityFilters, MetadataResponse};
use super::query::{ColumnSet, Query, RelationshipQueryCollection};
use super::types::Value;

pub const PARAM_TARGET: &str = "Target";
pub const PARAM_COLUMN_SET: &str = "ColumnSet";
pub const PARAM_RELATED_QUERIES: &str = "RelatedEntitiesQuery";
pub const PARAM_QUERY: &str = "Query";
pub const PARAM_ENTITY_FILTERS: &str = "EntityFilters";
pub const PARAM_AS_IF_PUBLISHED: &str = "RetrieveAsIfPublished";
pub const PARAM_LOGICAL_NAME: &str = "LogicalName";
pub const PARAM_NAME: &str = "Name";

pub const MESSAGE_RETRIEVE: &str = "Retrieve";
pub const MESSAGE_RETRIEVE_MULTIPLE: &str = "RetrieveMultiple";
pub const MESSAGE_RETRIEVE_ALL_ENTITIES: &str = "RetrieveAllEntities";
pub const MESSAGE_RETRIEVE_ENTITY: &str = "RetrieveEntity";
pub const MESSAGE_RETRIEVE_RELATIONSHIP: &str = "RetrieveRelationship";
pub const MESSAGE_CREATE: &str = "Create";
pub const MESSAGE_UPDATE: &str = "Update";
pub const MESSAGE_DELETE: &str = "Delete";

/// Coarse request classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    SingleRecordRead,
    BulkRead,
    MetadataRead,
    RelationshipRead,
    Generic,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::SingleRecordRead => "single_record_read",
            RequestKind::BulkRead => "bulk_read",
            RequestKind::MetadataRead => "metadata_read",
            RequestKind::RelationshipRead => "relationship_read",
            RequestKind::Generic => "generic",
        }
    }
}

/// An uncached call to the entity service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    pub kind: RequestKind,
    /// Message name, e.g. `Retrieve` or `SetState`.
    pub name: String,
    pub parameters: BTreeMap<String, Value>,
    /// Caller-supplied cache key; replaces the derived key verbatim.
    #[serde(skip)]
    pub key: Option<String>,
    /// Suffix appended to the cache key.
    #[serde(skip)]
    pub selector: Option<String>,
}

impl Request {
    pub fn new(kind: RequestKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            parameters: BTreeMap::new(),
            key: None,
            selector: None,
        }
    }

    pub fn generic(name: impl Into<String>) -> Self {
        Self::new(RequestKind::Generic, name)
    }

    pub fn retrieve(target: EntityRef, columns: ColumnSet) -> Self {
        Self::new(RequestKind::SingleRecordRead, MESSAGE_RETRIEVE)
            .with_parameter(PARAM_TARGET, target)
            .with_parameter(PARAM_COLUMN_SET, columns)
    }

    pub fn retrieve_with_related(
        target: EntityRef,
        columns: ColumnSet,
        related: RelationshipQueryCollection,
    ) -> Self {
        Self::retrieve(target, columns).with_parameter(PARAM_RELATED_QUERIES, related)
    }

    pub fn retrieve_multiple(query: Query) -> Self {
        Self::new(RequestKind::BulkRead, MESSAGE_RETRIEVE_MULTIPLE).with_parameter(PARAM_QUERY, query)
    }

    pub fn retrieve_all_entities(filters: EntityFilters, as_if_published: bool) -> Self {
        Self::new(RequestKind::MetadataRead, MESSAGE_RETRIEVE_ALL_ENTITIES)
            .with_parameter(PARAM_ENTITY_FILTERS, i64::from(filters.bits()))
            .with_parameter(PARAM_AS_IF_PUBLISHED, as_if_published)
    }

    pub fn retrieve_entity(
        logical_name: impl Into<String>,
        filters: EntityFilters,
        as_if_published: bool,
    ) -> Self {
        Self::retrieve_all_entities(filters, as_if_published)
            .renamed(MESSAGE_RETRIEVE_ENTITY)
            .with_parameter(PARAM_LOGICAL_NAME, Value::Text(logical_name.into()))
    }

    pub fn retrieve_relationship(name: impl Into<String>, as_if_published: bool) -> Self {
        Self::new(RequestKind::RelationshipRead, MESSAGE_RETRIEVE_RELATIONSHIP)
            .with_parameter(PARAM_NAME, Value::Text(name.into()))
            .with_parameter(PARAM_AS_IF_PUBLISHED, as_if_published)
    }

    pub fn create(entity: Entity) -> Self {
        Self::generic(MESSAGE_CREATE).with_parameter(PARAM_TARGET, entity)
    }

    pub fn update(entity: Entity) -> Self {
        Self::generic(MESSAGE_UPDATE).with_parameter(PARAM_TARGET, entity)
    }

    pub fn delete(target: EntityRef) -> Self {
        Self::generic(MESSAGE_DELETE).with_parameter(PARAM_TARGET, target)
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }

    fn renamed(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }
}

/// Result of a call to the entity service.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Entity(Arc<Entity>),
    Entities(Arc<EntityCollection>),
    Metadata(Arc<MetadataResponse>),
    /// Named output values of a generic message.
    Values(BTreeMap<String, Value>),
    Created(RecordId),
    Empty,
}

impl Response {
    pub fn shape(&self) -> &'static str {
        match self {
            Response::Entity(_) => "entity",
            Response::Entities(_) => "entities",
            Response::Metadata(_) => "metadata",
            Response::Values(_) => "values",
            Response::Created(_) => "created",
            Response::Empty => "empty",
        }
    }

    pub fn into_entity(self) -> Option<Arc<Entity>> {
        match self {
            Response::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    pub fn into_entities(self) -> Option<Arc<EntityCollection>> {
        match self {
            Response::Entities(collection) => Some(collection),
            _ => None,
        }
    }
}

impl From<Entity> for Response {
    fn from(value: Entity) -> Self {
        Response::Entity(Arc::new(value))
    }
}

impl From<EntityCollection> for Response {
    fn from(value: EntityCollection) -> Self {
        Response::Entities(Arc::new(value))
    }
}

impl From<MetadataResponse> for Response {
    fn from(value: MetadataResponse) -> Self {
        Response::Metadata(Arc::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retrieve_entity_extends_all_entities_parameters() {
        let request = Request::retrieve_entity("account", EntityFilters::ATTRIBUTES, false);

        assert_eq!(request.kind, RequestKind::MetadataRead);
        assert_eq!(request.name, MESSAGE_RETRIEVE_ENTITY);
        assert_eq!(request.parameters.len(), 3);
        assert_eq!(
            request.parameter(PARAM_LOGICAL_NAME).and_then(Value::as_text),
            Some("account")
        );
    }

    #[test]
    fn key_and_selector_are_not_parameters() {
        let request = Request::generic("WhoAmI").with_key("me").with_selector("v2");
        assert!(request.parameters.is_empty());
        assert_eq!(request.key.as_deref(), Some("me"));
        assert_eq!(request.selector.as_deref(), Some("v2"));
    }
}
