//! Schema descriptions returned by metadata reads.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Which parts of a type description to return.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct EntityFilters: u8 {
        const ENTITY = 0b0000_0001;
        const ATTRIBUTES = 0b0000_0010;
        const PRIVILEGES = 0b0000_0100;
        const RELATIONSHIPS = 0b0000_1000;
        const ALL = Self::ENTITY.bits()
            | Self::ATTRIBUTES.bits()
            | Self::PRIVILEGES.bits()
            | Self::RELATIONSHIPS.bits();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMetadata {
    pub logical_name: String,
    pub attribute_type: String,
    pub is_primary_id: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMetadata {
    pub logical_name: String,
    pub primary_id_attribute: String,
    pub primary_name_attribute: Option<String>,
    pub attributes: Vec<AttributeMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipMetadata {
    pub schema_name: String,
    pub referenced_entity: String,
    pub referencing_entity: String,
    pub referencing_attribute: String,
}

/// Payload of a metadata or relationship read. Treated as immutable by the
/// cache and never cloned on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataResponse {
    Entities(Vec<EntityMetadata>),
    Entity(EntityMetadata),
    Relationship(RelationshipMetadata),
}
