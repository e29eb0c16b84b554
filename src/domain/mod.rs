//! Value shapes exchanged with the entity service.

pub mod entities;
pub mod metadata;
pub mod query;
pub mod request;
pub mod types;

pub use entities::{Entity, EntityCollection, EntityRef, RecordId};
pub use metadata::{
    AttributeMetadata, EntityFilters, EntityMetadata, MetadataResponse, RelationshipMetadata,
};
pub use query::{
    ColumnSet, Condition, ConditionOperator, Filter, JoinOperator, LinkEntity, LogicalOperator,
    Order, Paging, Query, RelationshipQueryCollection,
};
pub use request::{Request, RequestKind, Response};
pub use types::Value;
