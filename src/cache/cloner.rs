//! Copies handed out under `ReturnMode::Cloned`.

use std::sync::Arc;

use crate::domain::{Entity, EntityCollection, Response};
use crate::error::CloneError;

/// Produces a caller-owned copy of a cached response.
pub trait ResponseCloner: Send + Sync {
    fn clone_response(&self, value: &Response) -> Result<Response, CloneError>;
}

/// Deep-copies single records and record collections, including related
/// collections. Every other shape is treated as immutable and shared.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralCloner;

impl ResponseCloner for StructuralCloner {
    fn clone_response(&self, value: &Response) -> Result<Response, CloneError> {
        Ok(match value {
            Response::Entity(entity) => Response::Entity(Arc::new(deep_entity(entity))),
            Response::Entities(collection) => {
                Response::Entities(Arc::new(deep_collection(collection)))
            }
            other => other.clone(),
        })
    }
}

fn deep_entity(entity: &Entity) -> Entity {
    let mut copy = entity.clone();
    for related in copy.related.values_mut() {
        *related = Arc::new(deep_collection(related));
    }
    copy
}

fn deep_collection(collection: &EntityCollection) -> EntityCollection {
    EntityCollection {
        type_name: collection.type_name.clone(),
        entities: collection
            .entities
            .iter()
            .map(|entity| Arc::new(deep_entity(entity)))
            .collect(),
        more_records: collection.more_records,
    }
}
