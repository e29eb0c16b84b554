//! The entity-service surface the cache wraps.

mod caching;

use std::sync::Arc;

use crate::domain::{ColumnSet, Entity, EntityCollection, EntityRef, Query, RecordId, Request, Response};

pub use caching::CachingService;

/// A remote, RPC-style entity data service.
///
/// Calls are synchronous; the host decides which thread blocks on them.
pub trait EntityService: Send + Sync {
    type Error: std::error::Error + 'static;

    fn create(&self, entity: &Entity) -> Result<RecordId, Self::Error>;

    fn update(&self, entity: &Entity) -> Result<(), Self::Error>;

    fn delete(&self, target: &EntityRef) -> Result<(), Self::Error>;

    fn retrieve(&self, target: &EntityRef, columns: &ColumnSet) -> Result<Arc<Entity>, Self::Error>;

    fn retrieve_multiple(&self, query: &Query) -> Result<Arc<EntityCollection>, Self::Error>;

    /// Run an arbitrary named message, including the typed ones above.
    fn execute(&self, request: &Request) -> Result<Response, Self::Error>;
}

impl<S> EntityService for Arc<S>
where
    S: EntityService + ?Sized,
{
    type Error = S::Error;

    fn create(&self, entity: &Entity) -> Result<RecordId, Self::Error> {
        (**self).create(entity)
    }

    fn update(&self, entity: &Entity) -> Result<(), Self::Error> {
        (**self).update(entity)
    }

    fn delete(&self, target: &EntityRef) -> Result<(), Self::Error> {
        (**self).delete(target)
    }

    fn retrieve(&self, target: &EntityRef, columns: &ColumnSet) -> Result<Arc<Entity>, Self::Error> {
        (**self).retrieve(target, columns)
    }

    fn retrieve_multiple(&self, query: &Query) -> Result<Arc<EntityCollection>, Self::Error> {
        (**self).retrieve_multiple(query)
    }

    fn execute(&self, request: &Request) -> Result<Response, Self::Error> {
        (**self).execute(request)
    }
}
