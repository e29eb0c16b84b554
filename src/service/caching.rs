use std::sync::Arc;

use metrics::counter;
use tracing::{instrument, warn};

use crate::cache::EntityCache;
use crate::domain::{ColumnSet, Entity, EntityCollection, EntityRef, Query, RecordId, Request, Response};
use crate::error::CacheError;

use super::EntityService;

const METRIC_BYPASS_TOTAL: &str = "entity_cache_bypass_total";

/// Drop-in replacement for the wrapped service.
///
/// Reads go through the cache's coordinator; creates, updates, deletes and
/// any generic message not known to be read-only invalidate every cached
/// read that depends on what they touched. Invalidation runs after the
/// upstream call whether or not it succeeded, since a failed mutation may
/// still have been partially applied.
pub struct CachingService<S> {
    inner: S,
    cache: Arc<EntityCache>,
}

impl<S> CachingService<S>
where
    S: EntityService,
{
    pub fn new(inner: S, cache: Arc<EntityCache>) -> Self {
        Self { inner, cache }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    /// Count the bypass and drop the offending entry so the next read
    /// repopulates it.
    fn shape_mismatch(&self, request: &Request, found: &'static str) {
        counter!(METRIC_BYPASS_TOTAL, "reason" => "shape").increment(1);
        warn!(
            request = %request.name,
            found,
            "cached value has an unexpected shape, bypassing cache"
        );
        if let Ok(key) = self.cache.keys().build(request) {
            self.cache.store().remove_key(&key);
        }
    }
}

impl<S> EntityService for CachingService<S>
where
    S: EntityService,
{
    type Error = CacheError<S::Error>;

    #[instrument(skip_all, fields(entity = %entity.type_name))]
    fn create(&self, entity: &Entity) -> Result<RecordId, Self::Error> {
        let result = self.inner.create(entity);
        match &result {
            Ok(id) => {
                let created = entity.clone().with_id(id.clone());
                self.cache.invalidate_mutation(
                    &Request::create(created),
                    Some(&Response::Created(id.clone())),
                );
            }
            Err(_) => {
                self.cache
                    .invalidate_mutation(&Request::create(entity.clone()), None);
            }
        }
        result.map_err(CacheError::Upstream)
    }

    #[instrument(skip_all, fields(entity = %entity.type_name))]
    fn update(&self, entity: &Entity) -> Result<(), Self::Error> {
        let result = self.inner.update(entity);
        self.cache
            .invalidate_mutation(&Request::update(entity.clone()), None);
        result.map_err(CacheError::Upstream)
    }

    #[instrument(skip_all, fields(target = %target))]
    fn delete(&self, target: &EntityRef) -> Result<(), Self::Error> {
        let result = self.inner.delete(target);
        self.cache
            .invalidate_mutation(&Request::delete(target.clone()), None);
        result.map_err(CacheError::Upstream)
    }

    fn retrieve(&self, target: &EntityRef, columns: &ColumnSet) -> Result<Arc<Entity>, Self::Error> {
        let request = Request::retrieve(target.clone(), columns.clone());
        let response = self.cache.execute(&request, || {
            self.inner.retrieve(target, columns).map(Response::Entity)
        })?;

        match response {
            Response::Entity(entity) => Ok(entity),
            other => {
                self.shape_mismatch(&request, other.shape());
                self.inner
                    .retrieve(target, columns)
                    .map_err(CacheError::Upstream)
            }
        }
    }

    fn retrieve_multiple(&self, query: &Query) -> Result<Arc<EntityCollection>, Self::Error> {
        let request = Request::retrieve_multiple(query.clone());
        let response = self.cache.execute(&request, || {
            self.inner.retrieve_multiple(query).map(Response::Entities)
        })?;

        match response {
            Response::Entities(collection) => Ok(collection),
            other => {
                self.shape_mismatch(&request, other.shape());
                self.inner
                    .retrieve_multiple(query)
                    .map_err(CacheError::Upstream)
            }
        }
    }

    fn execute(&self, request: &Request) -> Result<Response, Self::Error> {
        self.cache.execute(request, || self.inner.execute(request))
    }
}
