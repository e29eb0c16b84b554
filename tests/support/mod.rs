//! In-memory entity service used by the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use entity_cache::domain::{
    ColumnSet, Entity, EntityCollection, EntityMetadata, EntityRef, MetadataResponse, Query,
    RecordId, Request, Response, Value,
};
use entity_cache::{CacheConfig, CachingService, EntityCache, EntityService};
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FakeError {
    #[error("record `{0}` not found")]
    NotFound(String),
    #[error("service unavailable")]
    Unavailable,
}

#[derive(Debug, Default)]
pub struct Calls {
    pub create: AtomicUsize,
    pub update: AtomicUsize,
    pub delete: AtomicUsize,
    pub retrieve: AtomicUsize,
    pub retrieve_multiple: AtomicUsize,
    pub execute: AtomicUsize,
}

impl Calls {
    pub fn reads(&self) -> usize {
        self.retrieve.load(Ordering::SeqCst)
            + self.retrieve_multiple.load(Ordering::SeqCst)
            + self.execute.load(Ordering::SeqCst)
    }
}

/// Rows keyed by `(type, id)`, with call counters, optional latency and a
/// switch that makes every call fail.
#[derive(Default)]
pub struct FakeService {
    rows: Mutex<BTreeMap<(String, String), Entity>>,
    next_id: AtomicUsize,
    latency: Option<Duration>,
    failing: AtomicBool,
    pub calls: Calls,
}

impl FakeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    pub fn seed(&self, entity: Entity) {
        let id = entity
            .id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_default();
        self.rows
            .lock()
            .insert((entity.type_name.clone(), id), entity);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn enter(&self, counter: &AtomicUsize) -> Result<(), FakeError> {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            thread::sleep(latency);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(FakeError::Unavailable);
        }
        Ok(())
    }

    fn find(&self, target: &EntityRef) -> Result<Arc<Entity>, FakeError> {
        let id = target
            .id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_default();
        self.rows
            .lock()
            .get(&(target.type_name.clone(), id))
            .cloned()
            .map(Arc::new)
            .ok_or_else(|| FakeError::NotFound(target.to_string()))
    }

    fn query(&self, query: &Query) -> Arc<EntityCollection> {
        let rows = self
            .rows
            .lock()
            .values()
            .filter(|entity| entity.type_name == query.entity_name)
            .cloned()
            .collect::<Vec<_>>();
        Arc::new(EntityCollection::new(query.entity_name.as_str()).with_entities(rows))
    }
}

impl EntityService for FakeService {
    type Error = FakeError;

    fn create(&self, entity: &Entity) -> Result<RecordId, FakeError> {
        self.enter(&self.calls.create)?;
        let id = RecordId::from((self.next_id.fetch_add(1, Ordering::SeqCst) + 1000) as u64);
        self.seed(entity.clone().with_id(id.clone()));
        Ok(id)
    }

    fn update(&self, entity: &Entity) -> Result<(), FakeError> {
        self.enter(&self.calls.update)?;
        let existing = self.find(&entity.to_ref())?;
        let mut merged = (*existing).clone();
        for (name, value) in &entity.attributes {
            merged.set(name.clone(), value.clone());
        }
        self.seed(merged);
        Ok(())
    }

    fn delete(&self, target: &EntityRef) -> Result<(), FakeError> {
        self.enter(&self.calls.delete)?;
        let id = target
            .id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_default();
        self.rows.lock().remove(&(target.type_name.clone(), id));
        Ok(())
    }

    fn retrieve(&self, target: &EntityRef, _columns: &ColumnSet) -> Result<Arc<Entity>, FakeError> {
        self.enter(&self.calls.retrieve)?;
        self.find(target)
    }

    fn retrieve_multiple(&self, query: &Query) -> Result<Arc<EntityCollection>, FakeError> {
        self.enter(&self.calls.retrieve_multiple)?;
        Ok(self.query(query))
    }

    fn execute(&self, request: &Request) -> Result<Response, FakeError> {
        self.enter(&self.calls.execute)?;
        match request.name.as_str() {
            "Retrieve" => match request.parameter("Target") {
                Some(Value::EntityRef(target)) => self.find(target).map(Response::Entity),
                _ => Err(FakeError::NotFound(request.name.clone())),
            },
            "RetrieveMultiple" => match request.parameter("Query") {
                Some(Value::Query(query)) => Ok(Response::Entities(self.query(query))),
                _ => Err(FakeError::NotFound(request.name.clone())),
            },
            "RetrieveEntity" => {
                let name = request
                    .parameter("LogicalName")
                    .and_then(Value::as_text)
                    .unwrap_or_default();
                Ok(Response::from(MetadataResponse::Entity(EntityMetadata {
                    logical_name: name.to_string(),
                    primary_id_attribute: format!("{name}id"),
                    primary_name_attribute: Some("name".to_string()),
                    attributes: Vec::new(),
                })))
            }
            "RetrieveAllEntities" => Ok(Response::from(MetadataResponse::Entities(Vec::new()))),
            "WhoAmI" => Ok(Response::Values(BTreeMap::from([(
                "UserId".to_string(),
                Value::Text("user-1".to_string()),
            )]))),
            _ => Ok(Response::Empty),
        }
    }
}

pub fn widget(id: &str, name: &str) -> Entity {
    Entity::new("widget")
        .with_id(id)
        .with_attribute("name", name)
}

pub fn name_of(entity: &Entity) -> Option<&str> {
    entity.get("name").and_then(Value::as_text)
}

/// A caching decorator over a fresh fake, sharing the fake so tests can
/// read its counters.
pub fn caching(
    config: CacheConfig,
    fake: FakeService,
) -> (CachingService<Arc<FakeService>>, Arc<FakeService>) {
    let fake = Arc::new(fake);
    let cache = Arc::new(EntityCache::new(config));
    (CachingService::new(Arc::clone(&fake), cache), fake)
}
