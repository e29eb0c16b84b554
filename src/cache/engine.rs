//! The assembled cache: one store, one key builder, one extractor, shared
//! by the coordinator and the invalidation gateway.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::{Request, Response};
use crate::error::CacheError;

use super::cloner::{ResponseCloner, StructuralCloner};
use super::config::{CacheConfig, CacheOptions};
use super::coordinator::ExecutionCoordinator;
use super::deps::{DependencyExtractor, RequestClassifier, TokenScheme};
use super::gateway::InvalidationGateway;
use super::keys::CacheKeyBuilder;
use super::policy::CachePolicyFactory;
use super::store::CacheStore;

/// Host-owned cache instance. Construct one per process (or per tenant)
/// from validated settings and share it by `Arc`.
pub struct EntityCache {
    config: CacheConfig,
    store: Arc<CacheStore>,
    keys: Arc<CacheKeyBuilder>,
    extractor: Arc<DependencyExtractor>,
    policies: CachePolicyFactory,
    coordinator: ExecutionCoordinator,
    gateway: InvalidationGateway,
}

impl EntityCache {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_cloner(config, Arc::new(StructuralCloner))
    }

    pub fn with_cloner(config: CacheConfig, cloner: Arc<dyn ResponseCloner>) -> Self {
        let options = Arc::new(CacheOptions::from(&config));
        let store = Arc::new(CacheStore::from_config(&config));
        let keys = Arc::new(CacheKeyBuilder::from_config(&config));
        let extractor = Arc::new(DependencyExtractor::new(
            TokenScheme::new(config.dependency_prefix.as_str()),
            RequestClassifier::new(config.read_only_requests.clone()),
        ));
        let policies = CachePolicyFactory::from_config(&config);
        let coordinator = ExecutionCoordinator::new(Arc::clone(&store), options, cloner);
        let gateway =
            InvalidationGateway::new(Arc::clone(&store), Arc::clone(&extractor), Arc::clone(&keys));

        Self {
            config,
            store,
            keys,
            extractor,
            policies,
            coordinator,
            gateway,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Live mode and return-mode switches.
    pub fn options(&self) -> &CacheOptions {
        self.coordinator.options()
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn gateway(&self) -> &InvalidationGateway {
        &self.gateway
    }

    pub fn keys(&self) -> &CacheKeyBuilder {
        &self.keys
    }

    pub fn extractor(&self) -> &DependencyExtractor {
        &self.extractor
    }

    /// Route `request` through the cache.
    ///
    /// Cacheable requests go through the coordinator under the current mode.
    /// Everything else is a mutation: `compute` runs and the request's
    /// dependency set is invalidated whether or not it succeeded.
    pub fn execute<E, C>(&self, request: &Request, compute: C) -> Result<Response, CacheError<E>>
    where
        E: std::error::Error + 'static,
        C: Fn() -> Result<Response, E>,
    {
        let class = self.extractor.classifier().classify(request);
        if !class.is_cacheable() {
            let result = compute();
            self.invalidate_mutation(request, result.as_ref().ok());
            return result.map_err(CacheError::Upstream);
        }

        let key = match self.keys.build(request) {
            Ok(key) => key,
            Err(error) => {
                warn!(request = %request.name, error = %error, "cache key could not be derived, bypassing cache");
                return self.coordinator.bypass("key", compute);
            }
        };

        self.coordinator.execute(&key, compute, |value| {
            self.policies
                .create(self.extractor.extract(request, Some(value)))
        })
    }

    /// Call upstream without touching the store, counting the bypass.
    pub fn bypass<E, C>(&self, reason: &'static str, compute: C) -> Result<Response, CacheError<E>>
    where
        E: std::error::Error + 'static,
        C: Fn() -> Result<Response, E>,
    {
        self.coordinator.bypass(reason, compute)
    }

    /// Remove every entry depending on any token of the mutation.
    pub fn invalidate_mutation(&self, request: &Request, response: Option<&Response>) -> usize {
        let removed: usize = self
            .extractor
            .extract(request, response)
            .iter()
            .map(|token| self.store.remove_token(token))
            .sum();
        debug!(request = %request.name, removed, "mutation invalidated dependents");
        removed
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::domain::{ColumnSet, Entity, EntityCollection, EntityRef, Query};

    fn widget(name: &str) -> Response {
        Response::from(Entity::new("widget").with_id("42").with_attribute("name", name))
    }

    #[test]
    fn read_is_cached_until_a_mutation_touches_it() {
        let cache = EntityCache::new(CacheConfig::default());
        let read = Request::retrieve(EntityRef::new("widget", "42"), ColumnSet::All);
        let calls = AtomicUsize::new(0);
        let compute = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, io::Error>(widget("A"))
        };

        cache.execute(&read, compute).expect("first read");
        cache.execute(&read, compute).expect("second read");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let update = Request::update(Entity::new("widget").with_id("42"));
        cache
            .execute(&update, || Ok::<_, io::Error>(Response::Empty))
            .expect("update");

        cache.execute(&read, compute).expect("third read");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_mutation_still_invalidates() {
        let cache = EntityCache::new(CacheConfig::default());
        let read = Request::retrieve_multiple(Query::new("widget"));
        cache
            .execute(&read, || Ok::<_, io::Error>(Response::from(EntityCollection::new("widget"))))
            .ok();
        let key = cache.keys().build(&read).expect("key");
        assert!(cache.store().contains_key(&key));

        let result = cache.execute(&Request::delete(EntityRef::new("widget", "1")), || {
            Err::<Response, _>(io::Error::other("partial failure"))
        });

        assert!(result.is_err());
        assert!(!cache.store().contains_key(&key));
    }

    #[test]
    fn unknown_generic_requests_are_not_cached() {
        let cache = EntityCache::new(CacheConfig::default());
        let request = Request::generic("SetState").with_parameter("Target", EntityRef::new("widget", "1"));
        let calls = AtomicUsize::new(0);
        let compute = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, io::Error>(Response::Empty)
        };

        cache.execute(&request, compute).expect("first");
        cache.execute(&request, compute).expect("second");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.store().is_empty());
    }

    #[test]
    fn read_only_generic_requests_are_cached() {
        let cache = EntityCache::new(CacheConfig::default());
        let request = Request::generic("WhoAmI");
        let calls = AtomicUsize::new(0);
        let compute = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, io::Error>(Response::Values(Default::default()))
        };

        cache.execute(&request, compute).expect("first");
        cache.execute(&request, compute).expect("second");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
