//! Explicit invalidation entry point.
//!
//! Accepts a record reference, a `(type, id)` pair, a raw request, a raw
//! cache key, a dependency token or structured messages, and translates
//! each into store removals.

use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{EntityRef, RecordId, Request};

use super::deps::{DependencyExtractor, DependencyToken};
use super::events::{InvalidationMessage, InvalidationQueue};
use super::keys::CacheKeyBuilder;
use super::planner::InvalidationPlan;
use super::store::CacheStore;

const METRIC_APPLY_MS: &str = "entity_cache_invalidation_apply_ms";

pub struct InvalidationGateway {
    store: Arc<CacheStore>,
    extractor: Arc<DependencyExtractor>,
    keys: Arc<CacheKeyBuilder>,
}

impl InvalidationGateway {
    pub fn new(
        store: Arc<CacheStore>,
        extractor: Arc<DependencyExtractor>,
        keys: Arc<CacheKeyBuilder>,
    ) -> Self {
        Self {
            store,
            extractor,
            keys,
        }
    }

    /// Remove everything depending on the record's instance token or its
    /// class token. A reference without an id only reaches the class token.
    pub fn remove_entity(&self, reference: &EntityRef) -> usize {
        let removed: usize = self
            .extractor
            .scheme()
            .entity(reference)
            .iter()
            .map(|token| self.store.remove_token(token))
            .sum();
        debug!(record = %reference, removed, "record invalidated");
        removed
    }

    pub fn remove_record(&self, type_name: &str, id: Option<RecordId>) -> usize {
        let reference = match id {
            Some(id) => EntityRef::new(type_name, id),
            None => EntityRef::class(type_name),
        };
        self.remove_entity(&reference)
    }

    /// Remove the request's own entry and everything depending on any token
    /// the request depends on.
    pub fn remove_request(&self, request: &Request) -> usize {
        let mut removed = match self.keys.build(request) {
            Ok(key) => usize::from(self.store.remove_key(&key)),
            Err(error) => {
                warn!(request = %request.name, error = %error, "request key could not be derived");
                0
            }
        };
        for token in self.extractor.extract(request, None) {
            removed += self.store.remove_token(&token);
        }
        debug!(request = %request.name, removed, "request invalidated");
        removed
    }

    pub fn remove_key(&self, key: &str) -> bool {
        self.store.remove_key(key)
    }

    pub fn remove_token(&self, token: &DependencyToken) -> usize {
        self.store.remove_token(token)
    }

    /// Apply one message.
    pub fn apply(&self, message: InvalidationMessage) -> usize {
        self.apply_batch([message])
    }

    /// Merge `messages` into one plan and execute it.
    #[instrument(skip_all)]
    pub fn apply_batch<I>(&self, messages: I) -> usize
    where
        I: IntoIterator<Item = InvalidationMessage>,
    {
        let started = Instant::now();
        let messages: Vec<InvalidationMessage> = messages.into_iter().collect();
        if messages.is_empty() {
            return 0;
        }

        let message_ids: Vec<Uuid> = messages.iter().map(|message| message.id).collect();
        let scheme = self.extractor.scheme();
        let plan = InvalidationPlan::from_messages(messages, scheme);

        info!(message_ids = ?message_ids, plan = %plan, "Cache invalidation starting");

        let removed: usize = plan
            .removals(scheme)
            .iter()
            .map(|token| self.store.remove_token(token))
            .sum();

        let elapsed = started.elapsed();
        histogram!(METRIC_APPLY_MS).record(elapsed.as_secs_f64() * 1000.0);
        info!(
            removed,
            elapsed_ms = elapsed.as_millis() as u64,
            "Cache invalidation completed"
        );
        removed
    }

    /// Drain up to `limit` queued messages and apply them as one batch.
    /// Returns whether anything was drained.
    pub fn consume(&self, queue: &InvalidationQueue, limit: usize) -> bool {
        let messages = queue.drain(limit);
        if messages.is_empty() {
            return false;
        }
        self.apply_batch(messages);
        true
    }
}
