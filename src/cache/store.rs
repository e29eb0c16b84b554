//! Expiring key/value store with a dependency index.
//!
//! Entries and the token index live behind one lock, so every operation is
//! atomic: no entry is visible half-written and the index never points at a
//! removed entry.
//!
//! Invalidations also advance a generation counter. A read takes a
//! [`Generation`] before calling upstream and inserts through
//! [`CacheStore::insert_fresh`], which drops the value if any of its tokens
//! was invalidated after that point.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use lru::LruCache;
use metrics::{counter, gauge};
use tracing::debug;

use crate::domain::Response;
use crate::error::{CacheError, LockTimeout};

use super::config::CacheConfig;
use super::deps::{DependencyToken, TokenScheme};
use super::lock::{KeyLocks, rw_read, rw_write};
use super::policy::{CachePolicy, Priority};
use super::registry::TokenIndex;

const SOURCE: &str = "cache::store";

const METRIC_INSERT_TOTAL: &str = "entity_cache_insert_total";
const METRIC_EVICT_TOTAL: &str = "entity_cache_evict_total";
const METRIC_INVALIDATE_TOTAL: &str = "entity_cache_invalidate_total";
const METRIC_STALE_INSERT_TOTAL: &str = "entity_cache_stale_insert_total";
const METRIC_ENTRIES: &str = "entity_cache_entries";

/// A stored value with its policy. Replaced wholesale on re-insert.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Response,
    pub policy: CachePolicy,
    inserted_at: Instant,
    last_access: Instant,
}

impl CacheEntry {
    fn new(value: Response, policy: CachePolicy) -> Self {
        let now = Instant::now();
        Self {
            value,
            policy,
            inserted_at: now,
            last_access: now,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.policy.is_expired(self.inserted_at, self.last_access, now)
    }
}

/// How `get_or_compute` produced its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Served from the store without waiting.
    Hit,
    /// Another caller computed the value while this one waited on the key.
    Coalesced,
    /// This caller computed and inserted the value.
    Computed,
}

struct StoreState {
    entries: LruCache<String, CacheEntry>,
    index: TokenIndex,
    generation: u64,
    /// Generation of the most recent invalidation of each token, kept only
    /// while some compute started before it is still pending.
    invalidated: HashMap<DependencyToken, u64>,
    cleared_at: u64,
    /// Outstanding [`Generation`]s, counted by their value.
    pending: BTreeMap<u64, usize>,
}

impl StoreState {
    fn remove(&mut self, key: &str) -> bool {
        self.index.unregister(key);
        self.entries.pop(key).is_some()
    }

    fn invalidated_since(&self, since: u64, tokens: &BTreeSet<DependencyToken>) -> bool {
        self.cleared_at > since
            || tokens
                .iter()
                .any(|token| self.invalidated.get(token).is_some_and(|&at| at > since))
    }

    fn release(&mut self, generation: u64) {
        if let Some(count) = self.pending.get_mut(&generation) {
            *count -= 1;
            if *count == 0 {
                self.pending.remove(&generation);
            }
        }
        match self.pending.keys().next().copied() {
            Some(oldest) => self.invalidated.retain(|_, at| *at > oldest),
            None => self.invalidated.clear(),
        }
    }
}

/// The store's invalidation generation at the start of an upstream call.
/// Released when dropped.
pub struct Generation<'a> {
    store: &'a CacheStore,
    value: u64,
}

impl Generation<'_> {
    pub fn value(&self) -> u64 {
        self.value
    }
}

impl Drop for Generation<'_> {
    fn drop(&mut self) {
        rw_write(&self.store.state, SOURCE, "release_generation").release(self.value);
    }
}

pub struct CacheStore {
    state: RwLock<StoreState>,
    locks: KeyLocks,
    max_entries: Option<NonZeroUsize>,
    all_token: DependencyToken,
}

impl CacheStore {
    pub fn new(
        max_entries: Option<NonZeroUsize>,
        lock_timeout: Duration,
        all_token: DependencyToken,
    ) -> Self {
        Self {
            state: RwLock::new(StoreState {
                entries: LruCache::unbounded(),
                index: TokenIndex::new(),
                generation: 0,
                invalidated: HashMap::new(),
                cleared_at: 0,
                pending: BTreeMap::new(),
            }),
            locks: KeyLocks::new(lock_timeout),
            max_entries,
            all_token,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            config.max_entries,
            config.lock_timeout,
            TokenScheme::new(config.dependency_prefix.as_str()).all(),
        )
    }

    pub fn locks(&self) -> &KeyLocks {
        &self.locks
    }

    /// Return the live value for `key`, dropping it first if it expired.
    pub fn get(&self, key: &str) -> Option<Response> {
        let now = Instant::now();
        let mut state = rw_write(&self.state, SOURCE, "get");

        let expired = match state.entries.get_mut(key) {
            None => return None,
            Some(entry) if entry.is_expired(now) => true,
            Some(entry) => {
                entry.last_access = now;
                return Some(entry.value.clone());
            }
        };

        if expired {
            state.remove(key);
            counter!(METRIC_EVICT_TOTAL, "reason" => "expired").increment(1);
            gauge!(METRIC_ENTRIES).set(state.entries.len() as f64);
            debug!(cache_key = key, "expired cache entry dropped on read");
        }
        None
    }

    /// Capture the current invalidation generation before computing a value.
    pub fn generation(&self) -> Generation<'_> {
        let mut state = rw_write(&self.state, SOURCE, "generation");
        let value = state.generation;
        *state.pending.entry(value).or_default() += 1;
        Generation { store: self, value }
    }

    /// Overwrite the slot for `key` and register its dependency tokens.
    pub fn insert(&self, key: &str, value: Response, policy: CachePolicy) {
        let mut state = rw_write(&self.state, SOURCE, "insert");
        self.put(&mut state, key, value, policy);
    }

    /// Insert a value computed since `since`, unless one of its tokens (or
    /// the whole store) was invalidated in the meantime. Returns whether the
    /// value was stored.
    pub fn insert_fresh(
        &self,
        since: &Generation<'_>,
        key: &str,
        value: Response,
        policy: CachePolicy,
    ) -> bool {
        let mut state = rw_write(&self.state, SOURCE, "insert_fresh");
        if state.invalidated_since(since.value, &policy.dependencies) {
            counter!(METRIC_STALE_INSERT_TOTAL).increment(1);
            debug!(
                cache_key = key,
                since = since.value,
                "dependency invalidated during compute, value not stored"
            );
            return false;
        }
        self.put(&mut state, key, value, policy);
        true
    }

    fn put(&self, state: &mut StoreState, key: &str, value: Response, policy: CachePolicy) {
        let token_count = policy.dependencies.len();

        state.index.register(key, policy.dependencies.clone());
        state.entries.put(key.to_string(), CacheEntry::new(value, policy));
        counter!(METRIC_INSERT_TOTAL).increment(1);

        if let Some(max) = self.max_entries {
            evict_overflow(state, max);
        }
        gauge!(METRIC_ENTRIES).set(state.entries.len() as f64);
        debug!(cache_key = key, token_count, "cache entry inserted");
    }

    /// Remove one entry. Absent keys are not an error.
    pub fn remove_key(&self, key: &str) -> bool {
        let mut state = rw_write(&self.state, SOURCE, "remove_key");
        let removed = state.remove(key);
        if removed {
            counter!(METRIC_INVALIDATE_TOTAL, "scope" => "key").increment(1);
            gauge!(METRIC_ENTRIES).set(state.entries.len() as f64);
        }
        debug!(cache_key = key, removed, "cache key removed");
        removed
    }

    /// Remove every entry depending on `token`; the store's "all" token
    /// clears everything. Returns the number of entries removed.
    pub fn remove_token(&self, token: &DependencyToken) -> usize {
        if *token == self.all_token {
            return self.clear();
        }

        let mut state = rw_write(&self.state, SOURCE, "remove_token");
        state.generation += 1;
        if !state.pending.is_empty() {
            let generation = state.generation;
            state.invalidated.insert(token.clone(), generation);
        }
        let keys = state.index.keys_for_token(token);
        let removed = keys.iter().filter(|key| state.remove(key)).count();

        if removed > 0 {
            counter!(METRIC_INVALIDATE_TOTAL, "scope" => "token").increment(removed as u64);
            gauge!(METRIC_ENTRIES).set(state.entries.len() as f64);
        }
        debug!(token = %token, removed, "dependency token removed");
        removed
    }

    /// Remove everything. Returns the number of entries removed.
    pub fn clear(&self) -> usize {
        let mut state = rw_write(&self.state, SOURCE, "clear");
        state.generation += 1;
        state.cleared_at = state.generation;
        let removed = state.entries.len();
        state.entries.clear();
        state.index.clear();

        counter!(METRIC_INVALIDATE_TOTAL, "scope" => "all").increment(removed as u64);
        gauge!(METRIC_ENTRIES).set(0.0);
        debug!(removed, "cache cleared");
        removed
    }

    /// Drop every expired entry. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = rw_write(&self.state, SOURCE, "purge_expired");
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            state.remove(key);
        }
        if !expired.is_empty() {
            counter!(METRIC_EVICT_TOTAL, "reason" => "expired").increment(expired.len() as u64);
            gauge!(METRIC_ENTRIES).set(state.entries.len() as f64);
        }
        expired.len()
    }

    /// Single-flight read-through.
    ///
    /// On a miss the caller takes the key's mutex, checks again, captures the
    /// invalidation generation and only then runs `compute` followed by
    /// `insert`. Concurrent callers for the same absent key wait on the mutex
    /// and pick up the inserted value. A failed `compute` inserts nothing and
    /// leaves any existing entry alone.
    pub fn get_or_compute<E, C, I>(
        &self,
        key: &str,
        compute: C,
        insert: I,
    ) -> Result<(Response, Outcome), CacheError<E>>
    where
        E: std::error::Error + 'static,
        C: FnOnce() -> Result<Response, E>,
        I: FnOnce(&Self, &Generation<'_>, &str, &Response),
    {
        if let Some(value) = self.get(key) {
            return Ok((value, Outcome::Hit));
        }

        let result: Result<Result<(Response, Outcome), E>, LockTimeout> =
            self.locks.with_lock(key, || {
                if let Some(value) = self.get(key) {
                    return Ok((value, Outcome::Coalesced));
                }
                let generation = self.generation();
                let value = compute()?;
                insert(self, &generation, key, &value);
                Ok((value, Outcome::Computed))
            });

        match result {
            Ok(Ok(found)) => Ok(found),
            Ok(Err(error)) => Err(CacheError::Upstream(error)),
            Err(timeout) => Err(CacheError::LockTimeout(timeout)),
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.state, SOURCE, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a live entry exists. Does not touch recency or sliding expiry.
    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        rw_read(&self.state, SOURCE, "contains_key")
            .entries
            .peek(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    pub fn tokens_for_key(&self, key: &str) -> BTreeSet<DependencyToken> {
        rw_read(&self.state, SOURCE, "tokens_for_key")
            .index
            .tokens_for_key(key)
    }

    pub fn keys_for_token(&self, token: &DependencyToken) -> HashSet<String> {
        rw_read(&self.state, SOURCE, "keys_for_token")
            .index
            .keys_for_token(token)
    }

    /// Peek at the stored entry without promoting it.
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        rw_read(&self.state, SOURCE, "entry").entries.peek(key).cloned()
    }
}

/// Evict until the store fits. Expired entries go first, then the least
/// recently used entry of the lowest priority class. `NotRemovable` entries
/// are skipped; if nothing else is left the store stays over capacity.
fn evict_overflow(state: &mut StoreState, max: NonZeroUsize) {
    let now = Instant::now();
    while state.entries.len() > max.get() {
        let Some(victim) = pick_victim(&state.entries, now) else {
            break;
        };
        state.remove(&victim);
        counter!(METRIC_EVICT_TOTAL, "reason" => "capacity").increment(1);
        debug!(cache_key = %victim, "cache entry evicted for capacity");
    }
}

fn pick_victim(entries: &LruCache<String, CacheEntry>, now: Instant) -> Option<String> {
    let mut candidate: Option<(&String, Priority)> = None;

    // Least recently used first.
    for (key, entry) in entries.iter().rev() {
        if entry.is_expired(now) {
            return Some(key.clone());
        }
        let priority = entry.policy.priority;
        if priority == Priority::NotRemovable {
            continue;
        }
        if candidate.is_none_or(|(_, best)| priority < best) {
            candidate = Some((key, priority));
        }
    }

    candidate.map(|(key, _)| key.clone())
}
