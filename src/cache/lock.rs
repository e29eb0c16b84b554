use std::sync::{Arc, Mutex as StdMutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use metrics::counter;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::LockTimeout;

const METRIC_LOCK_TIMEOUT_TOTAL: &str = "entity_cache_lock_timeout_total";

/// Take the guard out of a poisoned lock and log it.
fn recover<G>(
    poisoned: std::sync::PoisonError<G>,
    kind: &'static str,
    target: &'static str,
    op: &'static str,
) -> G {
    warn!(
        op,
        source_module = target,
        lock_kind = kind,
        outcome = "poison_recovered",
        "lock poisoned by a panicking thread, continuing"
    );
    poisoned.into_inner()
}

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    lock.read()
        .unwrap_or_else(|poisoned| recover(poisoned, "rwlock.read", target, op))
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    lock.write()
        .unwrap_or_else(|poisoned| recover(poisoned, "rwlock.write", target, op))
}

pub(crate) fn mutex_lock<'a, T>(
    lock: &'a StdMutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    lock.lock()
        .unwrap_or_else(|poisoned| recover(poisoned, "mutex", target, op))
}

/// Per-key mutexes, created on demand and kept for the life of the table.
///
/// Acquisition is bounded by `timeout`; a stalled holder surfaces as
/// [`LockTimeout`] instead of blocking forever. The table grows with the
/// number of distinct keys ever locked; hosts with unbounded key
/// cardinality should call [`KeyLocks::prune_idle`] periodically.
#[derive(Debug)]
pub struct KeyLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
    timeout: Duration,
}

impl KeyLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `f` while holding the mutex for `key`.
    pub fn with_lock<T>(&self, key: &str, f: impl FnOnce() -> T) -> Result<T, LockTimeout> {
        // Clone the handle out so the map shard is not held while we wait.
        let lock = Arc::clone(
            self.locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );

        let started = Instant::now();
        let Some(_guard) = lock.try_lock_for(self.timeout) else {
            let waited = started.elapsed();
            counter!(METRIC_LOCK_TIMEOUT_TOTAL).increment(1);
            warn!(cache_key = key, waited_ms = waited.as_millis() as u64, "cache key lock timed out");
            return Err(LockTimeout {
                key: key.to_string(),
                waited,
            });
        };

        let waited = started.elapsed();
        if !waited.is_zero() {
            debug!(cache_key = key, waited_us = waited.as_micros() as u64, "cache key lock acquired");
        }
        Ok(f())
    }

    /// Drop mutexes nobody holds or waits on. Returns how many were dropped.
    pub fn prune_idle(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.locks.len())
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
