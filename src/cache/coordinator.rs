//! Runs a cacheable call according to the current cache mode.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, warn};

use crate::domain::Response;
use crate::error::{CacheError, LockTimeout};

use super::cloner::ResponseCloner;
use super::config::{CacheMode, CacheOptions, ReturnMode};
use super::policy::CachePolicy;
use super::store::{CacheStore, Generation, Outcome};

const METRIC_HIT_TOTAL: &str = "entity_cache_hit_total";
const METRIC_MISS_TOTAL: &str = "entity_cache_miss_total";
const METRIC_BYPASS_TOTAL: &str = "entity_cache_bypass_total";
const METRIC_UPSTREAM_MS: &str = "entity_cache_upstream_ms";

/// Dispatches to lookup-and-insert, insert-only or pass-through execution
/// and applies the return mode to whatever comes back.
pub struct ExecutionCoordinator {
    store: Arc<CacheStore>,
    options: Arc<CacheOptions>,
    cloner: Arc<dyn ResponseCloner>,
}

impl ExecutionCoordinator {
    pub fn new(
        store: Arc<CacheStore>,
        options: Arc<CacheOptions>,
        cloner: Arc<dyn ResponseCloner>,
    ) -> Self {
        Self {
            store,
            options,
            cloner,
        }
    }

    /// Execute `compute` for `key`.
    ///
    /// `policy` turns a freshly computed value into the policy it is stored
    /// under. `compute` may run a second time when the cached copy cannot be
    /// cloned, in which case the fresh value is returned uncached.
    pub fn execute<E, C, P>(&self, key: &str, compute: C, policy: P) -> Result<Response, CacheError<E>>
    where
        E: std::error::Error + 'static,
        C: Fn() -> Result<Response, E>,
        P: Fn(&Response) -> CachePolicy,
    {
        let mode = self.options.mode();
        let timed = || timed_call(mode, &compute);
        let insert = |store: &CacheStore, since: &Generation<'_>, key: &str, value: &Response| {
            store.insert_fresh(since, key, value.clone(), policy(value));
        };

        let (value, outcome) = match mode {
            CacheMode::Disabled => {
                let value = timed().map_err(CacheError::Upstream)?;
                debug!(cache_key = key, mode = mode.as_str(), outcome = "passthrough", "cache disabled");
                return Ok(value);
            }
            CacheMode::InsertOnly => {
                // Serializes refresh + insert per key; every caller still computes.
                let result: Result<Result<Response, E>, LockTimeout> =
                    self.store.locks().with_lock(key, || {
                        let since = self.store.generation();
                        let value = timed()?;
                        insert(&self.store, &since, key, &value);
                        Ok(value)
                    });
                (result?.map_err(CacheError::Upstream)?, Outcome::Computed)
            }
            CacheMode::LookupAndInsert => {
                let (value, outcome) = self.store.get_or_compute(key, timed, insert)?;
                match outcome {
                    Outcome::Hit | Outcome::Coalesced => counter!(METRIC_HIT_TOTAL).increment(1),
                    Outcome::Computed => counter!(METRIC_MISS_TOTAL).increment(1),
                }
                (value, outcome)
            }
        };

        debug!(
            cache_key = key,
            mode = mode.as_str(),
            outcome = outcome_label(outcome),
            "cache lookup completed"
        );

        match self.options.return_mode() {
            ReturnMode::Shared => Ok(value),
            ReturnMode::Cloned => match self.cloner.clone_response(&value) {
                Ok(copy) => Ok(copy),
                Err(error) => {
                    warn!(cache_key = key, error = %error, "cached value could not be cloned, bypassing cache");
                    self.bypass("clone", &compute)
                }
            },
        }
    }

    /// Call upstream without touching the store.
    pub fn bypass<E, C>(&self, reason: &'static str, compute: C) -> Result<Response, CacheError<E>>
    where
        E: std::error::Error + 'static,
        C: Fn() -> Result<Response, E>,
    {
        counter!(METRIC_BYPASS_TOTAL, "reason" => reason).increment(1);
        timed_call(self.options.mode(), &compute).map_err(CacheError::Upstream)
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }
}

fn timed_call<E, C>(mode: CacheMode, compute: &C) -> Result<Response, E>
where
    C: Fn() -> Result<Response, E>,
{
    let started = Instant::now();
    let result = compute();
    let elapsed = started.elapsed();
    histogram!(METRIC_UPSTREAM_MS, "mode" => mode.as_str()).record(elapsed.as_secs_f64() * 1000.0);
    debug!(
        mode = mode.as_str(),
        elapsed_ms = elapsed.as_millis() as u64,
        ok = result.is_ok(),
        "upstream call finished"
    );
    result
}

fn outcome_label(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Hit => "hit",
        Outcome::Coalesced => "coalesced",
        Outcome::Computed => "computed",
    }
}
