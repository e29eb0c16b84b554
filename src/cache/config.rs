//! Cache configuration.
//!
//! `CacheConfig` is built once by the host (see `crate::config::load`) and
//! handed to `EntityCache::new`. Mode and return mode can be flipped on a
//! live cache through `CacheOptions`; every call reads the current value.

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Deserialize;

use super::policy::Priority;

const DEFAULT_NAMESPACE: &str = "entity-cache";
const DEFAULT_DEPENDENCY_PREFIX: &str = "entity-cache:dependency";
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_READ_ONLY_REQUESTS: [&str; 3] =
    ["WhoAmI", "RetrieveVersion", "RetrieveCurrentOrganization"];

/// How reads interact with the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Serve hits; on a miss compute once and insert.
    #[default]
    LookupAndInsert,
    /// Always compute and overwrite the entry.
    InsertOnly,
    /// Bypass the store entirely.
    Disabled,
}

impl CacheMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheMode::LookupAndInsert => "lookup_and_insert",
            CacheMode::InsertOnly => "insert_only",
            CacheMode::Disabled => "disabled",
        }
    }
}

/// What a read hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnMode {
    /// The stored value itself. Callers must treat it as read-only.
    Shared,
    /// A structural copy the caller owns.
    #[default]
    Cloned,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub mode: CacheMode,
    pub return_mode: ReturnMode,
    /// Leading segment of every cache key.
    pub namespace: String,
    /// Leading segment of every dependency token.
    pub dependency_prefix: String,
    /// Replace variable key bodies (and the connection qualifier) with a hash.
    pub hash_keys: bool,
    /// Tenant or connection qualifier mixed into every key.
    pub connection_id: Option<String>,
    pub absolute_expiration: Option<Duration>,
    pub sliding_expiration: Option<Duration>,
    pub priority: Priority,
    /// Upper bound on stored entries; unbounded when `None`.
    pub max_entries: Option<NonZeroUsize>,
    /// Bound on per-key mutex acquisition.
    pub lock_timeout: Duration,
    /// Generic message names that only read content and may be cached.
    pub read_only_requests: BTreeSet<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mode: CacheMode::default(),
            return_mode: ReturnMode::default(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            dependency_prefix: DEFAULT_DEPENDENCY_PREFIX.to_string(),
            hash_keys: false,
            connection_id: None,
            absolute_expiration: None,
            sliding_expiration: None,
            priority: Priority::default(),
            max_entries: None,
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            read_only_requests: DEFAULT_READ_ONLY_REQUESTS
                .iter()
                .map(|name| name.to_string())
                .collect(),
        }
    }
}

impl CacheConfig {
    /// Returns true if reads consult or populate the store.
    pub fn is_enabled(&self) -> bool {
        self.mode != CacheMode::Disabled
    }
}

/// Live, mutable switches shared by every component of one cache.
#[derive(Debug)]
pub struct CacheOptions {
    mode: RwLock<CacheMode>,
    return_mode: RwLock<ReturnMode>,
}

impl CacheOptions {
    pub fn new(mode: CacheMode, return_mode: ReturnMode) -> Self {
        Self {
            mode: RwLock::new(mode),
            return_mode: RwLock::new(return_mode),
        }
    }

    pub fn mode(&self) -> CacheMode {
        *self.mode.read()
    }

    pub fn set_mode(&self, mode: CacheMode) {
        *self.mode.write() = mode;
    }

    pub fn return_mode(&self) -> ReturnMode {
        *self.return_mode.read()
    }

    pub fn set_return_mode(&self, return_mode: ReturnMode) {
        *self.return_mode.write() = return_mode;
    }
}

impl From<&CacheConfig> for CacheOptions {
    fn from(config: &CacheConfig) -> Self {
        Self::new(config.mode, config.return_mode)
    }
}
