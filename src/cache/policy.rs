//! Expiration and priority policy for cache entries.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use serde::Deserialize;

use super::config::CacheConfig;
use super::deps::DependencyToken;

/// Eviction preference when the store is over capacity. Lower priorities
/// are evicted first; `NotRemovable` entries are never evicted for space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    NotRemovable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiration {
    #[default]
    Never,
    /// Fixed lifetime measured from insertion.
    Absolute(Duration),
    /// Lifetime renewed on every read.
    Sliding(Duration),
}

impl Expiration {
    /// The instant after which an entry is stale, or `None` if it never is.
    pub fn deadline(&self, inserted_at: Instant, last_access: Instant) -> Option<Instant> {
        match self {
            Expiration::Never => None,
            Expiration::Absolute(ttl) => inserted_at.checked_add(*ttl),
            Expiration::Sliding(ttl) => last_access.checked_add(*ttl),
        }
    }
}

/// Policy attached to one entry: expiration, priority and the dependency
/// tokens whose invalidation removes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    pub expiration: Expiration,
    pub priority: Priority,
    pub dependencies: BTreeSet<DependencyToken>,
}

impl CachePolicy {
    pub fn is_expired(&self, inserted_at: Instant, last_access: Instant, now: Instant) -> bool {
        self.expiration
            .deadline(inserted_at, last_access)
            .is_some_and(|deadline| now >= deadline)
    }
}

/// Builds per-entry policies from the configured defaults.
#[derive(Debug, Clone)]
pub struct CachePolicyFactory {
    expiration: Expiration,
    priority: Priority,
}

impl CachePolicyFactory {
    pub fn new(expiration: Expiration, priority: Priority) -> Self {
        Self {
            expiration,
            priority,
        }
    }

    /// Absolute expiration wins if both kinds are configured.
    pub fn from_config(config: &CacheConfig) -> Self {
        let expiration = match (config.absolute_expiration, config.sliding_expiration) {
            (Some(ttl), _) => Expiration::Absolute(ttl),
            (None, Some(ttl)) => Expiration::Sliding(ttl),
            (None, None) => Expiration::Never,
        };
        Self::new(expiration, config.priority)
    }

    pub fn create(&self, dependencies: BTreeSet<DependencyToken>) -> CachePolicy {
        CachePolicy {
            expiration: self.expiration,
            priority: self.priority,
            dependencies,
        }
    }
}

impl Default for CachePolicyFactory {
    fn default() -> Self {
        Self::new(Expiration::Never, Priority::Normal)
    }
}
