//! Dependency-aware response cache.
//!
//! Reads are keyed by [`CacheKeyBuilder`] and stored in a [`CacheStore`]
//! together with the dependency tokens [`DependencyExtractor`] derives from
//! the request and its response. Mutations and [`InvalidationMessage`]s
//! remove entries by token through the [`InvalidationGateway`].
//!
//! ## Configuration
//!
//! Cache behavior is controlled via `entity-cache.toml`:
//!
//! ```toml
//! [cache]
//! mode = "lookup_and_insert"
//! return_mode = "cloned"
//! lock_timeout_ms = 30000
//! # ... see crate::config for all options
//! ```

mod cloner;
pub(crate) mod config;
mod coordinator;
pub mod deps;
mod engine;
mod events;
mod gateway;
mod keys;
mod lock;
mod planner;
mod policy;
mod registry;
mod store;

pub use cloner::{ResponseCloner, StructuralCloner};
pub use config::{CacheConfig, CacheMode, CacheOptions, ReturnMode};
pub use coordinator::ExecutionCoordinator;
pub use deps::{
    DependencyExtractor, DependencyToken, RequestClass, RequestClassifier, TokenScheme,
};
pub use engine::EntityCache;
pub use events::{CacheCategory, InvalidationMessage, InvalidationQueue};
pub use gateway::InvalidationGateway;
pub use keys::CacheKeyBuilder;
pub use lock::KeyLocks;
pub use planner::InvalidationPlan;
pub use policy::{CachePolicy, CachePolicyFactory, Expiration, Priority};
pub use registry::TokenIndex;
pub use store::{CacheEntry, CacheStore, Generation, Outcome};
