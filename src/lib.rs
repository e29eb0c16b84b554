//! Dependency-aware response cache for RPC-style entity data services.
//!
//! Wrap a service in [`CachingService`] to serve repeated reads from an
//! in-process store and have every mutation invalidate exactly the cached
//! reads that could have observed it.

pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod service;
pub mod telemetry;

pub use cache::{
    CacheCategory, CacheConfig, CacheMode, EntityCache, InvalidationGateway, InvalidationMessage,
    InvalidationQueue, ReturnMode,
};
pub use error::{CacheError, LockTimeout};
pub use service::{CachingService, EntityService};
