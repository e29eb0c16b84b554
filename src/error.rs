use std::error::Error as StdError;
use std::time::Duration;

use thiserror::Error;

/// The per-key mutex could not be acquired within the configured bound.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("timed out after {waited:?} waiting for cache key lock `{key}`")]
pub struct LockTimeout {
    pub key: String,
    pub waited: Duration,
}

/// Failure surfaced by the caching layer.
///
/// `Upstream` carries the wrapped service's error unchanged; `LockTimeout`
/// is the only failure mode the cache adds on top of it.
#[derive(Debug, Error)]
pub enum CacheError<E>
where
    E: StdError + 'static,
{
    #[error(transparent)]
    LockTimeout(#[from] LockTimeout),
    #[error("upstream call failed: {0}")]
    Upstream(#[source] E),
}

impl<E> CacheError<E>
where
    E: StdError + 'static,
{
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, CacheError::LockTimeout(_))
    }

    pub fn upstream(&self) -> Option<&E> {
        match self {
            CacheError::Upstream(error) => Some(error),
            CacheError::LockTimeout(_) => None,
        }
    }

    pub fn into_upstream(self) -> Option<E> {
        match self {
            CacheError::Upstream(error) => Some(error),
            CacheError::LockTimeout(_) => None,
        }
    }
}

/// A request could not be encoded into a cache key.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to encode request parameters: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The cloner was handed a value it cannot copy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot clone cached value of shape `{shape}`")]
pub struct CloneError {
    pub shape: &'static str,
}

/// An invalidation message could not be (de)serialized.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("malformed invalidation message: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode invalidation message: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry initialization failed: {0}")]
    Install(String),
}
