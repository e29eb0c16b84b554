//! Configuration layer: typed settings with layered precedence (file → env).

use std::{num::NonZeroUsize, path::Path, str::FromStr, time::Duration};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{CacheConfig, CacheMode, Priority, ReturnMode};

const LOCAL_CONFIG_BASENAME: &str = "entity-cache";
const ENV_PREFIX: &str = "ENTITY_CACHE";
const ENV_SEPARATOR: &str = "__";
const ENV_LIST_SEPARATOR: &str = ",";

/// Validated settings handed to the host at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache: CacheConfig,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Compact,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence: `entity-cache.{toml,yaml,json}`
/// in the working directory, then `path` if given, then `ENTITY_CACHE__*`
/// environment variables.
pub fn load(path: Option<&Path>) -> Result<Settings, LoadError> {
    load_with(path, environment())
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
        .list_separator(ENV_LIST_SEPARATOR)
        .with_list_parse_key("cache.read_only_requests")
}

fn load_with(path: Option<&Path>, environment: Environment) -> Result<Settings, LoadError> {
    let mut builder =
        Config::builder().add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(environment);

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    cache: RawCacheSettings,
    logging: RawLoggingSettings,
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings { cache, logging } = raw;

        let cache = build_cache_settings(cache)?;
        let logging = build_logging_settings(logging)?;

        Ok(Self { cache, logging })
    }
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let defaults = CacheConfig::default();

    let namespace = cache.namespace.unwrap_or(defaults.namespace);
    if namespace.trim().is_empty() {
        return Err(LoadError::invalid("cache.namespace", "must not be empty"));
    }

    let dependency_prefix = cache
        .dependency_prefix
        .unwrap_or(defaults.dependency_prefix);
    if dependency_prefix.trim().is_empty() {
        return Err(LoadError::invalid(
            "cache.dependency_prefix",
            "must not be empty",
        ));
    }

    let absolute_expiration = positive_seconds(
        "cache.absolute_expiration_seconds",
        cache.absolute_expiration_seconds,
    )?;
    let sliding_expiration = positive_seconds(
        "cache.sliding_expiration_seconds",
        cache.sliding_expiration_seconds,
    )?;
    if absolute_expiration.is_some() && sliding_expiration.is_some() {
        return Err(LoadError::invalid(
            "cache.sliding_expiration_seconds",
            "cannot be combined with cache.absolute_expiration_seconds",
        ));
    }

    let max_entries = match cache.max_entries {
        Some(count) => Some(NonZeroUsize::new(count).ok_or_else(|| {
            LoadError::invalid("cache.max_entries", "must be greater than zero")
        })?),
        None => None,
    };

    let lock_timeout = match cache.lock_timeout_ms {
        Some(0) => {
            return Err(LoadError::invalid(
                "cache.lock_timeout_ms",
                "must be greater than zero",
            ));
        }
        Some(ms) => Duration::from_millis(ms),
        None => defaults.lock_timeout,
    };

    let read_only_requests = match cache.read_only_requests {
        Some(names) => names
            .into_iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect(),
        None => defaults.read_only_requests,
    };

    Ok(CacheConfig {
        mode: cache.mode.unwrap_or_default(),
        return_mode: cache.return_mode.unwrap_or_default(),
        namespace,
        dependency_prefix,
        hash_keys: cache.hash_keys.unwrap_or(false),
        connection_id: cache.connection_id.filter(|id| !id.trim().is_empty()),
        absolute_expiration,
        sliding_expiration,
        priority: cache.priority.unwrap_or_default(),
        max_entries,
        lock_timeout,
        read_only_requests,
    })
}

fn positive_seconds(key: &'static str, seconds: Option<u64>) -> Result<Option<Duration>, LoadError> {
    match seconds {
        Some(0) => Err(LoadError::invalid(key, "must be greater than zero")),
        Some(seconds) => Ok(Some(Duration::from_secs(seconds))),
        None => Ok(None),
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    mode: Option<CacheMode>,
    return_mode: Option<ReturnMode>,
    namespace: Option<String>,
    dependency_prefix: Option<String>,
    hash_keys: Option<bool>,
    connection_id: Option<String>,
    absolute_expiration_seconds: Option<u64>,
    sliding_expiration_seconds: Option<u64>,
    priority: Option<Priority>,
    max_entries: Option<usize>,
    lock_timeout_ms: Option<u64>,
    read_only_requests: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[cfg(test)]
mod tests;
