use std::collections::HashMap;
use std::io::Write;

use tempfile::NamedTempFile;

use super::*;

fn env(pairs: &[(&str, &str)]) -> Environment {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    environment().source(Some(map))
}

fn toml_file(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_when_nothing_is_configured() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.cache.mode, CacheMode::LookupAndInsert);
    assert_eq!(settings.cache.return_mode, ReturnMode::Cloned);
    assert_eq!(settings.cache.lock_timeout, Duration::from_secs(30));
    assert!(settings.cache.read_only_requests.contains("WhoAmI"));
    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert_eq!(settings.logging.format, LogFormat::Compact);
}

#[test]
fn file_values_are_applied() {
    let file = toml_file(
        r#"
        [cache]
        mode = "insert_only"
        return_mode = "shared"
        namespace = "crm"
        hash_keys = true
        connection_id = "org-1"
        sliding_expiration_seconds = 120
        priority = "high"
        max_entries = 1000
        lock_timeout_ms = 250
        read_only_requests = ["WhoAmI", "RetrieveUserSettings"]

        [logging]
        level = "debug"
        json = true
        "#,
    );

    let settings = load_with(Some(file.path()), env(&[])).expect("valid settings");

    assert_eq!(settings.cache.mode, CacheMode::InsertOnly);
    assert_eq!(settings.cache.return_mode, ReturnMode::Shared);
    assert_eq!(settings.cache.namespace, "crm");
    assert!(settings.cache.hash_keys);
    assert_eq!(settings.cache.connection_id.as_deref(), Some("org-1"));
    assert_eq!(
        settings.cache.sliding_expiration,
        Some(Duration::from_secs(120))
    );
    assert_eq!(settings.cache.priority, Priority::High);
    assert_eq!(settings.cache.max_entries.map(NonZeroUsize::get), Some(1000));
    assert_eq!(settings.cache.lock_timeout, Duration::from_millis(250));
    assert!(settings.cache.read_only_requests.contains("RetrieveUserSettings"));
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.logging.format, LogFormat::Json);
}

#[test]
fn environment_takes_precedence_over_file() {
    let file = toml_file(
        r#"
        [cache]
        mode = "insert_only"
        lock_timeout_ms = 250
        "#,
    );

    let settings = load_with(
        Some(file.path()),
        env(&[
            ("ENTITY_CACHE__CACHE__MODE", "disabled"),
            ("ENTITY_CACHE__CACHE__READ_ONLY_REQUESTS", "WhoAmI,RetrieveVersion"),
        ]),
    )
    .expect("valid settings");

    assert_eq!(settings.cache.mode, CacheMode::Disabled);
    assert_eq!(settings.cache.lock_timeout, Duration::from_millis(250));
    assert_eq!(settings.cache.read_only_requests.len(), 2);
}

#[test]
fn explicit_file_must_exist() {
    let error = load_with(Some(Path::new("/nonexistent/entity-cache.toml")), env(&[]))
        .expect_err("missing file rejected");
    assert!(matches!(error, LoadError::Build(_)));
}

#[test]
fn absolute_and_sliding_expiration_are_exclusive() {
    let mut raw = RawSettings::default();
    raw.cache.absolute_expiration_seconds = Some(60);
    raw.cache.sliding_expiration_seconds = Some(60);

    let error = Settings::from_raw(raw).expect_err("conflict rejected");
    assert!(matches!(
        error,
        LoadError::Invalid {
            key: "cache.sliding_expiration_seconds",
            ..
        }
    ));
}

#[test]
fn zero_lock_timeout_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.lock_timeout_ms = Some(0);

    let error = Settings::from_raw(raw).expect_err("zero timeout rejected");
    assert!(matches!(
        error,
        LoadError::Invalid {
            key: "cache.lock_timeout_ms",
            ..
        }
    ));
}

#[test]
fn zero_capacity_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.max_entries = Some(0);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn blank_connection_id_is_ignored() {
    let mut raw = RawSettings::default();
    raw.cache.connection_id = Some("  ".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.cache.connection_id.is_none());
}

#[test]
fn invalid_log_level_is_rejected() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("chatty".to_string());

    let error = Settings::from_raw(raw).expect_err("bad level rejected");
    assert!(error.to_string().contains("logging.level"));
}
