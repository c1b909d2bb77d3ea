//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`FanoutSettings::default()`]
//! 2. If `~/.fanout/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use fanout_core::logging::LogFormat;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::FanoutSettings;

/// Resolve the path to the settings file (`~/.fanout/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".fanout").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<FanoutSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, or the merged values fail validation, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<FanoutSettings> {
    let mut settings = read_merged(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn read_merged(path: &Path) -> Result<FanoutSettings> {
    let defaults = serde_json::to_value(FanoutSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `FANOUT_*` environment variable overrides to loaded settings.
///
/// Integers must parse and fall within the documented range; invalid values
/// are logged and ignored (the file/default value stays).
pub fn apply_env_overrides(settings: &mut FanoutSettings) {
    apply_overrides(settings, |key| std::env::var(key).ok());
}

/// Apply overrides from an arbitrary key lookup.
///
/// [`apply_env_overrides`] passes the process environment; tests pass a map.
pub fn apply_overrides<F>(settings: &mut FanoutSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = Overrides { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("FANOUT_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.parsed("FANOUT_PORT", |s| parse_u16_range(s, 0, 65535)) {
        settings.server.port = v;
    }

    // ── Relay ───────────────────────────────────────────────────────
    if let Some(v) = env.parsed("FANOUT_RECEIVE_BUFFER_SIZE", |s| {
        parse_usize_range(s, 256, 64 * 1024 * 1024)
    }) {
        settings.relay.receive_buffer_size = v;
    }
    if let Some(v) = env.parsed("FANOUT_MAX_MESSAGE_SIZE", |s| {
        parse_usize_range(s, 256, 256 * 1024 * 1024)
    }) {
        settings.relay.max_message_size = v;
    }
    if let Some(v) = env.parsed("FANOUT_SUBSCRIBER_QUEUE", |s| {
        parse_usize_range(s, 1, 1_000_000)
    }) {
        settings.relay.subscriber_queue_capacity = v;
    }
    if let Some(v) = env.parsed("FANOUT_SEND_TIMEOUT_MS", |s| {
        parse_u64_range(s, 100, 600_000)
    }) {
        settings.relay.send_timeout_ms = v;
    }
    if let Some(v) = env.parsed("FANOUT_PING_INTERVAL_SECS", |s| {
        parse_u64_range(s, 1, 3600)
    }) {
        settings.relay.ping_interval_secs = v;
    }

    // ── Sweeper ─────────────────────────────────────────────────────
    if let Some(v) = env.parsed("FANOUT_SWEEP_INTERVAL_SECS", |s| {
        parse_u64_range(s, 1, 86_400)
    }) {
        settings.sweeper.interval_secs = v;
    }
    if let Some(v) = env.parsed("FANOUT_INACTIVITY_TIMEOUT_SECS", |s| {
        parse_u64_range(s, 1, 86_400)
    }) {
        settings.sweeper.inactivity_timeout_secs = v;
    }
    if let Some(v) = env.parsed("FANOUT_ABANDONED_TIMEOUT_SECS", |s| {
        parse_u64_range(s, 1, 86_400)
    }) {
        settings.sweeper.abandoned_timeout_secs = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("FANOUT_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("FANOUT_LOG_FORMAT", |s| s.parse::<LogFormat>().ok()) {
        settings.logging.format = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Lookup wrapper ──────────────────────────────────────────────────────────

struct Overrides<F> {
    lookup: F,
}

impl<F> Overrides<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, key: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = self.string(key)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key, value = %val, "invalid env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;

    fn overrides_from(pairs: &[(&str, &str)]) -> FanoutSettings {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let mut settings = FanoutSettings::default();
        apply_overrides(&mut settings, |key| map.get(key).cloned());
        settings
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({
            "server": {"port": 8080, "host": "localhost"}
        });
        let source = serde_json::json!({
            "server": {"port": 9090}
        });
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "localhost");
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4, 5]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["items"], serde_json::json!([4, 5]));
    }

    #[test]
    fn merge_new_keys_added() {
        let target = serde_json::json!({"a": 1});
        let source = serde_json::json!({"b": 2});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 42);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = read_merged(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.sweeper.interval_secs, 300);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9090}, "sweeper": {"abandonedTimeoutSecs": 10}}"#,
        )
        .unwrap();

        let settings = read_merged(&path).unwrap();
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.sweeper.abandoned_timeout_secs, 10);
        assert_eq!(settings.sweeper.inactivity_timeout_secs, 90);
    }

    #[test]
    fn load_null_keeps_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"relay": {"subscriberQueueCapacity": null}}"#).unwrap();

        let settings = read_merged(&path).unwrap();
        assert_eq!(settings.relay.subscriber_queue_capacity, 256);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn load_wrong_type_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": "eighty"}}"#).unwrap();

        assert!(matches!(
            read_merged(&path).unwrap_err(),
            SettingsError::Json(_)
        ));
    }

    #[test]
    fn load_zero_interval_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"sweeper": {"intervalSecs": 0}}"#).unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(
            result.unwrap_err(),
            SettingsError::InvalidValue(_)
        ));
    }

    // ── apply_overrides ─────────────────────────────────────────────

    #[test]
    fn overrides_apply_to_every_section() {
        let settings = overrides_from(&[
            ("FANOUT_HOST", "127.0.0.1"),
            ("FANOUT_PORT", "9100"),
            ("FANOUT_SUBSCRIBER_QUEUE", "16"),
            ("FANOUT_SEND_TIMEOUT_MS", "2500"),
            ("FANOUT_INACTIVITY_TIMEOUT_SECS", "45"),
            ("FANOUT_LOG_LEVEL", "debug"),
            ("FANOUT_LOG_FORMAT", "json"),
        ]);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.relay.subscriber_queue_capacity, 16);
        assert_eq!(settings.relay.send_timeout_ms, 2500);
        assert_eq!(settings.sweeper.inactivity_timeout_secs, 45);
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn invalid_override_is_ignored() {
        let settings = overrides_from(&[
            ("FANOUT_PORT", "not_a_port"),
            ("FANOUT_SWEEP_INTERVAL_SECS", "0"),
            ("FANOUT_LOG_FORMAT", "xml"),
        ]);
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.sweeper.interval_secs, 300);
        assert_eq!(settings.logging.format, LogFormat::Compact);
    }

    #[test]
    fn empty_override_is_ignored() {
        let settings = overrides_from(&[("FANOUT_HOST", "")]);
        assert_eq!(settings.server.host, "0.0.0.0");
    }

    #[test]
    fn no_overrides_keeps_defaults() {
        let settings = overrides_from(&[]);
        assert_eq!(settings.relay.receive_buffer_size, 10 * 1024);
        assert_eq!(settings.relay.ping_interval_secs, 30);
    }

    // ── range parsers ───────────────────────────────────────────────

    #[test]
    fn parse_u16_valid() {
        assert_eq!(parse_u16_range("9090", 1, 65535), Some(9090));
        assert_eq!(parse_u16_range("65535", 1, 65535), Some(65535));
    }

    #[test]
    fn parse_u16_invalid() {
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("99999", 1, 65535), None);
        assert_eq!(parse_u16_range("", 1, 65535), None);
    }

    #[test]
    fn parse_u64_bounds() {
        assert_eq!(parse_u64_range("1000", 1000, 600_000), Some(1000));
        assert_eq!(parse_u64_range("500", 1000, 600_000), None);
        assert_eq!(parse_u64_range("700000", 1000, 600_000), None);
        assert_eq!(parse_u64_range("abc", 1000, 600_000), None);
    }

    #[test]
    fn parse_usize_bounds() {
        assert_eq!(parse_usize_range("50", 1, 10_000), Some(50));
        assert_eq!(parse_usize_range("0", 1, 10_000), None);
        assert_eq!(parse_usize_range("20000", 1, 10_000), None);
    }
}
