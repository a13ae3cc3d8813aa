//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::EstimaSettings;

/// Default settings file location (`~/.estima/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".estima").join("settings.json")
}

/// Load settings from `path` (or the default location) plus process env overrides.
pub fn load_settings(path: Option<&Path>) -> Result<EstimaSettings> {
    let default_path = settings_path();
    let mut settings = load_settings_from_path(path.unwrap_or(&default_path))?;
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings.validate()?;
    Ok(settings)
}

/// Load settings from a file without env overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<EstimaSettings> {
    let defaults = serde_json::to_value(EstimaSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
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

/// Apply `ESTIMA_*` overrides read through `lookup`.
///
/// Values that fail to parse or fall outside their range are ignored.
pub fn apply_env_overrides(settings: &mut EstimaSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(v) = read("ESTIMA_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("ESTIMA_PORT").and_then(|v| parse_in_range::<u16>(&v, 1, u16::MAX)) {
        settings.server.port = v;
    }
    if let Some(v) = read("ESTIMA_HEARTBEAT_TIMEOUT_SECS").and_then(|v| parse_in_range(&v, 10, 86_400)) {
        settings.policy.heartbeat_timeout_secs = v;
    }
    if let Some(v) = read("ESTIMA_SESSION_TTL_SECS").and_then(|v| parse_in_range(&v, 60, 30 * 86_400)) {
        settings.policy.session_ttl_secs = v;
    }
    if let Some(v) = read("ESTIMA_SWEEP_INTERVAL_SECS").and_then(|v| parse_in_range(&v, 1, 3_600)) {
        settings.policy.sweep_interval_secs = v;
    }
    if let Some(v) = read("ESTIMA_CONSENSUS_THRESHOLD").and_then(|v| v.parse::<f64>().ok()) {
        if v > 0.0 && v <= 1.0 {
            settings.policy.consensus_threshold = v;
        }
    }
    if let Some(v) = read("ESTIMA_DEFAULT_DECK") {
        settings.policy.default_deck = v;
    }
    if let Some(v) = read("ESTIMA_UPLOAD_DIR") {
        settings.avatars.upload_dir = v;
    }
    if let Some(v) = read("ESTIMA_MAX_AVATAR_BYTES").and_then(|v| parse_in_range(&v, 1024, 64 * 1024 * 1024)) {
        settings.avatars.max_bytes = v;
    }
    if let Some(v) = read("ESTIMA_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("ESTIMA_LOG_JSON").and_then(|v| parse_bool(&v)) {
        settings.logging.json = v;
    }
}

fn parse_in_range<T: FromStr + PartialOrd>(raw: &str, min: T, max: T) -> Option<T> {
    raw.parse::<T>().ok().filter(|v| *v >= min && *v <= max)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
