//! Ledger settings: compiled defaults, an optional JSON file merged over
//! them, then environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{LedgerError, LedgerErrorKind, LedgerResult};
use crate::orchestration::OperationTimeouts;

pub const DATABASE_PATH_ENV: &str = "TALLY_DB_PATH";
pub const LOG_FILTER_ENV: &str = "TALLY_LOG";

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    pub database_path: PathBuf,
    pub tool_version: String,
    pub store_busy_timeout_ms: u64,
    pub gateway_query_timeout_ms: Option<u64>,
    pub gateway_mutation_timeout_ms: Option<u64>,
    pub log_filter: String,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            store_busy_timeout_ms: 5_000,
            gateway_query_timeout_ms: Some(120_000),
            gateway_mutation_timeout_ms: None,
            log_filter: "warn".to_string(),
        }
    }
}

impl LedgerSettings {
    pub fn store_busy_timeout(&self) -> Duration {
        Duration::from_millis(self.store_busy_timeout_ms)
    }

    /// Installs the tracing subscriber with `log_filter` as the default.
    pub fn init_logging(&self) -> bool {
        crate::logging::init_logging(&self.log_filter)
    }

    pub fn timeouts(&self) -> OperationTimeouts {
        OperationTimeouts {
            gateway_query: self.gateway_query_timeout_ms.map(Duration::from_millis),
            gateway_mutation: self.gateway_mutation_timeout_ms.map(Duration::from_millis),
        }
    }
}

fn default_database_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home)
        .join(".local")
        .join("share")
        .join("tally")
        .join("ledger.db")
}

/// Loads settings from `path`. A missing file yields the defaults; invalid
/// JSON is an error.
pub fn load_settings_from_path(path: &Path) -> LedgerResult<LedgerSettings> {
    let mut settings = load_file_over_defaults(path)?;
    apply_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn load_file_over_defaults(path: &Path) -> LedgerResult<LedgerSettings> {
    let defaults = serde_json::to_value(LedgerSettings::default()).map_err(|error| {
        LedgerError::internal(format!("unable to serialise default settings: {error}"))
    })?;

    let merged = if path.exists() {
        tracing::debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|error| {
            LedgerError::new(
                LedgerErrorKind::InvalidInput,
                format!("unable to read settings file '{}': {error}", path.display()),
            )
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|error| parse_error(path, error))?;
        merge_over(defaults, user)
    } else {
        tracing::debug!(?path, "settings file not found, using defaults");
        defaults
    };

    serde_json::from_value(merged).map_err(|error| parse_error(path, error))
}

fn parse_error(path: &Path, error: serde_json::Error) -> LedgerError {
    LedgerError::new(
        LedgerErrorKind::ParseFailure,
        format!("invalid settings file '{}': {error}", path.display()),
    )
}

/// Top-level keys from `source` replace those in `target`; nulls are skipped.
fn merge_over(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, value) in source_map {
                if value.is_null() {
                    continue;
                }
                let _ = target_map.insert(key, value);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Applies environment overrides through `lookup`. Blank values are ignored.
pub fn apply_overrides(settings: &mut LedgerSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(path) = read(DATABASE_PATH_ENV) {
        settings.database_path = PathBuf::from(path);
    }
    if let Some(filter) = read(LOG_FILTER_ENV) {
        settings.log_filter = filter;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("tally-settings-does-not-exist.json");
        let settings = load_file_over_defaults(&path).unwrap();
        assert_eq!(settings, LedgerSettings::default());
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let path = std::env::temp_dir().join(format!(
            "tally-settings-merge-{}.json",
            std::process::id()
        ));
        std::fs::write(
            &path,
            r#"{"database_path": "/var/lib/tally/ledger.db", "gateway_query_timeout_ms": null, "gateway_mutation_timeout_ms": 600000}"#,
        )
        .unwrap();

        let settings = load_file_over_defaults(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(settings.database_path, PathBuf::from("/var/lib/tally/ledger.db"));
        assert_eq!(settings.gateway_query_timeout_ms, Some(120_000));
        assert_eq!(settings.gateway_mutation_timeout_ms, Some(600_000));
        assert_eq!(settings.log_filter, "warn");
        assert_eq!(
            settings.timeouts().gateway_mutation,
            Some(Duration::from_secs(600))
        );
    }

    #[test]
    fn invalid_json_is_a_parse_failure() {
        let path = std::env::temp_dir().join(format!(
            "tally-settings-invalid-{}.json",
            std::process::id()
        ));
        std::fs::write(&path, "{ not json").unwrap();
        let error = load_file_over_defaults(&path).unwrap_err();
        let _ = std::fs::remove_file(&path);
        assert_eq!(error.kind, LedgerErrorKind::ParseFailure);
    }

    #[test]
    fn environment_overrides_win_and_ignore_blank_values() {
        let mut settings = LedgerSettings::default();
        apply_overrides(&mut settings, |key| match key {
            DATABASE_PATH_ENV => Some("/tmp/override.db".to_string()),
            LOG_FILTER_ENV => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(settings.database_path, PathBuf::from("/tmp/override.db"));
        assert_eq!(settings.log_filter, "warn");
    }
}
