//! Store configuration.
//!
//! # Invariants
//! - A config that passed [`StoreConfig::validate`] opens a usable store.
//! - The encryption key never shows up in `Debug` output.

use crate::crypto::EncryptionKey;
use crate::error::{StorageError, StorageResult};
use crate::logging::default_log_level;
use crate::pagination::{PageBounds, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_DATABASE_PATH: &str = "PAYSTORE_DATABASE_PATH";
pub const ENV_ENCRYPTION_KEY: &str = "PAYSTORE_ENCRYPTION_KEY";
pub const ENV_DEFAULT_PAGE_SIZE: &str = "PAYSTORE_DEFAULT_PAGE_SIZE";
pub const ENV_MAX_PAGE_SIZE: &str = "PAYSTORE_MAX_PAGE_SIZE";
pub const ENV_BUSY_TIMEOUT_MS: &str = "PAYSTORE_BUSY_TIMEOUT_MS";
pub const ENV_LOG_LEVEL: &str = "PAYSTORE_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "PAYSTORE_LOG_DIR";

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    pub database_path: PathBuf,
    pub encryption_key: EncryptionKey,
    #[serde(default = "default_page_size")]
    pub default_page_size: u64,
    #[serde(default = "max_page_size")]
    pub max_page_size: u64,
    #[serde(default = "busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default = "log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_page_size() -> u64 {
    DEFAULT_PAGE_SIZE
}

fn max_page_size() -> u64 {
    MAX_PAGE_SIZE
}

fn busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

fn log_level() -> String {
    default_log_level().to_string()
}

impl StoreConfig {
    pub fn new(database_path: impl Into<PathBuf>, encryption_key: EncryptionKey) -> Self {
        Self {
            database_path: database_path.into(),
            encryption_key,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            log_level: log_level(),
            log_dir: None,
        }
    }

    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> StorageResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| StorageError::validation(format!("invalid store config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `PAYSTORE_*` variables; unset optional ones keep their defaults.
    pub fn from_env() -> StorageResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> StorageResult<Self> {
        let required = |name: &str| {
            lookup(name)
                .ok_or_else(|| StorageError::validation(format!("{name} must be set")))
        };
        let number = |name: &str, fallback: u64| -> StorageResult<u64> {
            match lookup(name) {
                None => Ok(fallback),
                Some(raw) => raw.trim().parse().map_err(|_| {
                    StorageError::validation(format!("{name} must be a non-negative integer"))
                }),
            }
        };

        let config = Self {
            database_path: PathBuf::from(required(ENV_DATABASE_PATH)?),
            encryption_key: EncryptionKey::new(required(ENV_ENCRYPTION_KEY)?)?,
            default_page_size: number(ENV_DEFAULT_PAGE_SIZE, DEFAULT_PAGE_SIZE)?,
            max_page_size: number(ENV_MAX_PAGE_SIZE, MAX_PAGE_SIZE)?,
            busy_timeout_ms: number(ENV_BUSY_TIMEOUT_MS, DEFAULT_BUSY_TIMEOUT_MS)?,
            log_level: lookup(ENV_LOG_LEVEL).unwrap_or_else(log_level),
            log_dir: lookup(ENV_LOG_DIR).map(PathBuf::from),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> StorageResult<()> {
        if self.encryption_key.is_empty() {
            return Err(StorageError::validation("encryptionKey cannot be empty"));
        }
        if self.database_path.as_os_str().is_empty() {
            return Err(StorageError::validation("databasePath cannot be empty"));
        }
        if self.default_page_size == 0 || self.max_page_size == 0 {
            return Err(StorageError::validation("page size bounds must be positive"));
        }
        if self.default_page_size > self.max_page_size {
            return Err(StorageError::validation(
                "defaultPageSize cannot exceed maxPageSize",
            ));
        }
        if let Some(dir) = &self.log_dir {
            if !dir.is_absolute() {
                return Err(StorageError::validation(format!(
                    "logDir must be an absolute path, got `{}`",
                    dir.display()
                )));
            }
        }
        Ok(())
    }

    pub fn page_bounds(&self) -> PageBounds {
        PageBounds {
            default_page_size: self.default_page_size,
            max_page_size: self.max_page_size,
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn json_fills_defaults_and_redacts_key() {
        let config = StoreConfig::from_json_str(
            r#"{"databasePath": "/var/lib/paystore.db", "encryptionKey": "k1"}"#,
        )
        .unwrap();
        assert_eq!(config.default_page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.max_page_size, MAX_PAGE_SIZE);
        assert_eq!(config.busy_timeout(), Duration::from_secs(5));
        assert!(!format!("{config:?}").contains("k1"));
    }

    #[test]
    fn validate_rejects_bad_bounds_key_and_log_dir() {
        for json in [
            r#"{"databasePath": "a.db", "encryptionKey": ""}"#,
            r#"{"databasePath": "a.db", "encryptionKey": "k", "maxPageSize": 0}"#,
            r#"{"databasePath": "a.db", "encryptionKey": "k", "defaultPageSize": 50, "maxPageSize": 10}"#,
            r#"{"databasePath": "a.db", "encryptionKey": "k", "logDir": "logs"}"#,
            r#"{"databasePath": "a.db"}"#,
        ] {
            assert!(StoreConfig::from_json_str(json).is_err(), "{json}");
        }
    }

    #[test]
    fn env_lookup_parses_numbers() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_DATABASE_PATH, "/tmp/paystore.db"),
            (ENV_ENCRYPTION_KEY, "k1"),
            (ENV_MAX_PAGE_SIZE, "50"),
        ]);
        let config = StoreConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(config.page_bounds().max_page_size, 50);

        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_DATABASE_PATH, "/tmp/paystore.db"),
            (ENV_ENCRYPTION_KEY, "k1"),
            (ENV_BUSY_TIMEOUT_MS, "soon"),
        ]);
        assert!(StoreConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string())).is_err());
    }
}
