//! Data-access core of the payments store.
//!
//! Filter compilation, cursor pagination, driver-error classification, and
//! field-level encryption, plus the entity repositories built on them.

pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod pagination;
pub mod query;
pub mod repo;

pub use config::StoreConfig;
pub use crypto::{CipherEngine, EncryptedBlob, EncryptionKey, FieldCipher};
pub use db::{open_db, open_db_in_memory, open_db_with_config, QueryContext};
pub use error::{ErrorKind, StorageError, StorageResult};
pub use logging::{default_log_level, init_from_config, init_logging, logging_status};
pub use pagination::{Page, PageRequest, SortOrder};
pub use query::{Dialect, Filter, FilterClause};

/// Liveness probe.
pub fn ping() -> &'static str {
    "pong"
}

/// Core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
