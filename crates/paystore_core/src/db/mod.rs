//! Engine bootstrap, schema migrations, and the engine side of the
//! storage seams.
//!
//! # Responsibility
//! - Open and configure connections for the payments store.
//! - Apply schema migrations in deterministic order.
//! - Register the encryption and JSON containment SQL functions.
//!
//! # Invariants
//! - The schema version is tracked via `PRAGMA user_version`.
//! - No application data is read or written before migrations succeed.

use crate::error::StorageError;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod cipher;
mod driver;
pub mod functions;
pub mod migrations;
mod open;

pub use cipher::CipherError;
pub use driver::{run_in_transaction, QueryContext};
pub use open::{open_db, open_db_in_memory, open_db_with_config, DEFAULT_BUSY_TIMEOUT};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<DbError> for StorageError {
    fn from(value: DbError) -> Self {
        StorageError::unknown("failed to open database", value)
    }
}
