//! Entity repositories: thin adapters over the query compiler, the
//! paginator, the error taxonomy, and the field cipher.
//!
//! # Invariants
//! - Every failure is a classified `StorageError`.
//! - Writes validate the record before any SQL is issued.
//! - Every call honours the caller's `QueryContext`.

pub mod account_repo;
pub mod connector_repo;
pub mod open_banking_repo;

pub use account_repo::{AccountRepository, SqliteAccountRepository};
pub use connector_repo::{ConnectorRepository, SqliteConnectorRepository};
pub use open_banking_repo::{OpenBankingRepository, SqliteOpenBankingRepository};
