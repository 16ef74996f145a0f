//! Payments domain records persisted by the repositories.
//!
//! # Invariants
//! - Timestamps are Unix epoch milliseconds.
//! - Secrets (connector config, access tokens) never derive a revealing
//!   `Debug`.

pub mod account;
pub mod connector;
pub mod open_banking;

use crate::error::{StorageError, StorageResult};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current time in Unix epoch milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> StorageResult<()> {
    if value.trim().is_empty() {
        return Err(StorageError::validation(format!("{field} cannot be empty")));
    }
    Ok(())
}
