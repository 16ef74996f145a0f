//! Bundled-engine side of the error taxonomy seam, query contexts, and
//! transactions.
//!
//! # Invariants
//! - A finished query context never issues SQL.
//! - A failed transaction step rolls back before the error is returned.

use crate::error::{Cancelled, DriverError, DriverFailure, StorageError, StorageResult, StorageResultExt};
use log::warn;
use rusqlite::{ffi, Connection, ErrorCode, Transaction, TransactionBehavior};
use std::os::raw::c_int;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// Virtual machine steps between two deadline checks.
const PROGRESS_STEPS: c_int = 1_000;

impl DriverError for rusqlite::Error {
    fn failure(&self) -> DriverFailure {
        match self {
            rusqlite::Error::QueryReturnedNoRows => DriverFailure::NoRows,
            rusqlite::Error::SqliteFailure(err, message) => match err.extended_code {
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    DriverFailure::UniqueViolation {
                        constraint: constraint_from_message(message.as_deref()),
                    }
                }
                ffi::SQLITE_CONSTRAINT_FOREIGNKEY => DriverFailure::ForeignKeyViolation {
                    constraint: constraint_from_message(message.as_deref()),
                },
                _ if err.code == ErrorCode::OperationInterrupted => DriverFailure::Cancelled,
                _ => DriverFailure::Other,
            },
            _ => DriverFailure::Other,
        }
    }
}

// "UNIQUE constraint failed: accounts.id" names the violated columns;
// foreign-key failures carry no name at all.
fn constraint_from_message(message: Option<&str>) -> Option<String> {
    let (_, detail) = message?.split_once("constraint failed: ")?;
    let detail = detail.trim();
    (!detail.is_empty()).then(|| detail.to_string())
}

/// Caller-supplied deadline and cancellation for one database call.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    deadline: Option<Instant>,
    cancelled: Option<Arc<AtomicBool>>,
}

impl QueryContext {
    /// Context that never expires.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Cancels once `flag` is set to `true` from any thread.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = Some(flag);
        self
    }

    pub fn is_done(&self) -> bool {
        let expired = self
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline);
        let cancelled = self
            .cancelled
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed));
        expired || cancelled
    }

    /// Runs `op` on `conn`, interrupting the in-flight statement once the
    /// context is done.
    pub fn run<T>(
        &self,
        conn: &Connection,
        context: &str,
        op: impl FnOnce() -> StorageResult<T>,
    ) -> StorageResult<T> {
        if self.is_done() {
            return Err(StorageError::unknown(
                context,
                Cancelled::new("query context finished before the call"),
            ));
        }
        if self.deadline.is_none() && self.cancelled.is_none() {
            return op();
        }

        let watched = self.clone();
        conn.progress_handler(PROGRESS_STEPS, Some(move || watched.is_done()));
        let result = op();
        conn.progress_handler(0, None::<fn() -> bool>);
        result
    }
}

/// Runs `op` inside an immediate transaction.
///
/// Commits when `op` succeeds; rolls back explicitly and returns the step's
/// error otherwise.
pub fn run_in_transaction<T>(
    conn: &Connection,
    context: &str,
    op: impl FnOnce(&Transaction<'_>) -> StorageResult<T>,
) -> StorageResult<T> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .context("cannot begin transaction")?;

    match op(&tx) {
        Ok(value) => {
            tx.commit().context(context)?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback() {
                warn!(
                    "event=tx_rollback module=db status=error context=\"{}\" error={}",
                    context, rollback_err
                );
            }
            Err(err)
        }
    }
}
