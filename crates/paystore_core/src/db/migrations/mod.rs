//! Schema migration registry and executor.
//!
//! # Invariants
//! - `version` values are strictly increasing.
//! - The applied version is mirrored to `PRAGMA user_version`.
//! - Pending migrations apply in one transaction: all or none.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::Connection;
use std::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "connectors",
        sql: include_str!("0001_connectors.sql"),
    },
    Migration {
        version: 2,
        name: "accounts",
        sql: include_str!("0002_accounts.sql"),
    },
    Migration {
        version: 3,
        name: "open_banking",
        sql: include_str!("0003_open_banking.sql"),
    },
];

/// Outcome of one [`apply_migrations`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationReport {
    pub from_version: u32,
    pub to_version: u32,
}

impl MigrationReport {
    pub fn applied(&self) -> u32 {
        self.to_version - self.from_version
    }
}

/// Latest schema version this binary knows.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

pub fn current_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}

/// Applies all pending migrations.
///
/// # Errors
/// - [`DbError::UnsupportedSchemaVersion`] when the file was written by a
///   newer binary.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<MigrationReport> {
    let from_version = current_version(conn)?;
    let latest = latest_version();

    if from_version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: from_version,
            latest_supported: latest,
        });
    }

    if from_version < latest {
        let started_at = Instant::now();
        let tx = conn.transaction()?;
        for migration in MIGRATIONS.iter().filter(|m| m.version > from_version) {
            tx.execute_batch(migration.sql)?;
            tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
            info!(
                "event=db_migrate module=db status=applied version={} name={}",
                migration.version, migration.name
            );
        }
        tx.commit()?;
        info!(
            "event=db_migrate module=db status=ok from_version={} to_version={} duration_ms={}",
            from_version,
            latest,
            started_at.elapsed().as_millis()
        );
    }

    Ok(MigrationReport {
        from_version,
        to_version: latest,
    })
}
