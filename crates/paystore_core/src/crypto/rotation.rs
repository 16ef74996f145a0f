//! Re-encryption of stored columns under a new key.

use super::{EncryptedBlob, FieldCipher};
use crate::db::run_in_transaction;
use crate::error::{StorageError, StorageResult, StorageResultExt};
use crate::query::policy::is_identifier;
use log::info;
use rusqlite::types::Value;
use rusqlite::{params, Connection};
use std::time::Instant;

/// One encrypted column and the column that addresses its rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptedColumn {
    pub table: &'static str,
    pub id_column: &'static str,
    pub blob_column: &'static str,
}

/// Every column the schema stores encrypted.
pub const ENCRYPTED_COLUMNS: &[EncryptedColumn] = &[
    EncryptedColumn {
        table: "connectors",
        id_column: "id",
        blob_column: "config",
    },
    EncryptedColumn {
        table: "open_banking_access_tokens",
        id_column: "rowid",
        blob_column: "token",
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRotation {
    pub table: &'static str,
    pub blob_column: &'static str,
    pub rows: usize,
}

/// Re-encrypts every non-null value of one column in one transaction.
///
/// Returns the number of rows rewritten.
pub fn rotate_column(
    conn: &Connection,
    table: &str,
    id_column: &str,
    blob_column: &str,
    old: &FieldCipher,
    new: &FieldCipher,
) -> StorageResult<usize> {
    run_in_transaction(conn, "failed to rotate encryption key", |tx| {
        rewrite_column(tx, table, id_column, blob_column, old, new)
    })
}

/// Re-encrypts every column of [`ENCRYPTED_COLUMNS`] in one transaction.
pub fn rotate_all(
    conn: &Connection,
    old: &FieldCipher,
    new: &FieldCipher,
) -> StorageResult<Vec<ColumnRotation>> {
    run_in_transaction(conn, "failed to rotate encryption key", |tx| {
        ENCRYPTED_COLUMNS
            .iter()
            .map(|column| {
                let rows = rewrite_column(
                    tx,
                    column.table,
                    column.id_column,
                    column.blob_column,
                    old,
                    new,
                )?;
                Ok(ColumnRotation {
                    table: column.table,
                    blob_column: column.blob_column,
                    rows,
                })
            })
            .collect()
    })
}

fn rewrite_column(
    conn: &Connection,
    table: &str,
    id_column: &str,
    blob_column: &str,
    old: &FieldCipher,
    new: &FieldCipher,
) -> StorageResult<usize> {
    for name in [table, id_column, blob_column] {
        if !is_identifier(name) {
            return Err(StorageError::validation(format!(
                "'{name}' is not a valid identifier"
            )));
        }
    }

    let started_at = Instant::now();
    let context = format!("failed to rotate {table}.{blob_column}");
    let rows: Vec<(Value, EncryptedBlob)> = {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {id_column}, {blob_column} FROM {table} WHERE {blob_column} IS NOT NULL"
            ))
            .context(&context)?;
        let mapped = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .context(&context)?;
        mapped
            .collect::<Result<Vec<_>, _>>()
            .context(&context)?
    };

    let update = format!("UPDATE {table} SET {blob_column} = ?1 WHERE {id_column} = ?2");
    for (id, blob) in &rows {
        let plaintext = old.decrypt(conn, blob)?;
        let rotated = new.encrypt(conn, &plaintext)?;
        conn.execute(&update, params![rotated, id]).context(&context)?;
    }

    info!(
        "event=key_rotation module=crypto status=ok table={} column={} rows={} duration_ms={}",
        table,
        blob_column,
        rows.len(),
        started_at.elapsed().as_millis()
    );
    Ok(rows.len())
}
