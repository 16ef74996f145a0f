//! Open-banking connection repository contracts and SQLite implementation.
//!
//! # Invariants
//! - A connection and its access token are written in one transaction.
//! - The token is stored encrypted and returned decrypted.
//! - Listing is always scoped to one connector.

use super::account_repo::to_json_text;
use crate::crypto::{EncryptedBlob, FieldCipher};
use crate::db::{run_in_transaction, QueryContext};
use crate::error::{StorageError, StorageResult, StorageResultExt};
use crate::model::open_banking::{AccessToken, ConnectionStatus, OpenBankingConnection};
use crate::pagination::{paginate, ListSource, Ordering, Page, PageBounds, PageRequest, SortOrder};
use crate::query::{CompiledPredicate, FieldPolicy, SqlParam, ValueKind};
use once_cell::sync::Lazy;
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

const CONNECTION_SELECT_SQL: &str = "SELECT
    connection_id,
    connector_id,
    psu_id,
    created_at,
    updated_at,
    status,
    error,
    metadata
FROM open_banking_connections";

const CONNECTION_CONNECTOR_FK: &str = "open_banking_connections_connector_id_fk";
const TOKEN_CONNECTION_FK: &str = "open_banking_access_tokens_connection_id_fk";

static CONNECTION_POLICY: Lazy<FieldPolicy> = Lazy::new(|| {
    FieldPolicy::builder("open_banking_connections")
        .column("connection_id")
        .column_as("status", "status", ValueKind::String)
        .metadata("metadata")
        .build()
        .expect("valid open banking connection policy")
});

static CONNECTION_ORDERING: Lazy<Ordering> =
    Lazy::new(|| Ordering::new("created_at", "sort_id", SortOrder::Desc));

pub trait OpenBankingRepository {
    /// Inserts or refreshes the connection; a present `access_token`
    /// replaces the stored one.
    fn upsert_connection(
        &self,
        ctx: &QueryContext,
        connection: &OpenBankingConnection,
    ) -> StorageResult<()>;
    fn get_connection(
        &self,
        ctx: &QueryContext,
        connector_id: &str,
        connection_id: &str,
    ) -> StorageResult<OpenBankingConnection>;
    fn list_connections(
        &self,
        ctx: &QueryContext,
        connector_id: &str,
        request: &PageRequest,
    ) -> StorageResult<Page<OpenBankingConnection>>;
    fn delete_connection(
        &self,
        ctx: &QueryContext,
        connector_id: &str,
        connection_id: &str,
    ) -> StorageResult<()>;
}

pub struct SqliteOpenBankingRepository<'conn> {
    conn: &'conn Connection,
    cipher: FieldCipher,
    bounds: PageBounds,
}

impl<'conn> SqliteOpenBankingRepository<'conn> {
    pub fn new(conn: &'conn Connection, cipher: FieldCipher) -> Self {
        Self {
            conn,
            cipher,
            bounds: PageBounds::default(),
        }
    }

    pub fn with_bounds(mut self, bounds: PageBounds) -> Self {
        self.bounds = bounds;
        self
    }

    fn fetch_token(
        &self,
        connector_id: &str,
        connection_id: &str,
    ) -> StorageResult<Option<AccessToken>> {
        let context = "failed to fetch access token";
        let mut stmt = self
            .conn
            .prepare(
                "SELECT token, created_at, expires_at
                 FROM open_banking_access_tokens
                 WHERE connector_id = ?1 AND connection_id = ?2",
            )
            .context(context)?;
        let mut rows = stmt
            .query(params![connector_id, connection_id])
            .context(context)?;
        let Some(row) = rows.next().context(context)? else {
            return Ok(None);
        };

        let blob: EncryptedBlob = row.get(0).context(context)?;
        Ok(Some(AccessToken {
            token: self.cipher.decrypt_value(self.conn, &blob)?,
            created_at: row.get(1).context(context)?,
            expires_at: row.get(2).context(context)?,
        }))
    }
}

impl OpenBankingRepository for SqliteOpenBankingRepository<'_> {
    fn upsert_connection(
        &self,
        ctx: &QueryContext,
        connection: &OpenBankingConnection,
    ) -> StorageResult<()> {
        connection.validate()?;
        let context = "failed to upsert open banking connection";
        let metadata = to_json_text(&connection.metadata)?;

        ctx.run(self.conn, context, || {
            run_in_transaction(self.conn, context, |tx| {
                tx.execute(
                    "INSERT INTO open_banking_connections (
                        connection_id,
                        connector_id,
                        psu_id,
                        created_at,
                        updated_at,
                        status,
                        error,
                        metadata
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    ON CONFLICT (connection_id, connector_id) DO UPDATE SET
                        updated_at = excluded.updated_at,
                        status = excluded.status,
                        error = excluded.error,
                        metadata = excluded.metadata;",
                    params![
                        connection.connection_id,
                        connection.connector_id,
                        connection.psu_id.to_string(),
                        connection.created_at,
                        connection.updated_at,
                        connection.status.as_db(),
                        connection.error,
                        metadata,
                    ],
                )
                .context_fk(
                    "failed to insert open banking connection",
                    CONNECTION_CONNECTOR_FK,
                )?;

                let Some(token) = &connection.access_token else {
                    return Ok(());
                };
                let sealed = self.cipher.encrypt_value(tx, &token.token)?;
                tx.execute(
                    "INSERT INTO open_banking_access_tokens (
                        connection_id,
                        connector_id,
                        created_at,
                        expires_at,
                        token
                    ) VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT (connection_id, connector_id) DO UPDATE SET
                        created_at = excluded.created_at,
                        expires_at = excluded.expires_at,
                        token = excluded.token;",
                    params![
                        connection.connection_id,
                        connection.connector_id,
                        token.created_at,
                        token.expires_at,
                        sealed,
                    ],
                )
                .context_fk("failed to insert access token", TOKEN_CONNECTION_FK)?;
                Ok(())
            })
        })
    }

    fn get_connection(
        &self,
        ctx: &QueryContext,
        connector_id: &str,
        connection_id: &str,
    ) -> StorageResult<OpenBankingConnection> {
        let context = "failed to get open banking connection";
        ctx.run(self.conn, context, || {
            let mut connection = {
                let mut stmt = self
                    .conn
                    .prepare(&format!(
                        "{CONNECTION_SELECT_SQL} WHERE connector_id = ?1 AND connection_id = ?2"
                    ))
                    .context(context)?;
                let mut rows = stmt
                    .query(params![connector_id, connection_id])
                    .context(context)?;
                let row = rows.next().context(context)?;
                match row {
                    Some(row) => parse_connection_row(row)?,
                    None => return Err(StorageError::not_found(context)),
                }
            };
            connection.access_token = self.fetch_token(connector_id, connection_id)?;
            Ok(connection)
        })
    }

    fn list_connections(
        &self,
        ctx: &QueryContext,
        connector_id: &str,
        request: &PageRequest,
    ) -> StorageResult<Page<OpenBankingConnection>> {
        let source = ListSource::new(CONNECTION_SELECT_SQL, &CONNECTION_POLICY, &CONNECTION_ORDERING)
            .scoped(CompiledPredicate::new(
                "connector_id = ?",
                vec![SqlParam::from(connector_id)],
            ))
            .bounds(self.bounds);
        paginate(self.conn, ctx, &source, request, parse_connection_row)
    }

    fn delete_connection(
        &self,
        ctx: &QueryContext,
        connector_id: &str,
        connection_id: &str,
    ) -> StorageResult<()> {
        let context = "failed to delete open banking connection";
        ctx.run(self.conn, context, || {
            self.conn
                .execute(
                    "DELETE FROM open_banking_connections
                     WHERE connector_id = ?1 AND connection_id = ?2;",
                    params![connector_id, connection_id],
                )
                .context(context)
        })?;
        Ok(())
    }
}

fn parse_connection_row(row: &Row<'_>) -> StorageResult<OpenBankingConnection> {
    let context = "failed to read open banking connection";
    let psu_id: String = row.get(2).context(context)?;
    let status: String = row.get(5).context(context)?;
    let metadata: String = row.get(7).context(context)?;

    Ok(OpenBankingConnection {
        connection_id: row.get(0).context(context)?,
        connector_id: row.get(1).context(context)?,
        psu_id: Uuid::parse_str(&psu_id).map_err(|err| StorageError::unknown(context, err))?,
        created_at: row.get(3).context(context)?,
        updated_at: row.get(4).context(context)?,
        status: ConnectionStatus::parse(&status).ok_or_else(|| {
            StorageError::unknown(context, format!("invalid persisted status `{status}`"))
        })?,
        error: row.get(6).context(context)?,
        metadata: serde_json::from_str(&metadata)
            .map_err(|err| StorageError::unknown(context, err))?,
        access_token: None,
    })
}
