//! Connector repository contracts and SQLite implementation.
//!
//! # Invariants
//! - `config` is written encrypted in the same transaction as the row.
//! - Reads always return the decrypted config.

use crate::crypto::{EncryptedBlob, FieldCipher};
use crate::db::{run_in_transaction, QueryContext};
use crate::error::{StorageError, StorageResult, StorageResultExt};
use crate::model::connector::{normalize_provider, Connector};
use crate::pagination::{paginate, ListSource, Ordering, Page, PageBounds, PageRequest, SortOrder};
use crate::query::{FieldPolicy, ValueKind};
use log::info;
use once_cell::sync::Lazy;
use rusqlite::{params, Connection, Row};
use serde_json::value::RawValue;

const CONNECTOR_SELECT_SQL: &str = "SELECT
    id,
    name,
    provider,
    created_at,
    scheduled_for_deletion,
    config
FROM connectors";

static CONNECTOR_POLICY: Lazy<FieldPolicy> = Lazy::new(|| {
    FieldPolicy::builder("connectors")
        .column("id")
        .column("name")
        .column_normalized("provider", "provider", ValueKind::String, normalize_provider)
        .build()
        .expect("valid connector policy")
});

static CONNECTOR_ORDERING: Lazy<Ordering> =
    Lazy::new(|| Ordering::new("created_at", "sort_id", SortOrder::Desc));

pub trait ConnectorRepository {
    /// Inserts the connector unless its id exists, then stores its config.
    fn install(&self, ctx: &QueryContext, connector: &Connector) -> StorageResult<()>;
    fn update_config(
        &self,
        ctx: &QueryContext,
        id: &str,
        name: &str,
        config: &RawValue,
    ) -> StorageResult<()>;
    fn get(&self, ctx: &QueryContext, id: &str) -> StorageResult<Connector>;
    fn list(&self, ctx: &QueryContext, request: &PageRequest) -> StorageResult<Page<Connector>>;
    fn schedule_for_deletion(&self, ctx: &QueryContext, id: &str) -> StorageResult<()>;
    /// Removes the connector and, by cascade, everything it owns.
    fn uninstall(&self, ctx: &QueryContext, id: &str) -> StorageResult<()>;
}

pub struct SqliteConnectorRepository<'conn> {
    conn: &'conn Connection,
    cipher: FieldCipher,
    bounds: PageBounds,
}

impl<'conn> SqliteConnectorRepository<'conn> {
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

    fn parse_row(&self, row: &Row<'_>) -> StorageResult<Connector> {
        let context = "failed to read connector";
        let blob: EncryptedBlob = row.get(5).context(context)?;
        Ok(Connector {
            id: row.get(0).context(context)?,
            name: row.get(1).context(context)?,
            provider: row.get(2).context(context)?,
            created_at: row.get(3).context(context)?,
            scheduled_for_deletion: row.get::<_, i64>(4).context(context)? != 0,
            config: self.cipher.decrypt(self.conn, &blob)?,
        })
    }
}

impl ConnectorRepository for SqliteConnectorRepository<'_> {
    fn install(&self, ctx: &QueryContext, connector: &Connector) -> StorageResult<()> {
        connector.validate()?;
        let context = "failed to install connector";

        ctx.run(self.conn, context, || {
            run_in_transaction(self.conn, context, |tx| {
                tx.execute(
                    "INSERT INTO connectors (id, name, provider, created_at, scheduled_for_deletion)
                     VALUES (?1, ?2, ?3, ?4, 0)
                     ON CONFLICT (id) DO NOTHING;",
                    params![
                        connector.id,
                        connector.name,
                        normalize_provider(&connector.provider),
                        connector.created_at,
                    ],
                )
                .context("failed to insert connector")?;

                let config = self.cipher.encrypt(tx, &connector.config)?;
                tx.execute(
                    "UPDATE connectors SET config = ?1 WHERE id = ?2;",
                    params![config, connector.id],
                )
                .context("failed to encrypt config")?;
                Ok(())
            })
        })?;

        info!(
            "event=connector_install module=repo status=ok provider={}",
            normalize_provider(&connector.provider)
        );
        Ok(())
    }

    fn update_config(
        &self,
        ctx: &QueryContext,
        id: &str,
        name: &str,
        config: &RawValue,
    ) -> StorageResult<()> {
        if name.trim().is_empty() {
            return Err(StorageError::validation("connector name cannot be empty"));
        }
        let context = "failed to update connector config";

        ctx.run(self.conn, context, || {
            run_in_transaction(self.conn, context, |tx| {
                let config = self.cipher.encrypt(tx, config)?;
                let changed = tx
                    .execute(
                        "UPDATE connectors SET name = ?1, config = ?2 WHERE id = ?3;",
                        params![name, config, id],
                    )
                    .context(context)?;
                if changed == 0 {
                    return Err(StorageError::not_found("connector not found"));
                }
                Ok(())
            })
        })
    }

    fn get(&self, ctx: &QueryContext, id: &str) -> StorageResult<Connector> {
        let context = "failed to fetch connector";
        ctx.run(self.conn, context, || {
            let mut stmt = self
                .conn
                .prepare(&format!("{CONNECTOR_SELECT_SQL} WHERE id = ?1"))
                .context(context)?;
            let mut rows = stmt.query(params![id]).context(context)?;
            let row = rows.next().context(context)?;
            match row {
                Some(row) => self.parse_row(row),
                None => Err(StorageError::not_found(context)),
            }
        })
    }

    fn list(&self, ctx: &QueryContext, request: &PageRequest) -> StorageResult<Page<Connector>> {
        let source = ListSource::new(CONNECTOR_SELECT_SQL, &CONNECTOR_POLICY, &CONNECTOR_ORDERING)
            .bounds(self.bounds);
        paginate(self.conn, ctx, &source, request, |row| self.parse_row(row))
    }

    fn schedule_for_deletion(&self, ctx: &QueryContext, id: &str) -> StorageResult<()> {
        let context = "failed to schedule connector for deletion";
        let changed = ctx.run(self.conn, context, || {
            self.conn
                .execute(
                    "UPDATE connectors SET scheduled_for_deletion = 1 WHERE id = ?1;",
                    params![id],
                )
                .context(context)
        })?;
        if changed == 0 {
            return Err(StorageError::not_found("connector not found"));
        }
        Ok(())
    }

    fn uninstall(&self, ctx: &QueryContext, id: &str) -> StorageResult<()> {
        let context = "failed to delete connector";
        ctx.run(self.conn, context, || {
            self.conn
                .execute("DELETE FROM connectors WHERE id = ?1;", params![id])
                .context(context)
        })?;
        info!("event=connector_uninstall module=repo status=ok");
        Ok(())
    }
}
