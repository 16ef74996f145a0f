//! Account repository contracts and SQLite implementation.
//!
//! # Invariants
//! - A batch upsert is all-or-nothing.
//! - An unknown `connector_id` surfaces as a foreign-key violation.

use crate::db::{run_in_transaction, QueryContext};
use crate::error::{StorageError, StorageResult, StorageResultExt};
use crate::model::account::{Account, AccountType};
use crate::pagination::{paginate, ListSource, Ordering, Page, PageBounds, PageRequest, SortOrder};
use crate::query::{FieldPolicy, ValueKind};
use log::info;
use once_cell::sync::Lazy;
use rusqlite::{params, Connection, Row};
use std::collections::BTreeMap;

const ACCOUNT_SELECT_SQL: &str = "SELECT
    id,
    connector_id,
    reference,
    created_at,
    type,
    name,
    default_asset,
    metadata,
    raw
FROM accounts";

const ACCOUNT_CONNECTOR_FK: &str = "accounts_connector_id_fk";

static ACCOUNT_POLICY: Lazy<FieldPolicy> = Lazy::new(|| {
    FieldPolicy::builder("accounts")
        .column("id")
        .column("reference")
        .column("connector_id")
        .column_as("type", "type", ValueKind::String)
        .column("default_asset")
        .column("name")
        .metadata("metadata")
        .build()
        .expect("valid account policy")
});

static ACCOUNT_ORDERING: Lazy<Ordering> =
    Lazy::new(|| Ordering::new("created_at", "sort_id", SortOrder::Desc));

pub trait AccountRepository {
    /// Inserts new accounts and refreshes the mutable fields of known ones.
    fn upsert(&self, ctx: &QueryContext, accounts: &[Account]) -> StorageResult<()>;
    fn get(&self, ctx: &QueryContext, id: &str) -> StorageResult<Account>;
    fn list(&self, ctx: &QueryContext, request: &PageRequest) -> StorageResult<Page<Account>>;
    /// Merges `metadata` into the stored map; existing keys are overwritten.
    fn update_metadata(
        &self,
        ctx: &QueryContext,
        id: &str,
        metadata: &BTreeMap<String, String>,
    ) -> StorageResult<()>;
    /// Returns the number of deleted accounts.
    fn delete_for_connector(&self, ctx: &QueryContext, connector_id: &str) -> StorageResult<usize>;
}

pub struct SqliteAccountRepository<'conn> {
    conn: &'conn Connection,
    bounds: PageBounds,
}

impl<'conn> SqliteAccountRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self {
            conn,
            bounds: PageBounds::default(),
        }
    }

    pub fn with_bounds(mut self, bounds: PageBounds) -> Self {
        self.bounds = bounds;
        self
    }
}

impl AccountRepository for SqliteAccountRepository<'_> {
    fn upsert(&self, ctx: &QueryContext, accounts: &[Account]) -> StorageResult<()> {
        if accounts.is_empty() {
            return Ok(());
        }
        for account in accounts {
            account.validate()?;
        }
        let context = "failed to insert accounts";

        ctx.run(self.conn, context, || {
            run_in_transaction(self.conn, context, |tx| {
                let mut stmt = tx
                    .prepare(
                        "INSERT INTO accounts (
                            id,
                            connector_id,
                            reference,
                            created_at,
                            type,
                            name,
                            default_asset,
                            metadata,
                            raw
                        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                        ON CONFLICT (id) DO UPDATE SET
                            name = excluded.name,
                            default_asset = excluded.default_asset,
                            metadata = excluded.metadata,
                            raw = excluded.raw;",
                    )
                    .context(context)?;
                for account in accounts {
                    stmt.execute(params![
                        account.id,
                        account.connector_id,
                        account.reference,
                        account.created_at,
                        account.kind.as_db(),
                        account.name,
                        account.default_asset,
                        to_json_text(&account.metadata)?,
                        account.raw.as_ref().map(|raw| raw.to_string()),
                    ])
                    .context_fk(context, ACCOUNT_CONNECTOR_FK)?;
                }
                Ok(())
            })
        })?;

        info!(
            "event=accounts_upsert module=repo status=ok count={}",
            accounts.len()
        );
        Ok(())
    }

    fn get(&self, ctx: &QueryContext, id: &str) -> StorageResult<Account> {
        let context = "failed to get account";
        ctx.run(self.conn, context, || {
            let mut stmt = self
                .conn
                .prepare(&format!("{ACCOUNT_SELECT_SQL} WHERE id = ?1"))
                .context(context)?;
            let mut rows = stmt.query(params![id]).context(context)?;
            let row = rows.next().context(context)?;
            match row {
                Some(row) => parse_account_row(row),
                None => Err(StorageError::not_found(context)),
            }
        })
    }

    fn list(&self, ctx: &QueryContext, request: &PageRequest) -> StorageResult<Page<Account>> {
        let source = ListSource::new(ACCOUNT_SELECT_SQL, &ACCOUNT_POLICY, &ACCOUNT_ORDERING)
            .bounds(self.bounds);
        paginate(self.conn, ctx, &source, request, parse_account_row)
    }

    fn update_metadata(
        &self,
        ctx: &QueryContext,
        id: &str,
        metadata: &BTreeMap<String, String>,
    ) -> StorageResult<()> {
        let context = "failed to update account metadata";
        let patch = to_json_text(metadata)?;
        let changed = ctx.run(self.conn, context, || {
            self.conn
                .execute(
                    "UPDATE accounts SET metadata = json_patch(metadata, ?1) WHERE id = ?2;",
                    params![patch, id],
                )
                .context(context)
        })?;
        if changed == 0 {
            return Err(StorageError::not_found("account not found"));
        }
        Ok(())
    }

    fn delete_for_connector(&self, ctx: &QueryContext, connector_id: &str) -> StorageResult<usize> {
        let context = "failed to delete account";
        ctx.run(self.conn, context, || {
            self.conn
                .execute(
                    "DELETE FROM accounts WHERE connector_id = ?1;",
                    params![connector_id],
                )
                .context(context)
        })
    }
}

fn parse_account_row(row: &Row<'_>) -> StorageResult<Account> {
    let context = "failed to read account";
    let kind: String = row.get(4).context(context)?;
    let kind = AccountType::parse(&kind).ok_or_else(|| {
        StorageError::unknown(context, format!("invalid persisted account type `{kind}`"))
    })?;
    let metadata: String = row.get(7).context(context)?;
    let raw: Option<String> = row.get(8).context(context)?;

    Ok(Account {
        id: row.get(0).context(context)?,
        connector_id: row.get(1).context(context)?,
        reference: row.get(2).context(context)?,
        created_at: row.get(3).context(context)?,
        kind,
        name: row.get(5).context(context)?,
        default_asset: row.get(6).context(context)?,
        metadata: serde_json::from_str(&metadata)
            .map_err(|err| StorageError::unknown(context, err))?,
        raw: raw
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|err| StorageError::unknown(context, err))?,
    })
}

pub(crate) fn to_json_text(metadata: &BTreeMap<String, String>) -> StorageResult<String> {
    serde_json::to_string(metadata).map_err(|err| StorageError::unknown("failed to encode metadata", err))
}
