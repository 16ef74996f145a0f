//! Generic offset pagination over a base `SELECT`.
//!
//! # Invariants
//! - Exactly `page_size + 1` rows are requested; the extra row only decides
//!   `has_more` and is never returned.
//! - Rows follow the resource's deterministic ordering, so walking `next`
//!   cursors visits every matching row once.

use super::cursor::resolve_window;
use super::page::{Ordering, Page, PageBounds, PageRequest};
use crate::db::QueryContext;
use crate::error::{StorageError, StorageResult, StorageResultExt};
use crate::query::{compile, CompiledPredicate, Dialect, FieldPolicy, SqlParam, WhereClause};
use log::{debug, warn};
use rusqlite::{params_from_iter, Connection, Row};
use std::time::Instant;

/// Everything a list call needs to know about one resource.
#[derive(Debug, Clone)]
pub struct ListSource<'a> {
    select: &'a str,
    policy: &'a FieldPolicy,
    ordering: &'a Ordering,
    dialect: Dialect,
    scope: WhereClause,
    bounds: PageBounds,
}

impl<'a> ListSource<'a> {
    /// `select` is a bare `SELECT … FROM …` without `WHERE` or `ORDER BY`.
    pub fn new(select: &'a str, policy: &'a FieldPolicy, ordering: &'a Ordering) -> Self {
        Self {
            select,
            policy,
            ordering,
            dialect: Dialect::Sqlite,
            scope: WhereClause::new(),
            bounds: PageBounds::default(),
        }
    }

    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Adds a predicate every page is restricted to, ahead of the filter.
    pub fn scoped(mut self, predicate: CompiledPredicate) -> Self {
        self.scope.push(predicate);
        self
    }

    pub fn bounds(mut self, bounds: PageBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn resource(&self) -> &str {
        self.policy.resource()
    }
}

/// Fetches one page of `source` and maps each row with `map_row`.
pub fn paginate<T, F>(
    conn: &Connection,
    ctx: &QueryContext,
    source: &ListSource<'_>,
    request: &PageRequest,
    mut map_row: F,
) -> StorageResult<Page<T>>
where
    F: FnMut(&Row<'_>) -> StorageResult<T>,
{
    let started_at = Instant::now();
    let resource = source.resource();
    let window = resolve_window(resource, source.ordering, &source.scope, &source.bounds, request)?;

    let filter = match &window.filter {
        Some(filter) => compile(source.policy, filter, source.dialect)?,
        None => CompiledPredicate::empty(),
    };
    let clause = source.scope.clone().and(filter);
    let sql = format!(
        "{}{} ORDER BY {} LIMIT ? OFFSET ?",
        source.select,
        clause.render(),
        source.ordering.to_sql(window.order)
    );

    let mut params = clause.params().to_vec();
    params.push(SqlParam::Integer(to_sql_integer(window.page_size + 1)?));
    params.push(SqlParam::Integer(to_sql_integer(window.offset)?));

    let context = format!("failed to list {resource}");
    let fetched = ctx.run(conn, &context, || {
        let mut stmt = conn.prepare(&sql).context(&context)?;
        let mut rows = stmt.query(params_from_iter(params.iter())).context(&context)?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().context(&context)? {
            items.push(map_row(row)?);
        }
        Ok(items)
    });

    let mut data = match fetched {
        Ok(data) => data,
        Err(err) => {
            warn!(
                "event=paginate module=pagination status=error resource={} offset={} duration_ms={} error_kind={}",
                resource,
                window.offset,
                started_at.elapsed().as_millis(),
                err.kind()
            );
            return Err(err);
        }
    };

    let page_size = usize::try_from(window.page_size).unwrap_or(usize::MAX);
    let has_more = data.len() > page_size;
    data.truncate(page_size);

    let next = if has_more {
        Some(window.next_cursor(resource).encode()?)
    } else {
        None
    };
    let previous = window
        .previous_cursor(resource)
        .map(|cursor| cursor.encode())
        .transpose()?;

    debug!(
        "event=paginate module=pagination status=ok resource={} offset={} page_size={} rows={} has_more={} duration_ms={}",
        resource,
        window.offset,
        window.page_size,
        data.len(),
        has_more,
        started_at.elapsed().as_millis()
    );

    Ok(Page {
        page_size: window.page_size,
        has_more,
        previous,
        next,
        data,
    })
}

fn to_sql_integer(value: u64) -> StorageResult<i64> {
    i64::try_from(value)
        .map_err(|_| StorageError::validation(format!("page position {value} is out of range")))
}
