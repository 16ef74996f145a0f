//! Filter → parameterized SQL predicate compiler.
//!
//! # Responsibility
//! - Validate every clause against the resource field policy.
//! - Render plain equality and metadata containment predicates.
//! - Combine predicates without dangling boundaries.
//!
//! # Invariants
//! - Compilation is a pure function of (policy, filter, dialect).
//! - The fragment holds exactly one `?` per bound parameter, in order.
//! - No caller-supplied value is ever spliced into the SQL text.

use super::filter::{Filter, FilterClause, MATCH_OPERATOR};
use super::policy::{FieldPolicy, FieldRule};
use crate::error::{StorageError, StorageResult};
use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::ToSql;
use serde::Serialize;
use serde_json::{Map, Value};

/// SQL flavour of the rendered containment predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// `metadata @> ?`
    #[default]
    Postgres,
    /// `json_contains(metadata, ?)`, backed by the engine function
    /// registered at connection bootstrap.
    Sqlite,
}

impl Dialect {
    fn containment(self, column: &str) -> String {
        match self {
            Self::Postgres => format!("{column} @> ?"),
            Self::Sqlite => format!("json_contains({column}, ?)"),
        }
    }
}

/// Value bound to one placeholder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Json(Value),
}

impl SqlParam {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(flag) => Self::Bool(*flag),
            Value::Number(number) => match number.as_i64() {
                Some(integer) => Self::Integer(integer),
                None => Self::Real(number.as_f64().unwrap_or_default()),
            },
            Value::String(text) => Self::Text(text.clone()),
            Value::Array(_) | Value::Object(_) => Self::Json(value.clone()),
        }
    }
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for SqlParam {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl ToSql for SqlParam {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(SqlValue::Null),
            Self::Bool(flag) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*flag))),
            Self::Integer(integer) => ToSqlOutput::Owned(SqlValue::Integer(*integer)),
            Self::Real(real) => ToSqlOutput::Owned(SqlValue::Real(*real)),
            Self::Text(text) => ToSqlOutput::Borrowed(ValueRef::Text(text.as_bytes())),
            Self::Json(value) => ToSqlOutput::Owned(SqlValue::Text(value.to_string())),
        })
    }
}

/// `WHERE` clause body (no leading `WHERE`) plus its bound parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompiledPredicate {
    sql: String,
    params: Vec<SqlParam>,
}

impl CompiledPredicate {
    /// Caller-written predicate, typically tenant or parent scoping.
    pub fn new(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        let predicate = Self {
            sql: sql.into(),
            params,
        };
        debug_assert_eq!(predicate.placeholder_count(), predicate.params.len());
        predicate
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }

    pub fn into_parts(self) -> (String, Vec<SqlParam>) {
        (self.sql, self.params)
    }

    /// Counts `?` markers outside quoted literals and identifiers.
    pub fn placeholder_count(&self) -> usize {
        let mut count = 0;
        let mut quote: Option<char> = None;
        for ch in self.sql.chars() {
            match (quote, ch) {
                (None, '\'' | '"') => quote = Some(ch),
                (Some(open), _) if ch == open => quote = None,
                (None, '?') => count += 1,
                _ => {}
            }
        }
        count
    }
}

/// Compiles `filter` against `policy`.
///
/// An empty filter yields an empty predicate.
pub fn compile(
    policy: &FieldPolicy,
    filter: &Filter,
    dialect: Dialect,
) -> StorageResult<CompiledPredicate> {
    Ok(compile_node(policy, filter, dialect)?.unwrap_or_default())
}

fn compile_node(
    policy: &FieldPolicy,
    filter: &Filter,
    dialect: Dialect,
) -> StorageResult<Option<CompiledPredicate>> {
    match filter {
        Filter::Clause(clause) => compile_clause(policy, clause, dialect).map(Some),
        Filter::And(items) => combine(policy, items, Junction::And, dialect),
        Filter::Or(items) => combine(policy, items, Junction::Or, dialect),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Junction {
    And,
    Or,
}

impl Junction {
    fn separator(self) -> &'static str {
        match self {
            Self::And => " AND ",
            Self::Or => " OR ",
        }
    }
}

/// `None` means the group places no constraint on rows. An unconstrained
/// child drops out of a conjunction but makes a disjunction unconstrained.
fn combine(
    policy: &FieldPolicy,
    items: &[Filter],
    junction: Junction,
    dialect: Dialect,
) -> StorageResult<Option<CompiledPredicate>> {
    let mut parts = Vec::with_capacity(items.len());
    let mut unconstrained = false;
    for item in items {
        // Later children are still compiled so unknown keys keep failing.
        match compile_node(policy, item, dialect)? {
            Some(part) => parts.push(part),
            None => unconstrained = true,
        }
    }

    if junction == Junction::Or && unconstrained {
        return Ok(None);
    }
    if parts.len() <= 1 {
        return Ok(parts.pop());
    }

    let mut fragments = Vec::with_capacity(parts.len());
    let mut params = Vec::new();
    for part in parts {
        let (sql, part_params) = part.into_parts();
        fragments.push(sql);
        params.extend(part_params);
    }

    Ok(Some(CompiledPredicate {
        sql: format!("({})", fragments.join(junction.separator())),
        params,
    }))
}

fn compile_clause(
    policy: &FieldPolicy,
    clause: &FilterClause,
    dialect: Dialect,
) -> StorageResult<CompiledPredicate> {
    let key = clause.key.as_str();
    let Some(rule) = policy.resolve(key) else {
        return Err(StorageError::validation(format!(
            "unknown key '{key}' when building query on {}",
            policy.resource()
        )));
    };

    if clause.operator != MATCH_OPERATOR {
        return Err(StorageError::validation(format!(
            "field '{key}' can only be used with {MATCH_OPERATOR}"
        )));
    }

    match rule {
        FieldRule::Column {
            column,
            kind,
            normalize,
        } => {
            if !kind.accepts(&clause.value) {
                return Err(StorageError::validation(format!(
                    "expected {} value for '{key}'",
                    kind.as_str()
                )));
            }
            let param = match (normalize, &clause.value) {
                (Some(normalize), Value::String(text)) => SqlParam::Text(normalize(text)),
                _ => SqlParam::from_json(&clause.value),
            };
            Ok(CompiledPredicate {
                sql: format!("{column} = ?"),
                params: vec![param],
            })
        }
        FieldRule::Metadata { column, subkey } => {
            if !clause.value.is_string() {
                return Err(StorageError::validation(format!(
                    "expected string value for '{key}'"
                )));
            }
            let mut needle = Map::new();
            needle.insert(subkey.to_string(), clause.value.clone());
            Ok(CompiledPredicate {
                sql: dialect.containment(column),
                params: vec![SqlParam::Json(Value::Object(needle))],
            })
        }
    }
}

/// Conjunction of scoping predicates and a compiled filter.
#[derive(Debug, Clone, Default)]
pub struct WhereClause {
    fragments: Vec<String>,
    params: Vec<SqlParam>,
}

impl WhereClause {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `predicate`; empty predicates are skipped.
    pub fn and(mut self, predicate: CompiledPredicate) -> Self {
        self.push(predicate);
        self
    }

    pub fn push(&mut self, predicate: CompiledPredicate) {
        if predicate.is_empty() {
            return;
        }
        let (sql, params) = predicate.into_parts();
        self.fragments.push(sql);
        self.params.extend(params);
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Renders ` WHERE …` (with its leading space) or an empty string.
    pub fn render(&self) -> String {
        match self.fragments.as_slice() {
            [] => String::new(),
            [single] => format!(" WHERE {single}"),
            many => {
                let wrapped: Vec<String> = many.iter().map(|part| format!("({part})")).collect();
                format!(" WHERE {}", wrapped.join(" AND "))
            }
        }
    }

    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }
}
