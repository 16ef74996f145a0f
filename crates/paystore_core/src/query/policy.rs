//! Per-resource allow-list of queryable fields.
//!
//! # Responsibility
//! - Declare which filter keys a resource accepts and how each renders.
//! - Resolve the `metadata[<subkey>]` syntax against a single template.
//!
//! # Invariants
//! - A key resolves through at most one rule per resource.
//! - Column names are validated identifiers; they are the only text of a
//!   policy that reaches SQL verbatim.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

static METADATA_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^metadata\[([^\[\]]+)\]$").expect("valid metadata key regex"));
static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// True for a bare SQL identifier (`[A-Za-z_][A-Za-z0-9_]*`).
pub(crate) fn is_identifier(name: &str) -> bool {
    IDENTIFIER_RE.is_match(name)
}

/// Rewrites a string value before it is bound.
pub type Normalizer = fn(&str) -> String;

/// Value shape a plain column accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Any,
    String,
    Bool,
    Number,
}

impl ValueKind {
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Any => !value.is_array() && !value.is_object(),
            Self::String => value.is_string(),
            Self::Bool => value.is_boolean(),
            Self::Number => value.is_number(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Any => "scalar",
            Self::String => "string",
            Self::Bool => "boolean",
            Self::Number => "number",
        }
    }
}

#[derive(Debug, Clone)]
struct ColumnRule {
    column: String,
    kind: ValueKind,
    normalize: Option<Normalizer>,
}

/// Rule a key resolved to.
#[derive(Debug, Clone, Copy)]
pub enum FieldRule<'a> {
    /// `column = ?` with the value bound as-is (after normalization).
    Column {
        column: &'a str,
        kind: ValueKind,
        normalize: Option<Normalizer>,
    },
    /// JSON containment of `{subkey: value}` in `column`.
    Metadata { column: &'a str, subkey: &'a str },
}

#[derive(Debug, Clone)]
pub struct FieldPolicy {
    resource: String,
    columns: BTreeMap<String, ColumnRule>,
    metadata_column: Option<String>,
}

impl FieldPolicy {
    pub fn builder(resource: impl Into<String>) -> FieldPolicyBuilder {
        FieldPolicyBuilder {
            resource: resource.into(),
            columns: Vec::new(),
            metadata_columns: Vec::new(),
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Resolves a filter key, or `None` when the key is not queryable here.
    pub fn resolve<'a>(&'a self, key: &'a str) -> Option<FieldRule<'a>> {
        if let Some(rule) = self.columns.get(key) {
            return Some(FieldRule::Column {
                column: &rule.column,
                kind: rule.kind,
                normalize: rule.normalize,
            });
        }

        let column = self.metadata_column.as_deref()?;
        let subkey = METADATA_KEY_RE.captures(key)?.get(1)?.as_str();
        Some(FieldRule::Metadata { column, subkey })
    }

    /// Plain keys accepted by this policy, sorted.
    pub fn column_keys(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn accepts_metadata(&self) -> bool {
        self.metadata_column.is_some()
    }
}

pub struct FieldPolicyBuilder {
    resource: String,
    columns: Vec<(String, ColumnRule)>,
    metadata_columns: Vec<String>,
}

impl FieldPolicyBuilder {
    /// Key rendered against the column of the same name.
    pub fn column(self, name: &str) -> Self {
        self.column_as(name, name, ValueKind::Any)
    }

    pub fn column_as(self, name: &str, column: &str, kind: ValueKind) -> Self {
        self.push_column(name, column, kind, None)
    }

    pub fn column_normalized(
        self,
        name: &str,
        column: &str,
        kind: ValueKind,
        normalize: Normalizer,
    ) -> Self {
        self.push_column(name, column, kind, Some(normalize))
    }

    /// Accepts every `metadata[<subkey>]` key, matched inside `column`.
    pub fn metadata(mut self, column: &str) -> Self {
        self.metadata_columns.push(column.to_string());
        self
    }

    pub fn build(self) -> Result<FieldPolicy, PolicyError> {
        let mut columns = BTreeMap::new();
        for (name, rule) in self.columns {
            if !IDENTIFIER_RE.is_match(&name) {
                return Err(PolicyError::InvalidIdentifier(name));
            }
            if !IDENTIFIER_RE.is_match(&rule.column) {
                return Err(PolicyError::InvalidIdentifier(rule.column));
            }
            if columns.contains_key(&name) {
                return Err(PolicyError::DuplicateField(name));
            }
            columns.insert(name, rule);
        }

        let mut metadata = self.metadata_columns.into_iter();
        let metadata_column = metadata.next();
        if metadata.next().is_some() {
            return Err(PolicyError::DuplicateMetadataTemplate);
        }
        if let Some(column) = &metadata_column {
            if !IDENTIFIER_RE.is_match(column) {
                return Err(PolicyError::InvalidIdentifier(column.clone()));
            }
        }

        Ok(FieldPolicy {
            resource: self.resource,
            columns,
            metadata_column,
        })
    }

    fn push_column(
        mut self,
        name: &str,
        column: &str,
        kind: ValueKind,
        normalize: Option<Normalizer>,
    ) -> Self {
        self.columns.push((
            name.to_string(),
            ColumnRule {
                column: column.to_string(),
                kind,
                normalize,
            },
        ));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    DuplicateField(String),
    DuplicateMetadataTemplate,
    InvalidIdentifier(String),
}

impl Display for PolicyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateField(name) => write!(f, "field `{name}` is registered twice"),
            Self::DuplicateMetadataTemplate => {
                write!(f, "a policy accepts at most one metadata template")
            }
            Self::InvalidIdentifier(name) => write!(f, "invalid SQL identifier `{name}`"),
        }
    }
}

impl Error for PolicyError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn widget_policy() -> FieldPolicy {
        FieldPolicy::builder("widget")
            .column("id")
            .column("status")
            .metadata("metadata")
            .build()
            .unwrap()
    }

    #[test]
    fn resolves_metadata_subkey() {
        let policy = widget_policy();
        match policy.resolve("metadata[color]") {
            Some(FieldRule::Metadata { column, subkey }) => {
                assert_eq!(column, "metadata");
                assert_eq!(subkey, "color");
            }
            other => panic!("unexpected rule: {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_metadata_keys() {
        let policy = widget_policy();
        assert!(policy.resolve("metadata[]").is_none());
        assert!(policy.resolve("metadata[a[b]]").is_none());
        assert!(policy.resolve("metadata").is_none());
        assert!(policy.resolve("xmetadata[color]").is_none());
    }

    #[test]
    fn metadata_keys_need_a_template() {
        let policy = FieldPolicy::builder("plain").column("id").build().unwrap();
        assert!(policy.resolve("metadata[color]").is_none());
    }

    #[test]
    fn build_rejects_duplicates_and_bad_identifiers() {
        let err = FieldPolicy::builder("dup")
            .column("id")
            .column_as("id", "other_id", ValueKind::String)
            .build()
            .unwrap_err();
        assert_eq!(err, PolicyError::DuplicateField("id".to_string()));

        let err = FieldPolicy::builder("meta")
            .metadata("metadata")
            .metadata("labels")
            .build()
            .unwrap_err();
        assert_eq!(err, PolicyError::DuplicateMetadataTemplate);

        let err = FieldPolicy::builder("inject")
            .column_as("name", "name; DROP TABLE x", ValueKind::Any)
            .build()
            .unwrap_err();
        assert!(matches!(err, PolicyError::InvalidIdentifier(_)));
    }
}
