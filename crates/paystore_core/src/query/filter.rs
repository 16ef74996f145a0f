//! Filter DSL consumed by the compiler.
//!
//! Two wire shapes are accepted: the flat list of `{key, operator, value}`
//! triples, and the nested document form
//! `{"$and": [{"$match": {"status": "ACTIVE"}}, ...]}`.

use crate::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The only comparison operator accepted anywhere.
pub const MATCH_OPERATOR: &str = "$match";

const AND_OPERATOR: &str = "$and";
const OR_OPERATOR: &str = "$or";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterClause {
    pub key: String,
    pub operator: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Filter {
    Clause(FilterClause),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    /// Equality clause on `key`.
    pub fn matching(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::clause(key, MATCH_OPERATOR, value)
    }

    pub fn clause(
        key: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Self::Clause(FilterClause {
            key: key.into(),
            operator: operator.into(),
            value: value.into(),
        })
    }

    /// Conjunction of the flat wire triples.
    pub fn from_clauses(clauses: Vec<FilterClause>) -> Self {
        Self::And(clauses.into_iter().map(Self::Clause).collect())
    }

    /// Parses the nested document form.
    pub fn from_document(document: &Value) -> StorageResult<Self> {
        let Some(object) = document.as_object() else {
            return Err(StorageError::validation(
                "filter document must be a JSON object",
            ));
        };
        let mut entries = object.iter();
        let (operator, operand) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            (None, _) => return Ok(Self::And(Vec::new())),
            (Some(_), Some(_)) => {
                return Err(StorageError::validation(
                    "filter document must hold exactly one operator",
                ))
            }
        };

        match operator.as_str() {
            AND_OPERATOR | OR_OPERATOR => {
                let Some(items) = operand.as_array() else {
                    return Err(StorageError::validation(format!(
                        "'{operator}' expects an array of filters"
                    )));
                };
                let children = items
                    .iter()
                    .map(Self::from_document)
                    .collect::<StorageResult<Vec<_>>>()?;
                if operator == AND_OPERATOR {
                    Ok(Self::And(children))
                } else {
                    Ok(Self::Or(children))
                }
            }
            op if op.starts_with('$') => {
                let Some(fields) = operand.as_object() else {
                    return Err(StorageError::validation(format!(
                        "'{op}' expects an object of one key"
                    )));
                };
                let mut fields = fields.iter();
                match (fields.next(), fields.next()) {
                    (Some((key, value)), None) => Ok(Self::clause(key, op, value.clone())),
                    _ => Err(StorageError::validation(format!(
                        "'{op}' expects an object of exactly one key"
                    ))),
                }
            }
            other => Err(StorageError::validation(format!(
                "unexpected filter operator '{other}'"
            ))),
        }
    }

    /// True when the filter contains no clause at all.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Clause(_) => false,
            Self::And(items) | Self::Or(items) => items.iter().all(Self::is_empty),
        }
    }
}
