//! Account held at a provider, discovered through a connector.

use super::require_non_empty;
use crate::error::StorageResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    Internal,
    External,
}

impl AccountType {
    pub fn as_db(self) -> &'static str {
        match self {
            Self::Internal => "INTERNAL",
            Self::External => "EXTERNAL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "INTERNAL" => Some(Self::Internal),
            "EXTERNAL" => Some(Self::External),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub connector_id: String,
    /// Identifier of the account at the provider.
    pub reference: String,
    pub created_at: i64,
    #[serde(rename = "type")]
    pub kind: AccountType,
    pub name: Option<String>,
    pub default_asset: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Provider payload the account was built from.
    pub raw: Option<Value>,
}

impl Account {
    pub fn validate(&self) -> StorageResult<()> {
        require_non_empty("account id", &self.id)?;
        require_non_empty("account connector_id", &self.connector_id)?;
        require_non_empty("account reference", &self.reference)
    }
}
