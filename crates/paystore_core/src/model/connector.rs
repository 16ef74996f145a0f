//! Installed payment-provider connector.

use super::require_non_empty;
use crate::error::StorageResult;
use serde::Serialize;
use serde_json::value::RawValue;
use std::fmt::{Debug, Formatter};

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Connector {
    pub id: String,
    pub name: String,
    /// Always lowercase.
    pub provider: String,
    pub created_at: i64,
    pub scheduled_for_deletion: bool,
    /// Provider configuration; stored encrypted.
    pub config: Box<RawValue>,
}

impl Connector {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        provider: &str,
        created_at: i64,
        config: Box<RawValue>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            provider: normalize_provider(provider),
            created_at,
            scheduled_for_deletion: false,
            config,
        }
    }

    pub fn validate(&self) -> StorageResult<()> {
        require_non_empty("connector id", &self.id)?;
        require_non_empty("connector name", &self.name)?;
        require_non_empty("connector provider", &self.provider)
    }
}

impl Debug for Connector {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("provider", &self.provider)
            .field("created_at", &self.created_at)
            .field("scheduled_for_deletion", &self.scheduled_for_deletion)
            .finish_non_exhaustive()
    }
}

/// Providers are stored and matched in lowercase.
pub fn normalize_provider(provider: &str) -> String {
    provider.trim().to_lowercase()
}
