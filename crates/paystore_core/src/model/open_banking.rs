//! Open-banking connection of a payment service user, plus its access token.

use super::require_non_empty;
use crate::error::StorageResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Active,
    Error,
}

impl ConnectionStatus {
    pub fn as_db(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Error => "ERROR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ACTIVE" => Some(Self::Active),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Bearer token of a connection; stored encrypted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    pub token: String,
    pub created_at: i64,
    pub expires_at: Option<i64>,
}

impl Debug for AccessToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenBankingConnection {
    pub connection_id: String,
    pub connector_id: String,
    pub psu_id: Uuid,
    pub created_at: i64,
    pub updated_at: i64,
    pub status: ConnectionStatus,
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Present on writes that rotate the token and on single-connection
    /// reads; list reads leave it empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<AccessToken>,
}

impl OpenBankingConnection {
    pub fn validate(&self) -> StorageResult<()> {
        require_non_empty("connection id", &self.connection_id)?;
        require_non_empty("connection connector_id", &self.connector_id)?;
        if let Some(token) = &self.access_token {
            require_non_empty("access token", &token.token)?;
        }
        Ok(())
    }
}
