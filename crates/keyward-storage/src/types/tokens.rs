//! Token (credential) records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Token;

/// Persisted credential.
///
/// `token` is the signed bearer string itself and `secret` is the hex-encoded key that
/// signed it. Each token has its own secret.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyPair {
    pub token: Token,
    /// Empty on records created before per-token secrets; see the startup backfill.
    #[serde(default)]
    pub secret: String,
    pub name: String,
    pub perm: String,
    #[serde(default)]
    pub extra: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_deleted: bool,
}

impl KeyPair {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
