//! Request and response shapes of the credential service.

use chrono::{DateTime, Utc};
use keyward_storage::{FilterMask, KeyPair, Page, SourceType, User, UserFilter, UserState};
use serde::{Deserialize, Serialize};

use crate::jwt;
use crate::{Permission, Verified};

/// Body of a remote verification call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub token: String,
}

/// Result of a successful verification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub name: String,
    pub perm: String,
    #[serde(default)]
    pub extra: String,
    pub capabilities: Vec<Permission>,
}

impl From<Verified> for VerifyResponse {
    fn from(v: Verified) -> Self {
        VerifyResponse {
            name: v.claims.name,
            perm: v.claims.perm,
            extra: v.claims.extra,
            capabilities: v.capabilities,
        }
    }
}

/// Public view of a stored token.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub token: String,
    pub name: String,
    pub perm: String,
    #[serde(default)]
    pub extra: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_deleted: bool,
}

impl From<&KeyPair> for TokenInfo {
    fn from(kp: &KeyPair) -> Self {
        let mut info = TokenInfo {
            token: kp.token.to_string(),
            name: kp.name.clone(),
            perm: kp.perm.clone(),
            extra: kp.extra.clone(),
            created_at: kp.created_at,
            is_deleted: kp.is_deleted,
        };
        // Older records may only carry these inside the token itself.
        if info.name.is_empty() || info.perm.is_empty() {
            if let Ok(claims) = jwt::decode_claims(kp.token.as_str()) {
                if info.name.is_empty() {
                    info.name = claims.name;
                }
                if info.perm.is_empty() {
                    info.perm = claims.perm;
                }
            }
        }
        info
    }
}

/// Which fields of an [`UpdateUserRequest`] are applied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateMask(pub u32);

impl UpdateMask {
    pub const MINER: u32 = 1;
    pub const COMMENT: u32 = 1 << 1;
    pub const STATE: u32 = 1 << 2;
    pub const SOURCE_TYPE: u32 = 1 << 3;
    pub const BURST: u32 = 1 << 4;
    pub const RATE: u32 = 1 << 5;

    pub fn has(self, bit: u32) -> bool {
        self.0 & bit == bit
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    /// Empty for a user with no miner.
    #[serde(default)]
    pub miner: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub state: UserState,
    #[serde(default)]
    pub source_type: SourceType,
    #[serde(default)]
    pub burst: i64,
    #[serde(default)]
    pub rate: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateUserRequest {
    pub name: String,
    pub mask: UpdateMask,
    #[serde(default)]
    pub miner: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub state: UserState,
    #[serde(default)]
    pub source_type: SourceType,
    #[serde(default)]
    pub burst: i64,
    #[serde(default)]
    pub rate: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListUsersRequest {
    #[serde(default)]
    pub skip: u64,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub state: UserState,
    #[serde(default)]
    pub source_type: SourceType,
    #[serde(default)]
    pub mask: FilterMask,
}

impl From<&ListUsersRequest> for UserFilter {
    fn from(req: &ListUsersRequest) -> Self {
        UserFilter {
            page: Page::new(req.skip, req.limit).normalized(),
            state: req.state,
            source_type: req.source_type,
            mask: req.mask,
        }
    }
}

/// Public view of a user. Timestamps are unix seconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputUser {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub miner: String,
    #[serde(default)]
    pub comment: String,
    pub state: UserState,
    pub source_type: SourceType,
    #[serde(default)]
    pub burst: i64,
    #[serde(default)]
    pub rate: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&User> for OutputUser {
    fn from(u: &User) -> Self {
        OutputUser {
            id: u.id.to_string(),
            name: u.name.clone(),
            miner: u.miner.clone().unwrap_or_default(),
            comment: u.comment.clone(),
            state: u.state,
            source_type: u.source_type,
            burst: u.burst,
            rate: u.rate,
            created_at: u.created_at.timestamp(),
            updated_at: u.updated_at.timestamp(),
        }
    }
}
