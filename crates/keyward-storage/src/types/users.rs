//! User (principal) types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Page, UserId};
use crate::StoreError;

/// Whether a user may be served.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum UserState {
    #[default]
    Undefined,
    Enabled,
    Disabled,
}

impl From<UserState> for i32 {
    fn from(s: UserState) -> i32 {
        match s {
            UserState::Undefined => 0,
            UserState::Enabled => 1,
            UserState::Disabled => 2,
        }
    }
}

impl TryFrom<i32> for UserState {
    type Error = StoreError;

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(UserState::Undefined),
            1 => Ok(UserState::Enabled),
            2 => Ok(UserState::Disabled),
            other => Err(StoreError::Invalid(format!("unknown user state {other}"))),
        }
    }
}

/// Opaque tag describing where a user came from. Only compared for equality.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceType(pub i32);

/// User record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    /// Canonical form of the bound miner address.
    #[serde(default)]
    pub miner: Option<String>,
    #[serde(default)]
    pub comment: String,
    pub source_type: SourceType,
    pub state: UserState,
    #[serde(default)]
    pub burst: i64,
    #[serde(default)]
    pub rate: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_deleted: bool,
}

impl User {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Selects which [`UserFilter`] fields constrain a listing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterMask(pub u32);

impl FilterMask {
    pub const SOURCE_TYPE: u32 = 1;
    pub const STATE: u32 = 1 << 1;

    pub fn has(self, bit: u32) -> bool {
        self.0 & bit == bit
    }
}

/// Listing parameters for users.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserFilter {
    pub page: Page,
    pub state: UserState,
    pub source_type: SourceType,
    pub mask: FilterMask,
}

impl UserFilter {
    /// True when `user` is live and satisfies every active filter.
    pub fn matches(&self, user: &User) -> bool {
        if user.is_deleted {
            return false;
        }
        if self.mask.has(FilterMask::SOURCE_TYPE) && user.source_type != self.source_type {
            return false;
        }
        if self.mask.has(FilterMask::STATE) && user.state != self.state {
            return false;
        }
        true
    }
}
