//! Storage abstraction for keyward.
//!
//! Backend crates (keyward-store-kv, keyward-store-sqlite) implement [`Store`] so the
//! credential service doesn't depend on any specific engine or on-disk layout.
//!
//! Every backend honours the same record semantics:
//!
//! - Tokens and users are soft-deleted. Reads of a deleted record fail with
//!   [`StoreError::Deleted`], reads of a missing record with [`StoreError::NotFound`].
//! - `has_*` checks only report live records and never fail for missing ones.
//! - Listing skips and limits over *live matches*, in an order that is stable while the
//!   data is unchanged.
//! - A user name can never be reused, even after the user is deleted.

#[cfg(feature = "test-support")]
pub mod conformance;
mod store;
mod types;

pub use store::*;
pub use types::*;

use thiserror::Error;

/// Uniform error type for all storage backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("record is deleted")]
    Deleted,
    #[error("already exists")]
    AlreadyExists,
    #[error("invalid record: {0}")]
    Invalid(String),
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Missing and soft-deleted records both deny access to the caller.
    pub fn is_absent(&self) -> bool {
        matches!(self, StoreError::NotFound | StoreError::Deleted)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Invalid(e.to_string())
    }
}
