use keyward_storage::StoreError;
use thiserror::Error;

use crate::jwt::TokenError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("not found")]
    NotFound,
    #[error("already deleted")]
    AlreadyDeleted,
    #[error("already exists")]
    AlreadyExists,
    /// Any failure to verify a token. Deliberately carries no detail.
    #[error("verification failed")]
    VerificationFailed,
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid permission: {0}")]
    InvalidPermission(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Carries the store's reason so callers can tell a missing token from a broken store.
    #[error("remove token failed: {0}")]
    RevocationFailed(#[source] StoreError),
    #[error("storage error: {0}")]
    Storage(StoreError),
    #[error("token error: {0}")]
    Token(#[from] TokenError),
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => AuthError::NotFound,
            StoreError::Deleted => AuthError::AlreadyDeleted,
            StoreError::AlreadyExists => AuthError::AlreadyExists,
            other => AuthError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conditions_map_onto_service_variants() {
        assert!(matches!(AuthError::from(StoreError::NotFound), AuthError::NotFound));
        assert!(matches!(AuthError::from(StoreError::Deleted), AuthError::AlreadyDeleted));
        assert!(matches!(
            AuthError::from(StoreError::AlreadyExists),
            AuthError::AlreadyExists
        ));
        assert!(matches!(
            AuthError::from(StoreError::Backend("io".into())),
            AuthError::Storage(_)
        ));
    }
}
