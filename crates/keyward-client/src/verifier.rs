use async_trait::async_trait;
use keyward_auth::{AuthError, AuthService, Permission};

use crate::VerifyError;

/// Turns a bearer token into the capability set it grants.
///
/// Implemented in-process by [`AuthService`] and over HTTP by
/// [`RemoteClient`](crate::RemoteClient).
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Vec<Permission>, VerifyError>;
}

#[async_trait]
impl Verifier for AuthService {
    async fn verify(&self, token: &str) -> Result<Vec<Permission>, VerifyError> {
        match self.verify_token(token).await {
            Ok(v) => Ok(v.capabilities),
            Err(AuthError::VerificationFailed) => Err(VerifyError::Rejected),
            Err(e) => Err(VerifyError::Unavailable(e.to_string())),
        }
    }
}
