use keyward_auth::AuthError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid base url: {0}")]
    Url(#[from] url::ParseError),
    #[error("authority returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("decode response: {0}")]
    Decode(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Why a verifier did not accept a token.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("token rejected")]
    Rejected,
    #[error("verifier unavailable: {0}")]
    Unavailable(String),
}
