//! Credential service for keyward.
//!
//! Tokens are HS256 JWTs over `{name, perm, ext}`. Each token is signed with its own
//! random secret, stored next to it, and verification looks the secret up by the token
//! string itself. Users and their rate-limit rules are managed through the same
//! [`AuthService`].

pub mod address;
mod error;
pub mod jwt;
pub mod migrate;
mod permission;
mod service;
mod types;

pub use error::AuthError;
pub use jwt::{Claims, TokenError};
pub use permission::Permission;
pub use service::{AuthService, Verified};
pub use types::*;
