//! Client side of keyward: request authentication for axum services, in-process and
//! remote token verifiers, and per-user rate-limit lookup.

mod error;
mod limits;
mod mux;
mod remote;
mod verifier;

pub use error::{ClientError, VerifyError};
pub use limits::{select_rule, Limit, LimitFinder, RuleSource};
pub use mux::{
    authenticate, capabilities, principal_name, token_location, AuthMux, Capabilities,
    PrincipalName, TokenLocation,
};
pub use remote::RemoteClient;
pub use verifier::Verifier;
