//! Bearer-token authentication for axum routers.
//!
//! ```ignore
//! let mux = AuthMux::new(Some(local), Some(remote)).trust("/healthz").trust("/static/");
//! let app = routes.layer(axum::middleware::from_fn_with_state(mux, authenticate));
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{self, Body},
    extract::{ConnectInfo, Request, State},
    http::{header, Extensions, StatusCode},
    middleware::Next,
    response::Response,
};
use keyward_auth::{jwt, Permission};

use crate::{Verifier, VerifyError};

const BEARER: &str = "Bearer ";
const MAX_FORM_BYTES: usize = 1 << 20;
const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Capability set granted by the verified token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Capabilities(pub Vec<Permission>);

/// Name decoded from the token's claims.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrincipalName(pub String);

/// Address the request came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenLocation(pub String);

pub fn capabilities(ext: &Extensions) -> Option<&[Permission]> {
    ext.get::<Capabilities>().map(|c| c.0.as_slice())
}

pub fn principal_name(ext: &Extensions) -> Option<&str> {
    ext.get::<PrincipalName>().map(|n| n.0.as_str())
}

pub fn token_location(ext: &Extensions) -> Option<&str> {
    ext.get::<TokenLocation>().map(|l| l.0.as_str())
}

/// Local-then-remote verification chain with trusted path bypass.
#[derive(Clone)]
pub struct AuthMux {
    inner: Arc<Inner>,
}

#[derive(Clone)]
struct Inner {
    trusted: Vec<String>,
    local: Option<Arc<dyn Verifier>>,
    remote: Option<Arc<dyn Verifier>>,
    timeout: Duration,
}

impl AuthMux {
    pub fn new(local: Option<Arc<dyn Verifier>>, remote: Option<Arc<dyn Verifier>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                trusted: Vec::new(),
                local,
                remote,
                timeout: DEFAULT_VERIFY_TIMEOUT,
            }),
        }
    }

    fn configure(self, f: impl FnOnce(&mut Inner)) -> Self {
        let mut inner = Arc::unwrap_or_clone(self.inner);
        f(&mut inner);
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Serve `pattern` without authentication. A pattern ending in `/` trusts the whole
    /// subtree; anything else must match the path exactly.
    pub fn trust(self, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        if pattern.is_empty() {
            return self;
        }
        self.configure(|inner| inner.trusted.push(pattern))
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.configure(|inner| inner.timeout = timeout)
    }

    pub fn is_trusted(&self, path: &str) -> bool {
        self.inner
            .trusted
            .iter()
            .any(|p| p == path || (p.ends_with('/') && path.starts_with(p.as_str())))
    }

    /// Run the chain. An unconfigured tier is skipped; a configured tier that fails or
    /// runs past the timeout hands over to the next one.
    pub async fn verify(&self, token: &str) -> Result<Vec<Permission>, VerifyError> {
        let mut last = VerifyError::Unavailable("no verifier configured".into());
        for tier in [&self.inner.local, &self.inner.remote].into_iter().flatten() {
            match tokio::time::timeout(self.inner.timeout, tier.verify(token)).await {
                Ok(Ok(perms)) => return Ok(perms),
                Ok(Err(e)) => last = e,
                Err(_) => {
                    tracing::debug!(timeout = ?self.inner.timeout, "verifier timed out");
                    last = VerifyError::Unavailable("verification timed out".into());
                }
            }
        }
        Err(last)
    }
}

/// `Authorization` header, else a `token` query or form field.
async fn extract_token(req: Request) -> Result<(Request, String), StatusCode> {
    if let Some(value) = req.headers().get(header::AUTHORIZATION) {
        let value = value
            .to_str()
            .map_err(|_| StatusCode::UNAUTHORIZED)?
            .trim()
            .to_string();
        if !value.is_empty() {
            return Ok((req, value));
        }
    }

    if let Some(token) = req.uri().query().and_then(|q| form_token(q.as_bytes())) {
        return Ok((req, format!("{BEARER}{token}")));
    }

    let is_form = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
    if !is_form {
        return Ok((req, String::new()));
    }

    let (parts, body) = req.into_parts();
    let bytes = body::to_bytes(body, MAX_FORM_BYTES)
        .await
        .map_err(|_| StatusCode::UNAUTHORIZED)?;
    let token = form_token(&bytes)
        .map(|t| format!("{BEARER}{t}"))
        .unwrap_or_default();
    Ok((Request::from_parts(parts, Body::from(bytes)), token))
}

fn form_token(raw: &[u8]) -> Option<String> {
    url::form_urlencoded::parse(raw)
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

/// axum middleware; install with `from_fn_with_state(mux, authenticate)`.
pub async fn authenticate(
    State(mux): State<AuthMux>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if mux.is_trusted(req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let (mut req, value) = extract_token(req).await?;
    let Some(token) = value.strip_prefix(BEARER) else {
        tracing::warn!("missing Bearer prefix in authorization");
        return Err(StatusCode::UNAUTHORIZED);
    };
    let token = token.to_string();

    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.to_string());
    let origin = remote.as_deref().unwrap_or("unknown");

    let perms = match mux.verify(&token).await {
        Ok(perms) => perms,
        Err(e) => {
            tracing::warn!(origin, error = %e, "token verification failed");
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    let ext = req.extensions_mut();
    ext.insert(Capabilities(perms));
    if let Some(host) = remote {
        ext.insert(TokenLocation(host));
    }
    if let Ok(claims) = jwt::decode_claims(&token) {
        if !claims.name.is_empty() {
            ext.insert(PrincipalName(claims.name));
        }
    }

    Ok(next.run(req).await)
}
