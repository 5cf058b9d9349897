//! JSON API of the authority.
//!
//! `/verify` and `/healthz` are open; everything else needs an admin token.

use std::sync::Arc;

use axum::{
    extract::{Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use keyward_auth::{
    AuthError, AuthService, CreateUserRequest, ListUsersRequest, OutputUser, Permission,
    TokenInfo, UpdateUserRequest, VerifyRequest, VerifyResponse,
};
use keyward_client::{authenticate, capabilities, AuthMux, Verifier};
use keyward_storage::{Page, RateLimitRule};
use serde::{Deserialize, Serialize};
use serde_json::json;

// ────────────────────────────────────── Errors ──────────────────────────────────────

pub struct ApiError(AuthError);

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AuthError::NotFound | AuthError::AlreadyDeleted => StatusCode::NOT_FOUND,
            AuthError::RevocationFailed(cause) if cause.is_absent() => StatusCode::NOT_FOUND,
            AuthError::AlreadyExists => StatusCode::CONFLICT,
            AuthError::InvalidAddress(_)
            | AuthError::InvalidPermission(_)
            | AuthError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AuthError::VerificationFailed => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ────────────────────────────────────── Shapes ──────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct IssueTokenRequest {
    pub name: String,
    pub perm: String,
    #[serde(default)]
    pub extra: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IssueTokenResponse {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct NameQuery {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct MinerQuery {
    pub miner: String,
}

#[derive(Debug, Deserialize)]
pub struct RateLimitQuery {
    pub name: String,
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RuleRef {
    pub name: String,
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Exists {
    pub exists: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RuleId {
    pub id: String,
}

// ────────────────────────────────────── Router ──────────────────────────────────────

/// Build the API. Admin routes are checked against `svc` itself; `trusted` paths skip
/// both authentication and the admin check.
pub fn router(svc: AuthService, trusted: &[String], verify_timeout: std::time::Duration) -> Router {
    let local: Arc<dyn Verifier> = Arc::new(svc.clone());
    let mux = trusted
        .iter()
        .fold(AuthMux::new(Some(local), None), |mux, p| mux.trust(p.clone()))
        .with_timeout(verify_timeout);

    let admin = Router::new()
        .route("/token", post(issue_token).get(get_token).delete(revoke_token))
        .route("/tokens", get(list_tokens))
        .route("/tokens/by-name", get(tokens_by_name))
        .route(
            "/user",
            post(create_user)
                .put(update_user)
                .get(get_user)
                .delete(delete_user),
        )
        .route("/user/has", get(has_user))
        .route("/users", get(list_users))
        .route("/miner", get(get_miner))
        .route("/miner/has", get(has_miner))
        .route(
            "/user/ratelimit",
            get(get_rate_limits)
                .post(upsert_rate_limit)
                .delete(delete_rate_limit),
        )
        .route_layer(middleware::from_fn_with_state(mux.clone(), require_admin))
        .route_layer(middleware::from_fn_with_state(mux, authenticate));

    Router::new()
        .route("/verify", post(verify))
        .route("/healthz", get(health_handler))
        .merge(admin)
        .with_state(svc)
}

/// Runs after [`authenticate`].
async fn require_admin(
    State(mux): State<AuthMux>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if mux.is_trusted(req.uri().path()) {
        return Ok(next.run(req).await);
    }
    let is_admin = capabilities(req.extensions()).is_some_and(|c| c.contains(&Permission::Admin));
    if !is_admin {
        tracing::warn!(path = %req.uri().path(), "admin capability required");
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(next.run(req).await)
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn verify(
    State(svc): State<AuthService>,
    Json(req): Json<VerifyRequest>,
) -> ApiResult<Json<VerifyResponse>> {
    let verified = svc.verify_token(&req.token).await?;
    Ok(Json(verified.into()))
}

// ────────────────────────────────────── Tokens ──────────────────────────────────────

async fn issue_token(
    State(svc): State<AuthService>,
    Json(req): Json<IssueTokenRequest>,
) -> ApiResult<(StatusCode, Json<IssueTokenResponse>)> {
    let token = svc.issue_token(&req.name, &req.perm, &req.extra).await?;
    Ok((StatusCode::CREATED, Json(IssueTokenResponse { token })))
}

async fn get_token(
    State(svc): State<AuthService>,
    Query(q): Query<TokenQuery>,
) -> ApiResult<Json<TokenInfo>> {
    Ok(Json(svc.get_token(&q.token).await?))
}

async fn revoke_token(
    State(svc): State<AuthService>,
    Query(q): Query<TokenQuery>,
) -> ApiResult<StatusCode> {
    svc.revoke_token(&q.token).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_tokens(
    State(svc): State<AuthService>,
    Query(page): Query<Page>,
) -> ApiResult<Json<Vec<TokenInfo>>> {
    Ok(Json(svc.list_tokens(page).await?))
}

async fn tokens_by_name(
    State(svc): State<AuthService>,
    Query(q): Query<NameQuery>,
) -> ApiResult<Json<Vec<TokenInfo>>> {
    Ok(Json(svc.tokens_by_name(&q.name).await?))
}

// ────────────────────────────────────── Users ──────────────────────────────────────

async fn create_user(
    State(svc): State<AuthService>,
    Json(req): Json<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<OutputUser>)> {
    Ok((StatusCode::CREATED, Json(svc.create_user(&req).await?)))
}

async fn update_user(
    State(svc): State<AuthService>,
    Json(req): Json<UpdateUserRequest>,
) -> ApiResult<StatusCode> {
    svc.update_user(&req).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_user(
    State(svc): State<AuthService>,
    Query(q): Query<NameQuery>,
) -> ApiResult<Json<OutputUser>> {
    Ok(Json(svc.get_user(&q.name).await?))
}

async fn has_user(
    State(svc): State<AuthService>,
    Query(q): Query<NameQuery>,
) -> ApiResult<Json<Exists>> {
    let exists = svc.has_user(&q.name).await?;
    Ok(Json(Exists { exists }))
}

async fn list_users(
    State(svc): State<AuthService>,
    Query(req): Query<ListUsersRequest>,
) -> ApiResult<Json<Vec<OutputUser>>> {
    Ok(Json(svc.list_users(&req).await?))
}

async fn delete_user(
    State(svc): State<AuthService>,
    Query(q): Query<NameQuery>,
) -> ApiResult<StatusCode> {
    svc.delete_user(&q.name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_miner(
    State(svc): State<AuthService>,
    Query(q): Query<MinerQuery>,
) -> ApiResult<Json<OutputUser>> {
    Ok(Json(svc.get_miner(&q.miner).await?))
}

async fn has_miner(
    State(svc): State<AuthService>,
    Query(q): Query<MinerQuery>,
) -> ApiResult<Json<Exists>> {
    let exists = svc.has_miner(&q.miner).await?;
    Ok(Json(Exists { exists }))
}

// ─────────────────────────────────── Rate limits ───────────────────────────────────

async fn get_rate_limits(
    State(svc): State<AuthService>,
    Query(q): Query<RateLimitQuery>,
) -> ApiResult<Json<Vec<RateLimitRule>>> {
    let id = q.id.as_deref().filter(|id| !id.is_empty());
    Ok(Json(svc.get_rate_limits(&q.name, id).await?))
}

async fn upsert_rate_limit(
    State(svc): State<AuthService>,
    Json(rule): Json<RateLimitRule>,
) -> ApiResult<Json<RuleId>> {
    let id = svc.upsert_rate_limit(&rule).await?;
    Ok(Json(RuleId { id }))
}

async fn delete_rate_limit(
    State(svc): State<AuthService>,
    Query(q): Query<RuleRef>,
) -> ApiResult<StatusCode> {
    svc.delete_rate_limit(&q.name, &q.id).await?;
    Ok(StatusCode::NO_CONTENT)
}
