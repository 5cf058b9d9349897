use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Request, StatusCode};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use http_body_util::BodyExt;
use keyward_auth::{jwt, Claims, Permission};
use keyward_client::{
    authenticate, capabilities, principal_name, token_location, AuthMux, Verifier, VerifyError,
};
use serde_json::{json, Value};
use tower::ServiceExt;

/// Verifier with a canned answer that counts its calls.
struct Stub {
    accept: bool,
    delay: Duration,
    calls: AtomicUsize,
}

impl Stub {
    fn accepting() -> Arc<Self> {
        Arc::new(Self {
            accept: true,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            accept: false,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    fn slow() -> Arc<Self> {
        Arc::new(Self {
            accept: true,
            delay: Duration::from_secs(5),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Verifier for Stub {
    async fn verify(&self, _token: &str) -> Result<Vec<Permission>, VerifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.accept {
            Ok(Permission::Write.expand())
        } else {
            Err(VerifyError::Rejected)
        }
    }
}

async fn whoami(req: axum::extract::Request) -> Json<Value> {
    let ext = req.extensions();
    Json(json!({
        "name": principal_name(ext),
        "caps": capabilities(ext).map(|c| c.to_vec()),
        "location": token_location(ext),
    }))
}

async fn echo(body: String) -> String {
    body
}

fn app(mux: AuthMux) -> Router {
    Router::new()
        .route("/whoami", get(whoami))
        .route("/echo", post(echo))
        .route("/healthz", get(|| async { "ok" }))
        .route("/healthz/deep", get(|| async { "deep" }))
        .route("/static/app.js", get(|| async { "js" }))
        .route("/staticx", get(|| async { "x" }))
        .layer(middleware::from_fn_with_state(mux, authenticate))
}

fn local(v: &Arc<Stub>) -> Option<Arc<dyn Verifier>> {
    Some(v.clone() as Arc<dyn Verifier>)
}

fn alice_token() -> String {
    jwt::sign(
        &Claims {
            name: "alice".into(),
            perm: "write".into(),
            extra: String::new(),
        },
        &[1u8; 32],
    )
    .unwrap()
}

fn get_req(uri: &str, auth: Option<&str>) -> Request<Body> {
    let mut b = Request::builder().uri(uri);
    if let Some(a) = auth {
        b = b.header(header::AUTHORIZATION, a);
    }
    b.body(Body::empty()).unwrap()
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn trusted_paths_skip_authentication() {
    let v = Stub::rejecting();
    let mux = AuthMux::new(local(&v), None).trust("/healthz").trust("/static/");
    let app = app(mux);

    for (uri, want) in [
        ("/healthz", StatusCode::OK),
        ("/static/app.js", StatusCode::OK),
        ("/healthz/deep", StatusCode::UNAUTHORIZED),
        ("/staticx", StatusCode::UNAUTHORIZED),
    ] {
        let resp = app.clone().oneshot(get_req(uri, None)).await.unwrap();
        assert_eq!(resp.status(), want, "{uri}");
    }
    assert_eq!(v.calls(), 0);
}

#[tokio::test]
async fn missing_or_non_bearer_credentials_are_rejected() {
    let v = Stub::accepting();
    let app = app(AuthMux::new(local(&v), None));

    let resp = app.clone().oneshot(get_req("/whoami", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    assert!(body.is_empty());

    let resp = app
        .oneshot(get_req("/whoami", Some("Basic dXNlcjpwdw==")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(v.calls(), 0);
}

#[tokio::test]
async fn local_success_skips_remote() {
    let l = Stub::accepting();
    let r = Stub::accepting();
    let app = app(AuthMux::new(local(&l), local(&r)));

    let resp = app
        .oneshot(get_req("/whoami", Some(&format!("Bearer {}", alice_token()))))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(l.calls(), 1);
    assert_eq!(r.calls(), 0);
}

#[tokio::test]
async fn local_failure_falls_back_to_remote() {
    let l = Stub::rejecting();
    let r = Stub::accepting();
    let app = app(AuthMux::new(local(&l), local(&r)));

    let resp = app
        .oneshot(get_req("/whoami", Some(&format!("Bearer {}", alice_token()))))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(l.calls(), 1);
    assert_eq!(r.calls(), 1);
}

#[tokio::test]
async fn failure_without_fallback_is_unauthorized() {
    let l = Stub::rejecting();
    let app = app(AuthMux::new(local(&l), None));
    let resp = app
        .oneshot(get_req("/whoami", Some("Bearer anything")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let l = Stub::rejecting();
    let r = Stub::rejecting();
    let app = self::app(AuthMux::new(local(&l), local(&r)));
    let resp = app
        .oneshot(get_req("/whoami", Some("Bearer anything")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(r.calls(), 1);
}

#[tokio::test]
async fn no_configured_verifier_is_unauthorized() {
    let app = app(AuthMux::new(None, None));
    let resp = app
        .oneshot(get_req("/whoami", Some("Bearer anything")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn remote_only_chain() {
    let r = Stub::accepting();
    let app = app(AuthMux::new(None, local(&r)));
    let resp = app
        .oneshot(get_req("/whoami", Some("Bearer anything")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(r.calls(), 1);
}

#[tokio::test]
async fn context_carries_identity_capabilities_and_origin() {
    let v = Stub::accepting();
    let app = app(AuthMux::new(local(&v), None));

    let mut req = get_req("/whoami", Some(&format!("Bearer {}", alice_token())));
    let addr: SocketAddr = "10.1.2.3:4567".parse().unwrap();
    req.extensions_mut().insert(ConnectInfo(addr));

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["name"], "alice");
    assert_eq!(body["caps"], json!(["read", "write"]));
    assert_eq!(body["location"], "10.1.2.3:4567");
}

#[tokio::test]
async fn opaque_token_omits_principal_name() {
    let v = Stub::accepting();
    let app = app(AuthMux::new(local(&v), None));
    let resp = app
        .oneshot(get_req("/whoami", Some("Bearer opaque-token")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert!(body["name"].is_null());
    assert!(body["location"].is_null());
    assert_eq!(body["caps"], json!(["read", "write"]));
}

#[tokio::test]
async fn token_from_query_string() {
    let v = Stub::accepting();
    let app = app(AuthMux::new(local(&v), None));
    let uri = format!("/whoami?token={}", alice_token());
    let resp = app.oneshot(get_req(&uri, None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["name"], "alice");
}

#[tokio::test]
async fn token_from_form_body_keeps_body_for_handler() {
    let v = Stub::accepting();
    let app = app(AuthMux::new(local(&v), None));
    let form = format!("token={}&x=1", alice_token());
    let req = Request::builder()
        .method("POST")
        .uri("/echo")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.clone()))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, form.as_bytes());
}

#[tokio::test]
async fn slow_verification_times_out() {
    let v = Stub::slow();
    let mux = AuthMux::new(local(&v), None).with_timeout(Duration::from_millis(50));
    let resp = app(mux)
        .oneshot(get_req("/whoami", Some("Bearer anything")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn hung_local_tier_falls_back_to_remote() {
    let l = Stub::slow();
    let r = Stub::accepting();
    let mux = AuthMux::new(local(&l), local(&r)).with_timeout(Duration::from_millis(200));
    let resp = app(mux)
        .oneshot(get_req("/whoami", Some(&format!("Bearer {}", alice_token()))))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(l.calls(), 1);
    assert_eq!(r.calls(), 1);
    assert_eq!(json_body(resp).await["name"], "alice");
}

#[tokio::test]
async fn empty_authorization_header_falls_back_to_query() {
    let v = Stub::accepting();
    let app = app(AuthMux::new(local(&v), None));
    let uri = format!("/whoami?token={}", alice_token());

    for blank in ["", "   "] {
        let resp = app
            .clone()
            .oneshot(get_req(&uri, Some(blank)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "{blank:?}");
        assert_eq!(json_body(resp).await["name"], "alice");
    }

    let resp = app.oneshot(get_req("/whoami", Some(""))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}
