//! HTTP client for a standalone keyward authority.

use async_trait::async_trait;
use keyward_auth::{OutputUser, Permission, VerifyRequest, VerifyResponse};
use keyward_storage::RateLimitRule;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::{ClientError, Verifier, VerifyError};

#[derive(Clone, Debug)]
pub struct RemoteClient {
    http: reqwest::Client,
    base: Url,
    /// Sent on admin routes.
    token: Option<String>,
}

impl RemoteClient {
    pub fn new(base: &str, token: Option<String>) -> Result<Self, ClientError> {
        let mut base = Url::parse(base)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base,
            token,
        })
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base.join(path)?)
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ClientError> {
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
                .unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                message,
            });
        }
        resp.json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    pub async fn verify_token(&self, token: &str) -> Result<VerifyResponse, ClientError> {
        let req = self.http.post(self.url("verify")?).json(&VerifyRequest {
            token: token.to_string(),
        });
        self.send(req).await
    }

    pub async fn get_user(&self, name: &str) -> Result<OutputUser, ClientError> {
        let req = self.http.get(self.url("user")?).query(&[("name", name)]);
        self.send(self.authorized(req)).await
    }

    pub async fn get_rate_limits(
        &self,
        name: &str,
        id: Option<&str>,
    ) -> Result<Vec<RateLimitRule>, ClientError> {
        let mut query = vec![("name", name)];
        if let Some(id) = id {
            query.push(("id", id));
        }
        let req = self.http.get(self.url("user/ratelimit")?).query(&query);
        self.send(self.authorized(req)).await
    }
}

#[async_trait]
impl Verifier for RemoteClient {
    async fn verify(&self, token: &str) -> Result<Vec<Permission>, VerifyError> {
        match self.verify_token(token).await {
            Ok(resp) => Ok(resp.capabilities),
            Err(ClientError::Status { status, .. }) if status == StatusCode::UNAUTHORIZED.as_u16() => {
                Err(VerifyError::Rejected)
            }
            Err(e) => Err(VerifyError::Unavailable(e.to_string())),
        }
    }
}
