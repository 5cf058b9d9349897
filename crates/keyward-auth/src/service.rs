use std::sync::Arc;

use chrono::Utc;
use keyward_storage::{KeyPair, Page, RateLimitRule, Store, Token, User, UserFilter, UserId};

use crate::address;
use crate::jwt::{self, Claims};
use crate::types::*;
use crate::{AuthError, Permission};

/// A token that passed verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verified {
    pub claims: Claims,
    pub capabilities: Vec<Permission>,
}

/// Issues and verifies tokens and manages users and their rate-limit rules.
///
/// Holds nothing but the store handle; every token is signed with its own secret.
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn Store>,
}

impl AuthService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Run the legacy-secret backfill with `master_secret` (hex), then build the service.
    pub async fn start(store: Arc<dyn Store>, master_secret: &str) -> Result<Self, AuthError> {
        crate::migrate::backfill_secrets(store.as_ref(), master_secret).await?;
        Ok(Self::new(store))
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    // ───────────────────────────── Tokens ─────────────────────────────

    pub async fn issue_token(
        &self,
        name: &str,
        perm: &str,
        extra: &str,
    ) -> Result<String, AuthError> {
        if name.is_empty() {
            return Err(AuthError::InvalidRequest("name is required".into()));
        }
        let perm: Permission = perm.parse()?;
        let claims = Claims {
            name: name.to_string(),
            perm: perm.to_string(),
            extra: extra.to_string(),
        };

        let secret = jwt::random_secret();
        let token = Token(jwt::sign(&claims, &secret[..])?);
        if self.store.has_token(&token).await? {
            return Ok(token.0);
        }

        self.store
            .put_token(&KeyPair {
                token: token.clone(),
                secret: hex::encode(&secret[..]),
                name: claims.name,
                perm: claims.perm,
                extra: claims.extra,
                created_at: Utc::now(),
                is_deleted: false,
            })
            .await?;
        tracing::debug!(name, %perm, "token issued");
        Ok(token.0)
    }

    /// Verify `token` against its own stored secret.
    pub async fn verify_token(&self, token: &str) -> Result<Verified, AuthError> {
        let kp = self
            .store
            .get_token(&Token::from(token))
            .await
            .map_err(|_| AuthError::VerificationFailed)?;
        let secret = hex::decode(&kp.secret).map_err(|_| AuthError::VerificationFailed)?;
        let claims = jwt::verify(token, &secret).map_err(|_| AuthError::VerificationFailed)?;
        let perm: Permission = claims
            .perm
            .parse()
            .map_err(|_| AuthError::VerificationFailed)?;
        Ok(Verified {
            capabilities: perm.expand(),
            claims,
        })
    }

    pub async fn revoke_token(&self, token: &str) -> Result<(), AuthError> {
        self.store
            .delete_token(&Token::from(token))
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "revoke token failed");
                AuthError::RevocationFailed(e)
            })
    }

    pub async fn get_token(&self, token: &str) -> Result<TokenInfo, AuthError> {
        let kp = self.store.get_token(&Token::from(token)).await?;
        Ok(TokenInfo::from(&kp))
    }

    pub async fn list_tokens(&self, page: Page) -> Result<Vec<TokenInfo>, AuthError> {
        let page = page.normalized();
        let kps = self.store.list_tokens(page.skip, page.limit).await?;
        Ok(kps.iter().map(TokenInfo::from).collect())
    }

    pub async fn tokens_by_name(&self, name: &str) -> Result<Vec<TokenInfo>, AuthError> {
        let kps = self.store.tokens_by_name(name).await?;
        Ok(kps.iter().map(TokenInfo::from).collect())
    }

    // ───────────────────────────── Users ──────────────────────────────

    pub async fn create_user(&self, req: &CreateUserRequest) -> Result<OutputUser, AuthError> {
        if req.name.is_empty() {
            return Err(AuthError::InvalidRequest("name is required".into()));
        }
        if self.store.has_user(&req.name).await? {
            return Err(AuthError::AlreadyExists);
        }
        let miner = normalize_optional(&req.miner)?;

        let now = Utc::now();
        let user = User {
            id: UserId::new(),
            name: req.name.clone(),
            miner,
            comment: req.comment.clone(),
            source_type: req.source_type,
            state: req.state,
            burst: req.burst,
            rate: req.rate,
            created_at: now,
            updated_at: now,
            is_deleted: false,
        };
        self.store.put_user(&user).await?;
        tracing::info!(name = %user.name, id = %user.id, "user created");
        Ok(OutputUser::from(&user))
    }

    pub async fn update_user(&self, req: &UpdateUserRequest) -> Result<(), AuthError> {
        let mut user = self.store.get_user(&req.name).await?;
        let mask = req.mask;

        if mask.has(UpdateMask::MINER) {
            user.miner = normalize_optional(&req.miner)?;
        }
        if mask.has(UpdateMask::COMMENT) {
            user.comment = req.comment.clone();
        }
        if mask.has(UpdateMask::STATE) {
            user.state = req.state;
        }
        if mask.has(UpdateMask::SOURCE_TYPE) {
            user.source_type = req.source_type;
        }
        if mask.has(UpdateMask::BURST) {
            user.burst = req.burst;
        }
        if mask.has(UpdateMask::RATE) {
            user.rate = req.rate;
        }
        user.updated_at = Utc::now();

        self.store.update_user(&user).await?;
        Ok(())
    }

    pub async fn list_users(&self, req: &ListUsersRequest) -> Result<Vec<OutputUser>, AuthError> {
        let users = self.store.list_users(&UserFilter::from(req)).await?;
        Ok(users.iter().map(OutputUser::from).collect())
    }

    pub async fn get_user(&self, name: &str) -> Result<OutputUser, AuthError> {
        let user = self.store.get_user(name).await?;
        Ok(OutputUser::from(&user))
    }

    pub async fn has_user(&self, name: &str) -> Result<bool, AuthError> {
        Ok(self.store.has_user(name).await?)
    }

    pub async fn delete_user(&self, name: &str) -> Result<(), AuthError> {
        self.store.delete_user(name).await?;
        tracing::info!(name, "user deleted");
        Ok(())
    }

    pub async fn get_miner(&self, miner: &str) -> Result<OutputUser, AuthError> {
        let miner = normalize(miner)?;
        let user = self.store.get_user_by_miner(&miner).await?;
        Ok(OutputUser::from(&user))
    }

    pub async fn has_miner(&self, miner: &str) -> Result<bool, AuthError> {
        let miner = normalize(miner)?;
        Ok(self.store.has_miner(&miner).await?)
    }

    // ─────────────────────────── Rate limits ───────────────────────────

    pub async fn get_rate_limits(
        &self,
        name: &str,
        id: Option<&str>,
    ) -> Result<Vec<RateLimitRule>, AuthError> {
        Ok(self.store.get_rate_limits(name, id).await?)
    }

    pub async fn upsert_rate_limit(&self, rule: &RateLimitRule) -> Result<String, AuthError> {
        if rule.name.is_empty() {
            return Err(AuthError::InvalidRequest("name is required".into()));
        }
        Ok(self.store.put_rate_limit(rule).await?)
    }

    pub async fn delete_rate_limit(&self, name: &str, id: &str) -> Result<(), AuthError> {
        Ok(self.store.delete_rate_limit(name, id).await?)
    }
}

fn normalize(miner: &str) -> Result<String, AuthError> {
    address::normalize(miner).map_err(|e| AuthError::InvalidAddress(format!("{miner}: {e}")))
}

fn normalize_optional(miner: &str) -> Result<Option<String>, AuthError> {
    if miner.is_empty() {
        Ok(None)
    } else {
        normalize(miner).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyward_storage::{MockStore, StoreError, UserState};
    use keyward_store_sqlite::SqliteStore;

    async fn service() -> AuthService {
        let store = SqliteStore::open_in_memory().await.unwrap();
        AuthService::new(Arc::new(store))
    }

    #[tokio::test]
    async fn issued_token_verifies_with_expanded_capabilities() {
        let svc = service().await;
        let token = svc.issue_token("alice", "sign", "rig-1").await.unwrap();

        let v = svc.verify_token(&token).await.unwrap();
        assert_eq!(v.claims.name, "alice");
        assert_eq!(v.claims.extra, "rig-1");
        assert_eq!(
            v.capabilities,
            vec![Permission::Read, Permission::Write, Permission::Sign]
        );
    }

    #[tokio::test]
    async fn every_issuance_gets_its_own_secret() {
        let svc = service().await;
        let a = svc.issue_token("alice", "read", "").await.unwrap();
        let b = svc.issue_token("alice", "read", "").await.unwrap();
        assert_ne!(a, b);

        let ka = svc.store().get_token(&Token::from(a.as_str())).await.unwrap();
        let kb = svc.store().get_token(&Token::from(b.as_str())).await.unwrap();
        assert_ne!(ka.secret, kb.secret);
        assert_eq!(ka.secret.len(), 64);
    }

    #[tokio::test]
    async fn unknown_permission_is_rejected() {
        let svc = service().await;
        assert!(matches!(
            svc.issue_token("alice", "root", "").await,
            Err(AuthError::InvalidPermission(_))
        ));
    }

    #[tokio::test]
    async fn verification_failures_are_uniform() {
        let svc = service().await;
        let token = svc.issue_token("alice", "read", "").await.unwrap();

        // unknown token
        assert!(matches!(
            svc.verify_token("a.b.c").await,
            Err(AuthError::VerificationFailed)
        ));

        // valid token string, but signed by a different secret than the stored one
        let forged = jwt::sign(
            &Claims {
                name: "alice".into(),
                perm: "read".into(),
                extra: String::new(),
            },
            &[7u8; 32],
        )
        .unwrap();
        let mut kp = svc.store().get_token(&Token::from(token.as_str())).await.unwrap();
        kp.token = Token(forged.clone());
        svc.store().put_token(&kp).await.unwrap();
        assert!(matches!(
            svc.verify_token(&forged).await,
            Err(AuthError::VerificationFailed)
        ));

        // revoked
        svc.revoke_token(&token).await.unwrap();
        assert!(matches!(
            svc.verify_token(&token).await,
            Err(AuthError::VerificationFailed)
        ));
    }

    #[tokio::test]
    async fn undecodable_secret_fails_verification() {
        let svc = service().await;
        let token = svc.issue_token("alice", "read", "").await.unwrap();
        let mut kp = svc.store().get_token(&Token::from(token.as_str())).await.unwrap();
        kp.secret = "zz-not-hex".into();
        svc.store().update_token(&kp).await.unwrap();
        assert!(matches!(
            svc.verify_token(&token).await,
            Err(AuthError::VerificationFailed)
        ));
    }

    #[tokio::test]
    async fn revoke_surfaces_storage_failures() {
        let mut store = MockStore::new();
        store
            .expect_delete_token()
            .returning(|_| Err(StoreError::Backend("disk gone".into())));
        let svc = AuthService::new(Arc::new(store));
        assert!(matches!(
            svc.revoke_token("t").await,
            Err(AuthError::RevocationFailed(StoreError::Backend(_)))
        ));
    }

    #[tokio::test]
    async fn issuance_returns_existing_live_token_unchanged() {
        let mut store = MockStore::new();
        store.expect_has_token().returning(|_| Ok(true));
        store.expect_put_token().never();
        let svc = AuthService::new(Arc::new(store));
        let token = svc.issue_token("alice", "read", "").await.unwrap();
        assert_eq!(token.split('.').count(), 3);
    }

    #[tokio::test]
    async fn token_views() {
        let svc = service().await;
        let t1 = svc.issue_token("alice", "read", "").await.unwrap();
        svc.issue_token("alice", "admin", "").await.unwrap();
        svc.issue_token("bob", "write", "").await.unwrap();

        let info = svc.get_token(&t1).await.unwrap();
        assert_eq!(info.name, "alice");
        assert_eq!(info.perm, "read");

        assert_eq!(svc.tokens_by_name("alice").await.unwrap().len(), 2);
        assert_eq!(svc.list_tokens(Page::default()).await.unwrap().len(), 3);
        assert_eq!(svc.list_tokens(Page::new(2, 0)).await.unwrap().len(), 1);

        svc.revoke_token(&t1).await.unwrap();
        assert!(matches!(
            svc.get_token(&t1).await,
            Err(AuthError::AlreadyDeleted)
        ));
    }

    #[tokio::test]
    async fn create_user_normalizes_miner() {
        let svc = service().await;
        let out = svc
            .create_user(&CreateUserRequest {
                name: "alice".into(),
                miner: "t01000".into(),
                state: UserState::Enabled,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(out.miner, "f01000");
        assert!(svc.has_miner("t01000").await.unwrap());
        assert_eq!(svc.get_miner("f01000").await.unwrap().name, "alice");
    }

    #[tokio::test]
    async fn create_user_rejects_bad_input() {
        let svc = service().await;
        assert!(matches!(
            svc.create_user(&CreateUserRequest {
                name: "alice".into(),
                miner: "not-an-address".into(),
                ..Default::default()
            })
            .await,
            Err(AuthError::InvalidAddress(_))
        ));
        assert!(matches!(
            svc.create_user(&CreateUserRequest::default()).await,
            Err(AuthError::InvalidRequest(_))
        ));
        assert!(matches!(
            svc.has_miner("garbage").await,
            Err(AuthError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn user_names_stay_taken_after_delete() {
        let svc = service().await;
        let req = CreateUserRequest {
            name: "alice".into(),
            ..Default::default()
        };
        svc.create_user(&req).await.unwrap();
        assert!(matches!(
            svc.create_user(&req).await,
            Err(AuthError::AlreadyExists)
        ));
        svc.delete_user("alice").await.unwrap();
        assert!(matches!(
            svc.create_user(&req).await,
            Err(AuthError::AlreadyExists)
        ));
        assert!(matches!(
            svc.get_user("alice").await,
            Err(AuthError::AlreadyDeleted)
        ));
        assert!(matches!(
            svc.get_user("nobody").await,
            Err(AuthError::NotFound)
        ));
    }

    #[tokio::test]
    async fn update_user_applies_only_masked_fields() {
        let svc = service().await;
        let created = svc
            .create_user(&CreateUserRequest {
                name: "alice".into(),
                miner: "f01000".into(),
                comment: "original".into(),
                state: UserState::Enabled,
                burst: 5,
                rate: 10,
                ..Default::default()
            })
            .await
            .unwrap();

        svc.update_user(&UpdateUserRequest {
            name: "alice".into(),
            mask: UpdateMask(UpdateMask::COMMENT | UpdateMask::RATE),
            miner: "f09999".into(),
            comment: "changed".into(),
            state: UserState::Disabled,
            burst: 99,
            rate: 20,
            ..Default::default()
        })
        .await
        .unwrap();

        let got = svc.get_user("alice").await.unwrap();
        assert_eq!(got.id, created.id);
        assert_eq!(got.comment, "changed");
        assert_eq!(got.rate, 20);
        assert_eq!(got.miner, "f01000");
        assert_eq!(got.state, UserState::Enabled);
        assert_eq!(got.burst, 5);
    }

    #[tokio::test]
    async fn update_user_revalidates_masked_miner() {
        let svc = service().await;
        svc.create_user(&CreateUserRequest {
            name: "alice".into(),
            ..Default::default()
        })
        .await
        .unwrap();

        let bad = UpdateUserRequest {
            name: "alice".into(),
            mask: UpdateMask(UpdateMask::MINER),
            miner: "f0x".into(),
            ..Default::default()
        };
        assert!(matches!(
            svc.update_user(&bad).await,
            Err(AuthError::InvalidAddress(_))
        ));

        let good = UpdateUserRequest {
            miner: "t02000".into(),
            ..bad
        };
        svc.update_user(&good).await.unwrap();
        assert_eq!(svc.get_user("alice").await.unwrap().miner, "f02000");
    }

    #[tokio::test]
    async fn rate_limit_passthrough() {
        let svc = service().await;
        let rule = RateLimitRule {
            id: String::new(),
            name: "alice".into(),
            service: "chain".into(),
            api: "*".into(),
            capacity: 100,
            reset_duration: std::time::Duration::from_secs(60),
        };
        let id = svc.upsert_rate_limit(&rule).await.unwrap();
        assert_eq!(svc.get_rate_limits("alice", Some(&id)).await.unwrap().len(), 1);
        svc.delete_rate_limit("alice", &id).await.unwrap();
        svc.delete_rate_limit("alice", &id).await.unwrap();
        assert!(svc.get_rate_limits("alice", None).await.unwrap().is_empty());

        let nameless = RateLimitRule {
            name: String::new(),
            ..rule
        };
        assert!(matches!(
            svc.upsert_rate_limit(&nameless).await,
            Err(AuthError::InvalidRequest(_))
        ));
    }
}
