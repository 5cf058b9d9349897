//! The Store trait that backends implement.

use crate::types::*;
use crate::StoreError;

/// The storage trait the credential service depends on.
///
/// Tokens are keyed by their own value, users by name. Rate-limit rules are
/// grouped per user and addressed by rule id within that group.
#[cfg_attr(feature = "test-support", mockall::automock)]
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    // ───────────────────────────────────── Tokens ─────────────────────────────────────────

    /// Insert a token record.
    async fn put_token(&self, kp: &KeyPair) -> Result<(), StoreError>;

    /// Get a live token record. Deleted records fail with [`StoreError::Deleted`].
    async fn get_token(&self, token: &Token) -> Result<KeyPair, StoreError>;

    /// True only for a live (not deleted) record.
    async fn has_token(&self, token: &Token) -> Result<bool, StoreError>;

    /// Soft-delete a token.
    async fn delete_token(&self, token: &Token) -> Result<(), StoreError>;

    /// Rewrite a live token record in place (used by the secret backfill).
    async fn update_token(&self, kp: &KeyPair) -> Result<(), StoreError>;

    /// Page over live tokens, skipping the first `skip` live records.
    async fn list_tokens(&self, skip: u64, limit: u64) -> Result<Vec<KeyPair>, StoreError>;

    /// All live tokens issued to `name`.
    async fn tokens_by_name(&self, name: &str) -> Result<Vec<KeyPair>, StoreError>;

    // ───────────────────────────────────── Users ──────────────────────────────────────────

    /// Create a user. Fails with [`StoreError::AlreadyExists`] if any record, deleted or
    /// not, already holds the name.
    async fn put_user(&self, user: &User) -> Result<(), StoreError>;

    /// Get a live user by name.
    async fn get_user(&self, name: &str) -> Result<User, StoreError>;

    /// Overwrite a live user. The stored id is kept regardless of `user.id`.
    async fn update_user(&self, user: &User) -> Result<(), StoreError>;

    /// Soft-delete a user.
    async fn delete_user(&self, name: &str) -> Result<(), StoreError>;

    /// True only for a live user.
    async fn has_user(&self, name: &str) -> Result<bool, StoreError>;

    /// Page over live users matching `filter`.
    async fn list_users(&self, filter: &UserFilter) -> Result<Vec<User>, StoreError>;

    /// First live user bound to `miner` (canonical address string).
    async fn get_user_by_miner(&self, miner: &str) -> Result<User, StoreError>;

    /// True if any live user is bound to `miner`.
    async fn has_miner(&self, miner: &str) -> Result<bool, StoreError>;

    // ───────────────────────────────────── Rate limits ────────────────────────────────────

    /// All rules of `name`, or just rule `id` when given (empty if it doesn't exist).
    async fn get_rate_limits<'a>(
        &self,
        name: &str,
        id: Option<&'a str>,
    ) -> Result<Vec<RateLimitRule>, StoreError>;

    /// Insert or replace a rule, allocating an id when `rule.id` is empty. Returns the id.
    async fn put_rate_limit(&self, rule: &RateLimitRule) -> Result<String, StoreError>;

    /// Remove rule `id` from `name`'s set. Unknown ids are a no-op.
    async fn delete_rate_limit(&self, name: &str, id: &str) -> Result<(), StoreError>;
}
