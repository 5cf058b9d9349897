//! Embedded storage backend on sled.
//!
//! All records share one tree and are namespaced by key prefix:
//!
//! | prefix       | key               | value                                  |
//! |--------------|-------------------|----------------------------------------|
//! | `token:`     | token string      | JSON [`KeyPair`]                        |
//! | `user:`      | user name         | JSON [`User`]                           |
//! | `ratelimit:` | user name         | JSON map of rule id to [`RateLimitRule`] |
//!
//! Listings walk a prefix in key order. Miner lookups scan every user record; the user
//! set is expected to stay small.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use keyward_storage::{KeyPair, RateLimitRule, Store, StoreError, Token, User, UserFilter};
use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use tokio::task::JoinHandle;
use uuid::Uuid;

const TOKEN_PREFIX: &str = "token:";
const USER_PREFIX: &str = "user:";
const RATE_LIMIT_PREFIX: &str = "ratelimit:";

type RuleSet = BTreeMap<String, RateLimitRule>;

#[derive(Clone, Debug)]
pub struct KvOptions {
    /// How often the background task flushes dirty pages. `None` disables the task.
    pub flush_every: Option<Duration>,
}

impl Default for KvOptions {
    fn default() -> Self {
        Self {
            flush_every: Some(Duration::from_secs(5 * 60)),
        }
    }
}

pub struct KvStore {
    db: sled::Db,
    maintenance: Option<JoinHandle<()>>,
    /// Completed maintenance passes, successful or not.
    passes: Arc<AtomicU64>,
}

impl KvStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with(path, KvOptions::default()).await
    }

    pub async fn open_with(path: impl AsRef<Path>, opts: KvOptions) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let db = tokio::task::spawn_blocking(move || sled::Config::new().path(path).open())
            .await
            .map_err(join_err)?
            .map_err(backend)?;
        Ok(Self::start(db, opts))
    }

    /// A store whose files are removed when it is dropped.
    pub async fn open_temporary() -> Result<Self, StoreError> {
        let db = tokio::task::spawn_blocking(|| sled::Config::new().temporary(true).open())
            .await
            .map_err(join_err)?
            .map_err(backend)?;
        Ok(Self::start(db, KvOptions { flush_every: None }))
    }

    fn start(db: sled::Db, opts: KvOptions) -> Self {
        let passes = Arc::new(AtomicU64::new(0));
        let maintenance = opts
            .flush_every
            .map(|every| tokio::spawn(maintain(db.clone(), every, passes.clone())));
        Self {
            db,
            maintenance,
            passes,
        }
    }

    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(sled::Db) -> Result<T, StoreError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(db))
            .await
            .map_err(join_err)?
    }
}

impl Drop for KvStore {
    fn drop(&mut self) {
        if let Some(task) = self.maintenance.take() {
            task.abort();
        }
    }
}

/// Flush dirty pages every `every`. A failed pass is logged and retried on the next tick.
async fn maintain(db: sled::Db, every: Duration, passes: Arc<AtomicU64>) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match db.flush_async().await {
            Ok(bytes) => tracing::debug!(bytes, "kv store flushed"),
            Err(e) => tracing::warn!(error = %e, "kv store maintenance failed"),
        }
        passes.fetch_add(1, Ordering::Relaxed);
    }
}

fn backend(e: sled::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn join_err(e: tokio::task::JoinError) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn key(prefix: &str, id: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(prefix.len() + id.len());
    k.extend_from_slice(prefix.as_bytes());
    k.extend_from_slice(id.as_bytes());
    k
}

/// Records that carry a soft-delete flag.
trait SoftDelete: Serialize + DeserializeOwned {
    fn is_deleted(&self) -> bool;
    fn mark_deleted(&mut self);
}

impl SoftDelete for KeyPair {
    fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    fn mark_deleted(&mut self) {
        self.is_deleted = true;
    }
}

impl SoftDelete for User {
    fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    fn mark_deleted(&mut self) {
        self.is_deleted = true;
        self.updated_at = Utc::now();
    }
}

fn decode<R: DeserializeOwned>(raw: &[u8]) -> Result<R, StoreError> {
    Ok(serde_json::from_slice(raw)?)
}

fn get_live<R: SoftDelete>(db: &sled::Db, key: &[u8]) -> Result<R, StoreError> {
    let raw = db.get(key).map_err(backend)?.ok_or(StoreError::NotFound)?;
    let rec: R = decode(&raw)?;
    if rec.is_deleted() {
        return Err(StoreError::Deleted);
    }
    Ok(rec)
}

fn has_live<R: SoftDelete>(db: &sled::Db, key: &[u8]) -> Result<bool, StoreError> {
    match get_live::<R>(db, key) {
        Ok(_) => Ok(true),
        Err(e) if e.is_absent() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Insert only if the key is vacant, regardless of what state an existing record is in.
fn insert_new<R: Serialize>(db: &sled::Db, key: &[u8], rec: &R) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(rec)?;
    db.compare_and_swap(key, None as Option<&[u8]>, Some(bytes))
        .map_err(backend)?
        .map_err(|_| StoreError::AlreadyExists)
}

/// Read, check and rewrite a live record atomically.
fn modify_live<R, F>(db: &sled::Db, key: &[u8], f: F) -> Result<(), StoreError>
where
    R: SoftDelete,
    F: Fn(&mut R),
{
    let res = db.transaction(|tx| {
        let raw = tx
            .get(key)?
            .ok_or(ConflictableTransactionError::Abort(StoreError::NotFound))?;
        let mut rec: R = decode(&raw).map_err(ConflictableTransactionError::Abort)?;
        if rec.is_deleted() {
            return Err(ConflictableTransactionError::Abort(StoreError::Deleted));
        }
        f(&mut rec);
        let bytes = serde_json::to_vec(&rec)
            .map_err(|e| ConflictableTransactionError::Abort(StoreError::from(e)))?;
        tx.insert(key, bytes)?;
        Ok(())
    });
    match res {
        Ok(()) => Ok(()),
        Err(TransactionError::Abort(e)) => Err(e),
        Err(TransactionError::Storage(e)) => Err(backend(e)),
    }
}

/// Live records under `prefix` in key order.
fn scan_live<R: SoftDelete>(
    db: &sled::Db,
    prefix: &str,
) -> impl Iterator<Item = Result<R, StoreError>> {
    db.scan_prefix(prefix.as_bytes())
        .map(|item| {
            let (_, raw) = item.map_err(backend)?;
            decode::<R>(&raw)
        })
        .filter(|rec| !matches!(rec, Ok(r) if r.is_deleted()))
}

fn page<T>(
    iter: impl Iterator<Item = Result<T, StoreError>>,
    skip: u64,
    limit: u64,
) -> Result<Vec<T>, StoreError> {
    let skip = usize::try_from(skip).unwrap_or(usize::MAX);
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    iter.skip(skip).take(limit).collect()
}

fn decode_rules(raw: Option<&[u8]>) -> Result<RuleSet, StoreError> {
    match raw {
        Some(raw) => decode(raw),
        None => Ok(RuleSet::new()),
    }
}

/// Atomically rewrite a user's rule set. An emptied set removes the key.
fn update_rules<F>(db: &sled::Db, name: &str, mut f: F) -> Result<(), StoreError>
where
    F: FnMut(&mut RuleSet),
{
    let mut failure = None;
    db.update_and_fetch(key(RATE_LIMIT_PREFIX, name), |old| {
        failure = None;
        let mut rules = match decode_rules(old) {
            Ok(rules) => rules,
            Err(e) => {
                failure = Some(e);
                return old.map(|o| o.to_vec());
            }
        };
        f(&mut rules);
        if rules.is_empty() {
            return None;
        }
        match serde_json::to_vec(&rules) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                failure = Some(e.into());
                old.map(|o| o.to_vec())
            }
        }
    })
    .map_err(backend)?;
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[async_trait::async_trait]
impl Store for KvStore {
    // ───────────────────────────── Tokens ─────────────────────────────

    async fn put_token(&self, kp: &KeyPair) -> Result<(), StoreError> {
        let kp = kp.clone();
        self.run(move |db| insert_new(&db, &key(TOKEN_PREFIX, kp.token.as_str()), &kp))
            .await
    }

    async fn get_token(&self, token: &Token) -> Result<KeyPair, StoreError> {
        let k = key(TOKEN_PREFIX, token.as_str());
        self.run(move |db| get_live(&db, &k)).await
    }

    async fn has_token(&self, token: &Token) -> Result<bool, StoreError> {
        let k = key(TOKEN_PREFIX, token.as_str());
        self.run(move |db| has_live::<KeyPair>(&db, &k)).await
    }

    async fn delete_token(&self, token: &Token) -> Result<(), StoreError> {
        let k = key(TOKEN_PREFIX, token.as_str());
        self.run(move |db| modify_live(&db, &k, KeyPair::mark_deleted))
            .await
    }

    async fn update_token(&self, kp: &KeyPair) -> Result<(), StoreError> {
        let kp = kp.clone();
        self.run(move |db| {
            modify_live(&db, &key(TOKEN_PREFIX, kp.token.as_str()), |stored: &mut KeyPair| {
                stored.secret = kp.secret.clone();
                stored.name = kp.name.clone();
                stored.perm = kp.perm.clone();
                stored.extra = kp.extra.clone();
            })
        })
        .await
    }

    async fn list_tokens(&self, skip: u64, limit: u64) -> Result<Vec<KeyPair>, StoreError> {
        self.run(move |db| page(scan_live::<KeyPair>(&db, TOKEN_PREFIX), skip, limit))
            .await
    }

    async fn tokens_by_name(&self, name: &str) -> Result<Vec<KeyPair>, StoreError> {
        let name = name.to_string();
        self.run(move |db| {
            scan_live::<KeyPair>(&db, TOKEN_PREFIX)
                .filter(|kp| !matches!(kp, Ok(kp) if kp.name != name))
                .collect()
        })
        .await
    }

    // ───────────────────────────── Users ──────────────────────────────

    async fn put_user(&self, user: &User) -> Result<(), StoreError> {
        let user = user.clone();
        self.run(move |db| insert_new(&db, &key(USER_PREFIX, &user.name), &user))
            .await
    }

    async fn get_user(&self, name: &str) -> Result<User, StoreError> {
        let k = key(USER_PREFIX, name);
        self.run(move |db| get_live(&db, &k)).await
    }

    async fn update_user(&self, user: &User) -> Result<(), StoreError> {
        let user = user.clone();
        self.run(move |db| {
            modify_live(&db, &key(USER_PREFIX, &user.name), |stored: &mut User| {
                stored.miner = user.miner.clone();
                stored.comment = user.comment.clone();
                stored.source_type = user.source_type;
                stored.state = user.state;
                stored.burst = user.burst;
                stored.rate = user.rate;
                stored.updated_at = user.updated_at;
            })
        })
        .await
    }

    async fn delete_user(&self, name: &str) -> Result<(), StoreError> {
        let k = key(USER_PREFIX, name);
        self.run(move |db| modify_live(&db, &k, User::mark_deleted))
            .await
    }

    async fn has_user(&self, name: &str) -> Result<bool, StoreError> {
        let k = key(USER_PREFIX, name);
        self.run(move |db| has_live::<User>(&db, &k)).await
    }

    async fn list_users(&self, filter: &UserFilter) -> Result<Vec<User>, StoreError> {
        let filter = filter.clone();
        self.run(move |db| {
            let matching = scan_live::<User>(&db, USER_PREFIX)
                .filter(|u| !matches!(u, Ok(u) if !filter.matches(u)));
            page(matching, filter.page.skip, filter.page.limit)
        })
        .await
    }

    async fn get_user_by_miner(&self, miner: &str) -> Result<User, StoreError> {
        let miner = miner.to_string();
        self.run(move |db| {
            for user in scan_live::<User>(&db, USER_PREFIX) {
                let user = user?;
                if user.miner.as_deref() == Some(miner.as_str()) {
                    return Ok(user);
                }
            }
            Err(StoreError::NotFound)
        })
        .await
    }

    async fn has_miner(&self, miner: &str) -> Result<bool, StoreError> {
        match self.get_user_by_miner(miner).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    // ─────────────────────────── Rate limits ───────────────────────────

    async fn get_rate_limits<'a>(
        &self,
        name: &str,
        id: Option<&'a str>,
    ) -> Result<Vec<RateLimitRule>, StoreError> {
        let k = key(RATE_LIMIT_PREFIX, name);
        let id = id.map(str::to_string);
        self.run(move |db| {
            let raw = db.get(&k).map_err(backend)?;
            let mut rules = decode_rules(raw.as_deref())?;
            Ok(match id {
                Some(id) => rules.remove(&id).into_iter().collect(),
                None => rules.into_values().collect(),
            })
        })
        .await
    }

    async fn put_rate_limit(&self, rule: &RateLimitRule) -> Result<String, StoreError> {
        let mut rule = rule.clone();
        if rule.id.is_empty() {
            rule.id = Uuid::new_v4().to_string();
        }
        let id = rule.id.clone();
        self.run(move |db| {
            let name = rule.name.clone();
            update_rules(&db, &name, |rules| {
                rules.insert(rule.id.clone(), rule.clone());
            })
        })
        .await?;
        Ok(id)
    }

    async fn delete_rate_limit(&self, name: &str, id: &str) -> Result<(), StoreError> {
        let name = name.to_string();
        let id = id.to_string();
        self.run(move |db| {
            update_rules(&db, &name, |rules| {
                rules.remove(&id);
            })
        })
        .await
    }
}
