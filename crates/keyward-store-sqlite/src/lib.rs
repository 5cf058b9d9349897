use std::time::Duration;

use chrono::{DateTime, Utc};
use keyward_storage::{
    KeyPair, RateLimitRule, SourceType, Store, StoreError, Token, User, UserFilter, UserId,
    UserState,
};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use uuid::Uuid;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Connection pool sizing.
#[derive(Clone, Debug)]
pub struct PoolOptions {
    pub max_connections: u32,
    pub min_connections: u32,
    pub max_lifetime: Option<Duration>,
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            max_lifetime: Some(Duration::from_secs(30 * 60)),
            idle_timeout: Some(Duration::from_secs(10 * 60)),
        }
    }
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Single long-lived connection; every pooled connection would otherwise get its own
    /// empty database.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::open_with(
            "sqlite::memory:",
            &PoolOptions {
                max_connections: 1,
                min_connections: 1,
                max_lifetime: None,
                idle_timeout: None,
            },
        )
        .await
    }

    pub async fn open(url: &str) -> Result<Self, StoreError> {
        Self::open_with(url, &PoolOptions::default()).await
    }

    pub async fn open_with(url: &str, opts: &PoolOptions) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(opts.max_connections)
            .min_connections(opts.min_connections)
            .max_lifetime(opts.max_lifetime)
            .idle_timeout(opts.idle_timeout)
            .connect(url)
            .await
            .map_err(backend)?;

        MIGRATOR.run(&pool).await.map_err(|e| StoreError::Backend(e.to_string()))?;
        tracing::debug!(url, "sqlite store ready");

        Ok(Self { pool })
    }

    async fn token_deleted(&self, token: &Token) -> Result<Option<bool>, StoreError> {
        let row: Option<(bool,)> = sqlx::query_as("SELECT is_deleted FROM tokens WHERE token=?")
            .bind(token.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.map(|(d,)| d))
    }

    async fn user_deleted(&self, name: &str) -> Result<Option<bool>, StoreError> {
        let row: Option<(bool,)> = sqlx::query_as("SELECT is_deleted FROM users WHERE name=?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.map(|(d,)| d))
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn insert_err(e: sqlx::Error) -> StoreError {
    let s = e.to_string();
    if s.contains("UNIQUE") {
        StoreError::AlreadyExists
    } else {
        StoreError::Backend(s)
    }
}

/// Why a guarded write touched nothing.
fn absent(deleted: Option<bool>) -> StoreError {
    match deleted {
        Some(true) => StoreError::Deleted,
        _ => StoreError::NotFound,
    }
}

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

#[derive(sqlx::FromRow)]
struct TokenRow {
    token: String,
    secret: String,
    name: String,
    perm: String,
    extra: String,
    created_at: DateTime<Utc>,
    is_deleted: bool,
}

impl From<TokenRow> for KeyPair {
    fn from(r: TokenRow) -> Self {
        KeyPair {
            token: Token(r.token),
            secret: r.secret,
            name: r.name,
            perm: r.perm,
            extra: r.extra,
            created_at: r.created_at,
            is_deleted: r.is_deleted,
        }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    name: String,
    miner: Option<String>,
    comment: String,
    stype: i64,
    state: i64,
    burst: i64,
    rate: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    is_deleted: bool,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        let id = Uuid::try_parse(&r.id).map_err(|e| StoreError::Invalid(e.to_string()))?;
        let state = i32::try_from(r.state)
            .map_err(|e| StoreError::Invalid(e.to_string()))
            .and_then(UserState::try_from)?;
        let stype = i32::try_from(r.stype).map_err(|e| StoreError::Invalid(e.to_string()))?;
        Ok(User {
            id: UserId(id),
            name: r.name,
            miner: r.miner,
            comment: r.comment,
            source_type: SourceType(stype),
            state,
            burst: r.burst,
            rate: r.rate,
            created_at: r.created_at,
            updated_at: r.updated_at,
            is_deleted: r.is_deleted,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RuleRow {
    id: String,
    name: String,
    service: String,
    api: String,
    capacity: i64,
    reset_dur_ms: i64,
}

impl From<RuleRow> for RateLimitRule {
    fn from(r: RuleRow) -> Self {
        RateLimitRule {
            id: r.id,
            name: r.name,
            service: r.service,
            api: r.api,
            capacity: r.capacity,
            reset_duration: Duration::from_millis(r.reset_dur_ms.max(0) as u64),
        }
    }
}

const TOKEN_COLUMNS: &str = "token,secret,name,perm,extra,created_at,is_deleted";
const USER_COLUMNS: &str =
    "id,name,miner,comment,stype,state,burst,rate,created_at,updated_at,is_deleted";

#[async_trait::async_trait]
impl Store for SqliteStore {
    // ───────────────────────────── Tokens ─────────────────────────────

    async fn put_token(&self, kp: &KeyPair) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO tokens(token,secret,name,perm,extra,created_at,is_deleted)
             VALUES(?,?,?,?,?,?,?)",
        )
        .bind(kp.token.as_str())
        .bind(&kp.secret)
        .bind(&kp.name)
        .bind(&kp.perm)
        .bind(&kp.extra)
        .bind(kp.created_at)
        .bind(kp.is_deleted)
        .execute(&self.pool)
        .await
        .map_err(insert_err)?;
        Ok(())
    }

    async fn get_token(&self, token: &Token) -> Result<KeyPair, StoreError> {
        let row = sqlx::query_as::<_, TokenRow>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens WHERE token=?"
        ))
        .bind(token.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            None => Err(StoreError::NotFound),
            Some(r) if r.is_deleted => Err(StoreError::Deleted),
            Some(r) => Ok(r.into()),
        }
    }

    async fn has_token(&self, token: &Token) -> Result<bool, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM tokens WHERE token=? AND is_deleted=0")
                .bind(token.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(backend)?;
        Ok(count > 0)
    }

    async fn delete_token(&self, token: &Token) -> Result<(), StoreError> {
        let res = sqlx::query("UPDATE tokens SET is_deleted=1 WHERE token=? AND is_deleted=0")
            .bind(token.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if res.rows_affected() == 0 {
            return Err(absent(self.token_deleted(token).await?));
        }
        Ok(())
    }

    async fn update_token(&self, kp: &KeyPair) -> Result<(), StoreError> {
        let res = sqlx::query(
            "UPDATE tokens SET secret=?, name=?, perm=?, extra=?
             WHERE token=? AND is_deleted=0",
        )
        .bind(&kp.secret)
        .bind(&kp.name)
        .bind(&kp.perm)
        .bind(&kp.extra)
        .bind(kp.token.as_str())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        if res.rows_affected() == 0 {
            return Err(absent(self.token_deleted(&kp.token).await?));
        }
        Ok(())
    }

    async fn list_tokens(&self, skip: u64, limit: u64) -> Result<Vec<KeyPair>, StoreError> {
        let rows = sqlx::query_as::<_, TokenRow>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens
              WHERE is_deleted=0
              ORDER BY name, token
              LIMIT ? OFFSET ?"
        ))
        .bind(to_i64(limit))
        .bind(to_i64(skip))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows.into_iter().map(KeyPair::from).collect())
    }

    async fn tokens_by_name(&self, name: &str) -> Result<Vec<KeyPair>, StoreError> {
        let rows = sqlx::query_as::<_, TokenRow>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens WHERE name=? AND is_deleted=0 ORDER BY token"
        ))
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows.into_iter().map(KeyPair::from).collect())
    }

    // ───────────────────────────── Users ──────────────────────────────

    async fn put_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users(id,name,miner,comment,stype,state,burst,rate,created_at,updated_at,is_deleted)
             VALUES(?,?,?,?,?,?,?,?,?,?,?)",
        )
        .bind(user.id.0.to_string())
        .bind(&user.name)
        .bind(user.miner.as_deref())
        .bind(&user.comment)
        .bind(i64::from(user.source_type.0))
        .bind(i64::from(i32::from(user.state)))
        .bind(user.burst)
        .bind(user.rate)
        .bind(user.created_at)
        .bind(user.updated_at)
        .bind(user.is_deleted)
        .execute(&self.pool)
        .await
        .map_err(insert_err)?;
        Ok(())
    }

    async fn get_user(&self, name: &str) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE name=?"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            None => Err(StoreError::NotFound),
            Some(r) if r.is_deleted => Err(StoreError::Deleted),
            Some(r) => r.try_into(),
        }
    }

    async fn update_user(&self, user: &User) -> Result<(), StoreError> {
        let res = sqlx::query(
            "UPDATE users
                SET miner=?, comment=?, stype=?, state=?, burst=?, rate=?, updated_at=?
              WHERE name=? AND is_deleted=0",
        )
        .bind(user.miner.as_deref())
        .bind(&user.comment)
        .bind(i64::from(user.source_type.0))
        .bind(i64::from(i32::from(user.state)))
        .bind(user.burst)
        .bind(user.rate)
        .bind(user.updated_at)
        .bind(&user.name)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        if res.rows_affected() == 0 {
            return Err(absent(self.user_deleted(&user.name).await?));
        }
        Ok(())
    }

    async fn delete_user(&self, name: &str) -> Result<(), StoreError> {
        let res = sqlx::query(
            "UPDATE users SET is_deleted=1, updated_at=? WHERE name=? AND is_deleted=0",
        )
        .bind(Utc::now())
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        if res.rows_affected() == 0 {
            return Err(absent(self.user_deleted(name).await?));
        }
        Ok(())
    }

    async fn has_user(&self, name: &str) -> Result<bool, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM users WHERE name=? AND is_deleted=0")
                .bind(name)
                .fetch_one(&self.pool)
                .await
                .map_err(backend)?;
        Ok(count > 0)
    }

    async fn list_users(&self, filter: &UserFilter) -> Result<Vec<User>, StoreError> {
        use keyward_storage::FilterMask;

        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users
              WHERE is_deleted=0
                AND (?=0 OR stype=?)
                AND (?=0 OR state=?)
              ORDER BY created_at, name
              LIMIT ? OFFSET ?"
        ))
        .bind(filter.mask.has(FilterMask::SOURCE_TYPE))
        .bind(i64::from(filter.source_type.0))
        .bind(filter.mask.has(FilterMask::STATE))
        .bind(i64::from(i32::from(filter.state)))
        .bind(to_i64(filter.page.limit))
        .bind(to_i64(filter.page.skip))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(User::try_from).collect()
    }

    async fn get_user_by_miner(&self, miner: &str) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users
              WHERE miner=? AND is_deleted=0
              ORDER BY created_at, name
              LIMIT 1"
        ))
        .bind(miner)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.ok_or(StoreError::NotFound)?.try_into()
    }

    async fn has_miner(&self, miner: &str) -> Result<bool, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM users WHERE miner=? AND is_deleted=0")
                .bind(miner)
                .fetch_one(&self.pool)
                .await
                .map_err(backend)?;
        Ok(count > 0)
    }

    // ─────────────────────────── Rate limits ───────────────────────────

    async fn get_rate_limits<'a>(
        &self,
        name: &str,
        id: Option<&'a str>,
    ) -> Result<Vec<RateLimitRule>, StoreError> {
        let rows = match id {
            Some(id) => {
                sqlx::query_as::<_, RuleRow>(
                    "SELECT id,name,service,api,capacity,reset_dur_ms FROM user_rate_limits
                      WHERE name=? AND id=? AND is_deleted=0",
                )
                .bind(name)
                .bind(id)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, RuleRow>(
                    "SELECT id,name,service,api,capacity,reset_dur_ms FROM user_rate_limits
                      WHERE name=? AND is_deleted=0
                      ORDER BY id",
                )
                .bind(name)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(backend)?;

        Ok(rows.into_iter().map(RateLimitRule::from).collect())
    }

    async fn put_rate_limit(&self, rule: &RateLimitRule) -> Result<String, StoreError> {
        let id = if rule.id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            rule.id.clone()
        };
        let reset_ms = i64::try_from(rule.reset_duration.as_millis()).unwrap_or(i64::MAX);

        sqlx::query(
            "INSERT INTO user_rate_limits(id,name,service,api,capacity,reset_dur_ms,is_deleted)
             VALUES(?,?,?,?,?,?,0)
             ON CONFLICT(name,id)
             DO UPDATE SET service=excluded.service,
                           api=excluded.api,
                           capacity=excluded.capacity,
                           reset_dur_ms=excluded.reset_dur_ms,
                           is_deleted=0",
        )
        .bind(&id)
        .bind(&rule.name)
        .bind(&rule.service)
        .bind(&rule.api)
        .bind(rule.capacity)
        .bind(reset_ms)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(id)
    }

    async fn delete_rate_limit(&self, name: &str, id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE user_rate_limits SET is_deleted=1 WHERE name=? AND id=?")
            .bind(name)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }
}
