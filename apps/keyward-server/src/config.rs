//! Server configuration.
//!
//! Loaded from a TOML file (default `~/.keyward/config.toml`). A missing file is
//! created on first run with a freshly generated signing secret:
//!
//! ```toml
//! listen = "127.0.0.1:8989"
//! secret = "<64 hex chars>"
//! trusted_paths = []
//! verify_timeout = "10s"
//!
//! [db]
//! url = "sqlite://keyward.db?mode=rwc"   # or kv:///var/lib/keyward, or a bare path
//! max_open_conns = 10
//! max_idle_conns = 0
//! max_lifetime = "30m"
//! max_idle_time = "10m"
//! ```
//!
//! `--secret`/`KEYWARD_SECRET`, `--database-url`/`DATABASE_URL` and
//! `--listen`/`KEYWARD_LISTEN` override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use keyward_auth::jwt;
use keyward_store_sqlite::PoolOptions;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    /// Hex-encoded fallback secret for tokens stored without one.
    pub secret: String,
    /// Paths served without authentication. A trailing `/` trusts the subtree.
    pub trusted_paths: Vec<String>,
    pub verify_timeout: String,
    pub db: DbConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub url: String,
    pub max_open_conns: u32,
    pub max_idle_conns: u32,
    pub max_lifetime: String,
    pub max_idle_time: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8989".to_string(),
            secret: String::new(),
            trusted_paths: Vec::new(),
            verify_timeout: "10s".to_string(),
            db: DbConfig::default(),
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://keyward.db?mode=rwc".to_string(),
            max_open_conns: 10,
            max_idle_conns: 0,
            max_lifetime: "30m".to_string(),
            max_idle_time: "10m".to_string(),
        }
    }
}

/// Values taken from flags or the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub secret: Option<String>,
    pub database_url: Option<String>,
    pub listen: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot determine home directory")]
    NoHome,

    #[error("Config I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Cannot encode config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid secret: {0}")]
    InvalidSecret(String),

    #[error("Invalid duration for {field}: {value:?}")]
    InvalidDuration { field: &'static str, value: String },
}

impl ServerConfig {
    /// `~/.keyward/config.toml`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".keyward").join("config.toml"))
            .ok_or(ConfigError::NoHome)
    }

    /// Read `path`, or write a fresh default config there if it does not exist.
    pub fn load_or_init(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            return Ok(toml::from_str(&raw)?);
        }

        let config = Self::generate();
        config.save_to(path)?;
        tracing::info!(path = %path.display(), "wrote default config");
        Ok(config)
    }

    /// Defaults plus a new random secret.
    pub fn generate() -> Self {
        let secret = jwt::random_secret();
        Self {
            secret: hex::encode(&secret[..]),
            ..Self::default()
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?).map_err(io)
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(secret) = overrides.secret {
            self.secret = secret;
        }
        if let Some(url) = overrides.database_url {
            self.db.url = url;
        }
        if let Some(listen) = overrides.listen {
            self.listen = listen;
        }
    }

    /// Check everything that is parsed lazily.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret.is_empty() {
            return Err(ConfigError::InvalidSecret("secret is empty".into()));
        }
        hex::decode(&self.secret).map_err(|e| ConfigError::InvalidSecret(e.to_string()))?;
        self.verify_timeout()?;
        self.db.pool_options()?;
        Ok(())
    }

    pub fn verify_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration("verify_timeout", &self.verify_timeout)
    }
}

impl DbConfig {
    /// sqlx has no idle-connection cap, so `max_idle_conns` becomes the pool minimum.
    pub fn pool_options(&self) -> Result<PoolOptions, ConfigError> {
        let lifetime = parse_duration("db.max_lifetime", &self.max_lifetime)?;
        let idle = parse_duration("db.max_idle_time", &self.max_idle_time)?;
        Ok(PoolOptions {
            max_connections: self.max_open_conns.max(1),
            min_connections: self.max_idle_conns.min(self.max_open_conns),
            max_lifetime: (!lifetime.is_zero()).then_some(lifetime),
            idle_timeout: (!idle.is_zero()).then_some(idle),
        })
    }
}

/// `"500ms"`, `"30s"`, `"5m"`, `"1h"`; a bare number is seconds.
pub fn parse_duration(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration {
        field,
        value: value.to_string(),
    };
    let v = value.trim();
    let split = v.find(|c: char| !c.is_ascii_digit()).unwrap_or(v.len());
    let (digits, unit) = v.split_at(split);
    let n: u64 = digits.parse().map_err(|_| invalid())?;
    match unit {
        "ms" => Ok(Duration::from_millis(n)),
        "" | "s" => Ok(Duration::from_secs(n)),
        "m" => Ok(Duration::from_secs(n * 60)),
        "h" => Ok(Duration::from_secs(n * 3600)),
        _ => Err(invalid()),
    }
}
