use std::path::PathBuf;
use std::sync::Arc;

use keyward_storage::{Store, StoreError};
use keyward_store_kv::KvStore;
use keyward_store_sqlite::SqliteStore;

use crate::config::DbConfig;

/// Which engine a database URL selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// `sqlite:...`, passed to sqlx unchanged.
    Sqlite(String),
    /// `kv://<path>` or a bare filesystem path.
    Kv(PathBuf),
}

impl StoreBackend {
    pub fn from_url(url: &str) -> Result<Self, StoreError> {
        if url.starts_with("sqlite:") {
            return Ok(StoreBackend::Sqlite(url.to_string()));
        }
        if let Some(path) = url.strip_prefix("kv://") {
            if path.is_empty() {
                return Err(StoreError::Invalid("kv:// url has no path".into()));
            }
            return Ok(StoreBackend::Kv(PathBuf::from(path)));
        }
        if url.is_empty() || url.contains("://") {
            return Err(StoreError::Invalid(format!("unsupported database url: {url:?}")));
        }
        Ok(StoreBackend::Kv(PathBuf::from(url)))
    }

    pub async fn open(&self, db: &DbConfig) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
        let store: Arc<dyn Store> = match self {
            StoreBackend::Sqlite(url) => {
                let opts = db.pool_options()?;
                Arc::new(SqliteStore::open_with(url, &opts).await?)
            }
            StoreBackend::Kv(path) => Arc::new(KvStore::open(path).await?),
        };
        tracing::info!(backend = ?self, "store opened");
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_selects_engine() {
        assert_eq!(
            StoreBackend::from_url("sqlite://auth.db?mode=rwc").unwrap(),
            StoreBackend::Sqlite("sqlite://auth.db?mode=rwc".into())
        );
        assert_eq!(
            StoreBackend::from_url("kv:///var/lib/keyward").unwrap(),
            StoreBackend::Kv("/var/lib/keyward".into())
        );
        assert_eq!(
            StoreBackend::from_url("./data").unwrap(),
            StoreBackend::Kv("./data".into())
        );
    }

    #[test]
    fn unknown_schemes_are_rejected() {
        for url in ["postgres://u@h/db", "mysql://root@localhost/auth", "kv://", ""] {
            assert!(
                matches!(StoreBackend::from_url(url), Err(StoreError::Invalid(_))),
                "{url}"
            );
        }
    }

    #[tokio::test]
    async fn opens_both_engines() {
        let dir = tempfile::tempdir().unwrap();
        let db = DbConfig::default();

        let sqlite_url = format!("sqlite://{}?mode=rwc", dir.path().join("a.db").display());
        let sqlite = StoreBackend::from_url(&sqlite_url).unwrap().open(&db).await.unwrap();
        assert!(!sqlite.has_user("alice").await.unwrap());

        let kv = StoreBackend::Kv(dir.path().join("kv")).open(&db).await.unwrap();
        assert!(!kv.has_user("alice").await.unwrap());
    }
}
