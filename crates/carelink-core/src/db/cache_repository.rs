//! Local cache repository implementation

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::cache::LocalCache;
use crate::error::Result;
use crate::util::unix_millis_now;

use super::Database;

/// libSQL implementation of `LocalCache`
#[derive(Clone)]
pub struct LibSqlLocalCache {
    db: Arc<Mutex<Database>>,
}

impl LibSqlLocalCache {
    /// Wrap an already shared database handle
    pub const fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    /// Open a cache backed by a database file
    pub async fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::open(path).await?;
        Ok(Self::new(Arc::new(Mutex::new(db))))
    }

    /// Open an in-memory cache (primarily for tests)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self::new(Arc::new(Mutex::new(db))))
    }

    /// Shared database handle, for other repositories on the same file
    pub fn database(&self) -> Arc<Mutex<Database>> {
        Arc::clone(&self.db)
    }
}

#[async_trait]
impl LocalCache for LibSqlLocalCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query("SELECT value FROM local_cache WHERE key = ?", [key])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get::<String>(0)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection()
            .execute(
                "INSERT INTO local_cache (key, value, updated_at) VALUES (?, ?, ?)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                libsql::params![key, value, unix_millis_now()],
            )
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let affected = db
            .connection()
            .execute("DELETE FROM local_cache WHERE key = ?", [key])
            .await?;
        Ok(affected > 0)
    }

    async fn entries(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT key, value FROM local_cache
                 WHERE substr(key, 1, length(?1)) = ?1
                 ORDER BY key",
                [prefix],
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push((row.get::<String>(0)?, row.get::<String>(1)?));
        }
        Ok(entries)
    }
}
