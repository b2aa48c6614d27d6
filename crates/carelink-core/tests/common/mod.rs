//! In-process remote store for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use carelink_core::cache::{LocalCache, MemoryBackup};
use carelink_core::config::FeatureConfig;
use carelink_core::db::LibSqlLocalCache;
use carelink_core::remote::{RemoteError, RemoteResult, RemoteRow, RemoteStore};
use carelink_core::sync::SyncCoordinator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Up,
    Down,
    Deny,
    /// Answer every call with this HTTP status
    Reject(u16),
    Hang,
}

#[derive(Debug)]
pub struct FakeRemote {
    rows: Mutex<HashMap<(String, String), RemoteRow>>,
    mode: Mutex<Mode>,
    upserts: AtomicUsize,
}

impl Default for FakeRemote {
    fn default() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            mode: Mutex::new(Mode::Up),
            upserts: AtomicUsize::new(0),
        }
    }
}

impl FakeRemote {
    pub fn set_mode(&self, mode: Mode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn insert(&self, table: &str, row: RemoteRow) {
        self.rows
            .lock()
            .unwrap()
            .insert((table.to_string(), row.key.clone()), row);
    }

    pub fn row(&self, table: &str, key: &str) -> Option<RemoteRow> {
        self.rows
            .lock()
            .unwrap()
            .get(&(table.to_string(), key.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    async fn gate(&self) -> RemoteResult<()> {
        let mode = *self.mode.lock().unwrap();
        match mode {
            Mode::Up => Ok(()),
            Mode::Down => Err(RemoteError::Unavailable("connection refused".to_string())),
            Mode::Deny => Err(RemoteError::PermissionDenied(
                "new row violates row-level security policy".to_string(),
            )),
            Mode::Reject(status) => Err(RemoteError::api(status, "rejected by fake remote")),
            Mode::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn fetch(&self, table: &str, key: &str) -> RemoteResult<Option<RemoteRow>> {
        self.gate().await?;
        Ok(self.row(table, key))
    }

    async fn find_by_field(
        &self,
        table: &str,
        field: &str,
        value: &str,
    ) -> RemoteResult<Vec<RemoteRow>> {
        self.gate().await?;
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .filter(|((row_table, _), row)| {
                row_table == table
                    && row.value.get(field).and_then(|v| v.as_str()) == Some(value)
            })
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn upsert(&self, table: &str, row: &RemoteRow) -> RemoteResult<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        self.insert(table, row.clone());
        Ok(())
    }

    async fn delete(&self, table: &str, key: &str) -> RemoteResult<()> {
        self.gate().await?;
        self.rows
            .lock()
            .unwrap()
            .remove(&(table.to_string(), key.to_string()));
        Ok(())
    }
}

pub struct Harness {
    pub remote: Arc<FakeRemote>,
    pub cache: Arc<LibSqlLocalCache>,
    pub memory: Arc<MemoryBackup>,
    pub coordinator: Arc<SyncCoordinator>,
}

impl Harness {
    pub async fn new(feature: FeatureConfig) -> Self {
        let remote = Arc::new(FakeRemote::default());
        let cache = Arc::new(LibSqlLocalCache::open_in_memory().await.unwrap());
        let memory = Arc::new(MemoryBackup::new());
        let coordinator = Arc::new(SyncCoordinator::new(
            feature,
            "device-local",
            Some(remote.clone() as Arc<dyn RemoteStore>),
            cache.clone() as Arc<dyn LocalCache>,
            memory.clone(),
        ));
        Self {
            remote,
            cache,
            memory,
            coordinator,
        }
    }

    /// Number of raw local cache entries under `prefix`
    pub async fn local_entries(&self, prefix: &str) -> usize {
        self.cache.entries(prefix).await.unwrap().len()
    }
}
