// backupengine/src/run/store.rs
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use uuid::Uuid;

use super::BackupRunRecord;

/// Persistence for run records.
///
/// `save` must be safe to call on every state change; the write that carries
/// a terminal status must land atomically (a reader sees either the previous
/// state or the terminal one, never a torn record).
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn load(&self, run_id: Uuid) -> Result<Option<BackupRunRecord>>;
    async fn save(&self, record: &BackupRunRecord) -> Result<()>;
}

/// Stores each run as `<dir>/<run_id>.json`, written to a temp file and
/// renamed into place so terminal-state writes are atomic.
pub struct JsonRunStore {
    dir: PathBuf,
}

impl JsonRunStore {
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create run log directory: {}", dir.display()))?;
        Ok(JsonRunStore { dir })
    }

    fn record_path(&self, run_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", run_id))
    }
}

#[async_trait]
impl RunStore for JsonRunStore {
    async fn load(&self, run_id: Uuid) -> Result<Option<BackupRunRecord>> {
        let path = self.record_path(run_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read run record: {}", path.display()));
            }
        };
        let record: BackupRunRecord = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse run record: {}", path.display()))?;
        Ok(Some(record))
    }

    async fn save(&self, record: &BackupRunRecord) -> Result<()> {
        let path = self.record_path(record.run_id);
        let tmp_path = self.dir.join(format!("{}.json.tmp", record.run_id));

        let body = serde_json::to_vec_pretty(record).context("Failed to serialize run record")?;
        tokio::fs::write(&tmp_path, &body)
            .await
            .with_context(|| format!("Failed to write run record: {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .with_context(|| format!("Failed to move run record into place: {}", path.display()))?;
        Ok(())
    }
}

/// In-memory store for tests and embedding.
#[derive(Default)]
pub struct MemoryRunStore {
    records: Mutex<HashMap<Uuid, BackupRunRecord>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        MemoryRunStore::default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn load(&self, run_id: Uuid) -> Result<Option<BackupRunRecord>> {
        Ok(self.records.lock().unwrap().get(&run_id).cloned())
    }

    async fn save(&self, record: &BackupRunRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .insert(record.run_id, record.clone());
        Ok(())
    }
}
