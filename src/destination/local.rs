// backupengine/src/destination/local.rs
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Destination, StoreMetadata};
use crate::run::BackupRunRecord;

/// The durable file record for a locally stored artifact, written as a
/// `.meta.json` sidecar next to the stored copy.
#[derive(Debug, Serialize, Deserialize)]
struct LocalFileRecord {
    run_id: String,
    filename: String,
    stored_path: String,
    size_bytes: u64,
    metadata: StoreMetadata,
}

/// Filesystem destination: copies artifacts into `<base_dir>/<run_id>/`.
pub struct LocalDestination {
    identifier: String,
    base_dir: PathBuf,
}

impl LocalDestination {
    pub async fn new(identifier: impl Into<String>, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        tokio::fs::create_dir_all(&base_dir)
            .await
            .with_context(|| format!("Failed to create backup directory: {}", base_dir.display()))?;
        Ok(LocalDestination {
            identifier: identifier.into(),
            base_dir,
        })
    }

    fn record_path_for(stored_path: &str) -> String {
        format!("{}.meta.json", stored_path)
    }
}

#[async_trait]
impl Destination for LocalDestination {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn store(
        &self,
        run: &BackupRunRecord,
        artifact_path: &Path,
        filename: &str,
        _metadata: &StoreMetadata,
    ) -> Result<String> {
        let run_dir = self.base_dir.join(run.run_id.to_string());
        tokio::fs::create_dir_all(&run_dir)
            .await
            .with_context(|| format!("Failed to create run directory: {}", run_dir.display()))?;

        let target = run_dir.join(filename);
        tokio::fs::copy(artifact_path, &target)
            .await
            .with_context(|| {
                format!(
                    "Failed to copy {} to {}",
                    artifact_path.display(),
                    target.display()
                )
            })?;
        Ok(target.to_string_lossy().to_string())
    }

    async fn create_file_record(
        &self,
        run: &BackupRunRecord,
        filename: &str,
        stored_path: &str,
        size_bytes: u64,
        metadata: &StoreMetadata,
    ) -> Result<String> {
        let record = LocalFileRecord {
            run_id: run.run_id.to_string(),
            filename: filename.to_string(),
            stored_path: stored_path.to_string(),
            size_bytes,
            metadata: metadata.clone(),
        };
        let record_path = Self::record_path_for(stored_path);
        let tmp_path = format!("{}.tmp", record_path);

        let body = serde_json::to_vec_pretty(&record).context("Failed to serialize file record")?;
        tokio::fs::write(&tmp_path, &body)
            .await
            .with_context(|| format!("Failed to write file record: {}", tmp_path))?;
        tokio::fs::rename(&tmp_path, &record_path)
            .await
            .with_context(|| format!("Failed to move file record into place: {}", record_path))?;
        Ok(record_path)
    }

    async fn delete_file_record(&self, record_id: &str) -> Result<bool> {
        match tokio::fs::remove_file(record_id).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to delete file record: {}", record_id))
            }
        }
    }

    async fn delete_stored(&self, stored_path: &str) -> Result<()> {
        tokio::fs::remove_file(stored_path)
            .await
            .with_context(|| format!("Failed to delete stored copy: {}", stored_path))
    }

    async fn fetch(&self, stored_path: &str, local_dest: &Path) -> Result<PathBuf> {
        if let Some(parent) = local_dest.parent() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create fetch directory: {}", parent.display())
            })?;
        }
        tokio::fs::copy(stored_path, local_dest)
            .await
            .with_context(|| {
                format!("Failed to fetch {} to {}", stored_path, local_dest.display())
            })?;
        Ok(local_dest.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn destination_and_artifact() -> Result<(tempfile::TempDir, LocalDestination, PathBuf)> {
        let dir = tempfile::tempdir()?;
        let destination = LocalDestination::new("local", dir.path().join("backups")).await?;
        let artifact = dir.path().join("appdb_dump.sql.gz");
        tokio::fs::write(&artifact, b"dump bytes").await?;
        Ok((dir, destination, artifact))
    }

    #[tokio::test]
    async fn test_store_and_record_round_trip() -> Result<()> {
        let (_dir, destination, artifact) = destination_and_artifact().await?;
        let run = BackupRunRecord::new("appdb");
        let metadata = StoreMetadata::new("appdb_dump.sql.gz", 10);

        let stored = destination
            .store(&run, &artifact, "appdb_dump.sql.gz", &metadata)
            .await?;
        assert!(Path::new(&stored).exists());

        let record_id = destination
            .create_file_record(&run, "appdb_dump.sql.gz", &stored, 10, &metadata)
            .await?;
        let body = tokio::fs::read_to_string(&record_id).await?;
        let record: LocalFileRecord = serde_json::from_str(&body)?;
        assert_eq!(record.stored_path, stored);
        assert_eq!(record.size_bytes, 10);
        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_returns_stored_copy() -> Result<()> {
        let (dir, destination, artifact) = destination_and_artifact().await?;
        let run = BackupRunRecord::new("appdb");
        let metadata = StoreMetadata::new("appdb_dump.sql.gz", 10);

        let stored = destination
            .store(&run, &artifact, "appdb_dump.sql.gz", &metadata)
            .await?;
        let fetched = destination
            .fetch(&stored, &dir.path().join("restore").join("copy.sql.gz"))
            .await?;
        assert_eq!(tokio::fs::read(&fetched).await?, b"dump bytes");
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_record_and_stored_copy() -> Result<()> {
        let (_dir, destination, artifact) = destination_and_artifact().await?;
        let run = BackupRunRecord::new("appdb");
        let metadata = StoreMetadata::new("appdb_dump.sql.gz", 10);

        let stored = destination
            .store(&run, &artifact, "appdb_dump.sql.gz", &metadata)
            .await?;
        let record_id = destination
            .create_file_record(&run, "appdb_dump.sql.gz", &stored, 10, &metadata)
            .await?;

        assert!(destination.delete_file_record(&record_id).await?);
        // Second delete reports the record as already gone.
        assert!(!destination.delete_file_record(&record_id).await?);

        destination.delete_stored(&stored).await?;
        assert!(!Path::new(&stored).exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_store_does_not_consume_source() -> Result<()> {
        let (_dir, destination, artifact) = destination_and_artifact().await?;
        let run = BackupRunRecord::new("appdb");
        let metadata = StoreMetadata::new("appdb_dump.sql.gz", 10);

        destination
            .store(&run, &artifact, "appdb_dump.sql.gz", &metadata)
            .await?;
        // The source file is only read, never moved.
        assert!(artifact.exists());
        Ok(())
    }
}
