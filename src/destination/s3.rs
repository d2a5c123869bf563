// backupengine/src/destination/s3.rs
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::Region;
use s3::primitives::ByteStream;
use serde_json::json;
use tokio::io::AsyncWriteExt;

use super::{Destination, StoreMetadata};
use crate::config::S3StorageConfig;
use crate::run::BackupRunRecord;

/// S3-compatible object storage destination (AWS S3, DigitalOcean Spaces,
/// MinIO, ...). The durable file record is a companion `<key>.meta.json`
/// object in the same bucket.
pub struct S3Destination {
    identifier: String,
    client: s3::Client,
    bucket: String,
    folder_prefix: Option<String>,
}

impl S3Destination {
    pub async fn connect(identifier: impl Into<String>, config: &S3StorageConfig) -> Self {
        let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region.clone()))
            .credentials_provider(s3::config::Credentials::new(
                &config.access_key_id,
                &config.secret_access_key,
                None,
                None,
                "Static",
            ))
            .load()
            .await;

        S3Destination {
            identifier: identifier.into(),
            client: s3::Client::new(&sdk_config),
            bucket: config.bucket_name.clone(),
            folder_prefix: config.folder_prefix.clone(),
        }
    }

    fn object_key(&self, run: &BackupRunRecord, filename: &str) -> String {
        match &self.folder_prefix {
            Some(prefix) => format!(
                "{}/{}/{}",
                prefix.trim_end_matches('/'),
                run.run_id,
                filename
            ),
            None => format!("{}/{}", run.run_id, filename),
        }
    }
}

#[async_trait]
impl Destination for S3Destination {
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
        let key = self.object_key(run, filename);

        let body = ByteStream::from_path(artifact_path).await.with_context(|| {
            format!(
                "Failed to read artifact for upload: {}",
                artifact_path.display()
            )
        })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to upload {} to bucket {} with key {}",
                    artifact_path.display(),
                    self.bucket,
                    key
                )
            })?;

        Ok(key)
    }

    async fn create_file_record(
        &self,
        run: &BackupRunRecord,
        filename: &str,
        stored_path: &str,
        size_bytes: u64,
        metadata: &StoreMetadata,
    ) -> Result<String> {
        let record_key = format!("{}.meta.json", stored_path);
        let record = json!({
            "run_id": run.run_id.to_string(),
            "filename": filename,
            "stored_path": stored_path,
            "size_bytes": size_bytes,
            "metadata": metadata,
        });
        let body = serde_json::to_vec_pretty(&record).context("Failed to serialize file record")?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&record_key)
            .content_type("application/json")
            .body(ByteStream::from(body))
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to write file record to bucket {} with key {}",
                    self.bucket, record_key
                )
            })?;

        Ok(record_key)
    }

    async fn delete_file_record(&self, record_id: &str) -> Result<bool> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(record_id)
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to delete file record from bucket {}: {}",
                    self.bucket, record_id
                )
            })?;
        // S3 deletes are idempotent and do not report prior existence.
        Ok(true)
    }

    async fn delete_stored(&self, stored_path: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(stored_path)
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to delete stored copy from bucket {}: {}",
                    self.bucket, stored_path
                )
            })?;
        Ok(())
    }

    async fn fetch(&self, stored_path: &str, local_dest: &Path) -> Result<PathBuf> {
        if let Some(parent) = local_dest.parent() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create fetch directory: {}", parent.display())
            })?;
        }

        let mut object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(stored_path)
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to get object from bucket {}: {}",
                    self.bucket, stored_path
                )
            })?;

        let mut output_file = tokio::fs::File::create(local_dest)
            .await
            .with_context(|| {
                format!("Failed to create destination file: {}", local_dest.display())
            })?;

        while let Some(chunk) = object
            .body
            .try_next()
            .await
            .with_context(|| format!("Failed to read object body: {}", stored_path))?
        {
            output_file
                .write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write to {}", local_dest.display()))?;
        }
        output_file.flush().await?;

        Ok(local_dest.to_path_buf())
    }
}
