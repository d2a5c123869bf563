// backupengine/src/config/mod.rs
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::connection::ConnectionSpec;
use crate::delivery::{BackoffGrowth, RetryPolicy};
use crate::destination::{DestinationRegistry, LocalDestination, S3Destination};

// Structs for deserializing config.json
#[derive(Debug, Clone, Deserialize)]
pub struct JsonSourceConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub compress: Option<bool>,
    pub skipped_tables: Option<Vec<String>>,
    pub structure_only_tables: Option<Vec<String>>,
    pub label: Option<String>,
    pub driver_options: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonS3StorageConfig {
    pub bucket_name: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint_url: Option<String>,
    pub folder_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonLocalStorageConfig {
    pub base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRetryConfig {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub growth: Option<BackoffGrowth>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawJsonConfig {
    pub source: Option<JsonSourceConfig>,
    pub local_storage: Option<JsonLocalStorageConfig>,
    pub s3_storage: Option<JsonS3StorageConfig>,
    pub retry: Option<JsonRetryConfig>,
    pub cleanup_orphans: Option<bool>,
    pub run_log_dir: Option<PathBuf>,
}

// Application's internal configuration structs
#[derive(Debug, Clone)]
pub struct S3StorageConfig {
    pub endpoint_url: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    pub folder_prefix: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub source: ConnectionSpec,
    pub local_base_dir: Option<PathBuf>,
    pub s3_config: Option<S3StorageConfig>,
    pub retry_policy: RetryPolicy,
    pub cleanup_orphans: bool,
    pub run_log_dir: PathBuf,
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let raw: RawJsonConfig = serde_json::from_str(&config_content).with_context(|| {
            format!(
                "Failed to parse JSON from config file at {}",
                config_path.display()
            )
        })?;
        Self::from_raw(raw)
    }

    pub fn from_raw(raw: RawJsonConfig) -> Result<Self> {
        let source_raw = raw.source.context("source must be set in config.json")?;

        let source = ConnectionSpec::new(
            source_raw
                .host
                .context("source.host must be set in config.json")?,
            source_raw.port.unwrap_or(5432),
            source_raw
                .database
                .context("source.database must be set in config.json")?,
            source_raw
                .username
                .context("source.username must be set in config.json")?,
            source_raw.password.unwrap_or_default(),
            source_raw.compress.unwrap_or(true),
            source_raw
                .skipped_tables
                .unwrap_or_default()
                .into_iter()
                .collect::<BTreeSet<_>>(),
            source_raw
                .structure_only_tables
                .unwrap_or_default()
                .into_iter()
                .collect::<BTreeSet<_>>(),
            source_raw.label.filter(|s| !s.is_empty()),
            source_raw.driver_options.unwrap_or_default(),
        )?;

        let s3_config = raw.s3_storage.as_ref().and_then(build_s3_config);

        let local_base_dir = raw
            .local_storage
            .and_then(|l| l.base_dir)
            .filter(|p| !p.as_os_str().is_empty());

        if local_base_dir.is_none() && s3_config.is_none() {
            anyhow::bail!(
                "No storage destination configured: set local_storage.base_dir and/or a complete s3_storage block in config.json."
            );
        }

        let retry = raw.retry.unwrap_or(JsonRetryConfig {
            max_attempts: None,
            base_delay_ms: None,
            max_delay_ms: None,
            growth: None,
        });
        let defaults = RetryPolicy::default();
        let retry_policy = RetryPolicy::new(
            retry.max_attempts.unwrap_or(defaults.max_attempts()),
            retry
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(Duration::from_millis(1_000)),
            retry
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(Duration::from_millis(60_000)),
            retry.growth.unwrap_or(BackoffGrowth::Exponential),
        );

        Ok(AppConfig {
            source,
            local_base_dir,
            s3_config,
            retry_policy,
            cleanup_orphans: raw.cleanup_orphans.unwrap_or(true),
            run_log_dir: raw.run_log_dir.unwrap_or_else(|| PathBuf::from("./runs")),
        })
    }

    /// Builds the ordered destination registry: local storage first (when
    /// configured), then object storage.
    pub async fn build_registry(&self) -> Result<DestinationRegistry> {
        let mut registry = DestinationRegistry::new();
        if let Some(base_dir) = &self.local_base_dir {
            registry.register(std::sync::Arc::new(
                LocalDestination::new("local", base_dir.clone()).await?,
            ));
        }
        if let Some(s3_config) = &self.s3_config {
            registry.register(std::sync::Arc::new(
                S3Destination::connect("s3", s3_config).await,
            ));
        }
        Ok(registry)
    }
}

fn build_s3_config(s3_raw: &JsonS3StorageConfig) -> Option<S3StorageConfig> {
    if let (Some(bucket), Some(region), Some(key_id), Some(secret), Some(endpoint)) = (
        s3_raw.bucket_name.as_ref().filter(|s| !s.is_empty()),
        s3_raw.region.as_ref().filter(|s| !s.is_empty()),
        s3_raw.access_key_id.as_ref().filter(|s| !s.is_empty()),
        s3_raw.secret_access_key.as_ref().filter(|s| !s.is_empty()),
        s3_raw.endpoint_url.as_ref().filter(|s| !s.is_empty()),
    ) {
        Some(S3StorageConfig {
            bucket_name: bucket.clone(),
            region: region.clone(),
            access_key_id: key_id.clone(),
            secret_access_key: secret.clone(),
            endpoint_url: endpoint.clone(),
            folder_prefix: s3_raw.folder_prefix.clone().filter(|s| !s.is_empty()),
        })
    } else {
        if s3_raw.bucket_name.is_some()
            || s3_raw.region.is_some()
            || s3_raw.access_key_id.is_some()
            || s3_raw.secret_access_key.is_some()
            || s3_raw.endpoint_url.is_some()
        {
            // Only warn when some S3 fields were provided but incomplete.
            println!(
                "S3 configuration is present in config.json but some required fields (bucket_name, region, access_key_id, secret_access_key, endpoint_url) are missing or empty. The S3 destination will be disabled."
            );
        }
        None
    }
}
