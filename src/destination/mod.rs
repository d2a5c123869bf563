// backupengine/src/destination/mod.rs
pub(crate) mod local;
pub(crate) mod s3;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::run::BackupRunRecord;

pub use local::LocalDestination;
pub use s3::S3Destination;

/// Metadata that travels with every stored artifact. Destinations may add
/// their own entries to `extra` (storage tier, checksum, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub filename: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl StoreMetadata {
    pub fn new(filename: impl Into<String>, size_bytes: u64) -> Self {
        StoreMetadata {
            filename: filename.into(),
            size_bytes,
            extra: BTreeMap::new(),
        }
    }
}

/// A storage backend that can receive a copy of the artifact.
///
/// Implementations never mutate or delete the source file handed to `store`;
/// they only read it. Errors are plain `anyhow` errors here — the
/// orchestrator owns retry classification and only persists the message.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Stable key, used in the per-destination outcome map.
    fn identifier(&self) -> &str;

    /// Whether this destination takes part in the given run.
    fn is_enabled(&self, _run: &BackupRunRecord) -> bool {
        true
    }

    /// Copies the artifact into the backend and returns the stored path.
    async fn store(
        &self,
        run: &BackupRunRecord,
        artifact_path: &Path,
        filename: &str,
        metadata: &StoreMetadata,
    ) -> Result<String>;

    /// Writes the durable record pairing the stored path with size and
    /// metadata. Returns the record id. A stored copy without this record is
    /// an orphan and counts as not delivered.
    async fn create_file_record(
        &self,
        run: &BackupRunRecord,
        filename: &str,
        stored_path: &str,
        size_bytes: u64,
        metadata: &StoreMetadata,
    ) -> Result<String>;

    /// Deletes a file record. Returns whether a record existed.
    async fn delete_file_record(&self, record_id: &str) -> Result<bool>;

    /// Removes a stored copy. Used for best-effort orphan cleanup.
    async fn delete_stored(&self, stored_path: &str) -> Result<()>;

    /// Retrieves a stored copy into `local_dest` and returns the local path.
    async fn fetch(&self, stored_path: &str, local_dest: &Path) -> Result<PathBuf>;
}

/// Ordered set of configured destinations for a deployment.
#[derive(Default)]
pub struct DestinationRegistry {
    destinations: Vec<Arc<dyn Destination>>,
}

impl DestinationRegistry {
    pub fn new() -> Self {
        DestinationRegistry::default()
    }

    pub fn register(&mut self, destination: Arc<dyn Destination>) {
        self.destinations.push(destination);
    }

    /// All registered destinations, in registration order.
    pub fn all(&self) -> &[Arc<dyn Destination>] {
        &self.destinations
    }

    /// Destinations taking part in `run`, preserving registration order.
    pub fn enabled_for(&self, run: &BackupRunRecord) -> Vec<Arc<dyn Destination>> {
        self.destinations
            .iter()
            .filter(|d| d.is_enabled(run))
            .cloned()
            .collect()
    }

    pub fn find(&self, identifier: &str) -> Option<Arc<dyn Destination>> {
        self.destinations
            .iter()
            .find(|d| d.identifier() == identifier)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubDestination {
        id: String,
        enabled: bool,
    }

    #[async_trait]
    impl Destination for StubDestination {
        fn identifier(&self) -> &str {
            &self.id
        }

        fn is_enabled(&self, _run: &BackupRunRecord) -> bool {
            self.enabled
        }

        async fn store(
            &self,
            _run: &BackupRunRecord,
            _artifact_path: &Path,
            filename: &str,
            _metadata: &StoreMetadata,
        ) -> Result<String> {
            Ok(format!("stub://{}/{}", self.id, filename))
        }

        async fn create_file_record(
            &self,
            _run: &BackupRunRecord,
            _filename: &str,
            stored_path: &str,
            _size_bytes: u64,
            _metadata: &StoreMetadata,
        ) -> Result<String> {
            Ok(format!("{}.record", stored_path))
        }

        async fn delete_file_record(&self, _record_id: &str) -> Result<bool> {
            Ok(true)
        }

        async fn delete_stored(&self, _stored_path: &str) -> Result<()> {
            Ok(())
        }

        async fn fetch(&self, _stored_path: &str, local_dest: &Path) -> Result<PathBuf> {
            Ok(local_dest.to_path_buf())
        }
    }

    fn stub(id: &str, enabled: bool) -> Arc<dyn Destination> {
        Arc::new(StubDestination {
            id: id.to_string(),
            enabled,
        })
    }

    #[test]
    fn test_enabled_for_preserves_order_and_filters() {
        let mut registry = DestinationRegistry::new();
        registry.register(stub("local", true));
        registry.register(stub("s3", false));
        registry.register(stub("offsite", true));

        let run = BackupRunRecord::new("appdb");
        let enabled = registry.enabled_for(&run);
        let ids: Vec<&str> = enabled.iter().map(|d| d.identifier()).collect();
        assert_eq!(ids, vec!["local", "offsite"]);
    }

    #[test]
    fn test_find_by_identifier() {
        let mut registry = DestinationRegistry::new();
        registry.register(stub("local", true));
        assert!(registry.find("local").is_some());
        assert!(registry.find("missing").is_none());
    }
}
