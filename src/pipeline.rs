// backupengine/src/pipeline.rs
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::delivery::{describe_outcomes, DeliveryOrchestrator};
use crate::destination::DestinationRegistry;
use crate::dump::{ArtifactHandle, DumpProducer};
use crate::errors::{PipelineError, Result};
use crate::events::{ConsoleEventSink, EventSink, PipelineEvent};
use crate::run::store::{JsonRunStore, RunStore};
use crate::run::{BackupRunRecord, DestinationOutcome};

/// Runs one backup: dump the source, deliver to every enabled destination,
/// aggregate, release the workspace, report per destination.
pub async fn run_backup_flow(config: &AppConfig) -> Result<BackupRunRecord> {
    let events: Arc<dyn EventSink> = Arc::new(ConsoleEventSink);
    let store: Arc<dyn RunStore> = Arc::new(JsonRunStore::new(&config.run_log_dir).await?);
    let registry = config.build_registry().await?;
    let cancel = CancellationToken::new();

    let run = run_backup_with(config, &registry, events, store, &cancel).await?;
    for line in describe_outcomes(run.status, &run.outcomes) {
        println!("{}", line);
    }
    Ok(run)
}

/// Backup flow with injectable collaborators. `run_backup_flow` wires the
/// defaults; embedders and tests supply their own.
pub async fn run_backup_with(
    config: &AppConfig,
    registry: &DestinationRegistry,
    events: Arc<dyn EventSink>,
    store: Arc<dyn RunStore>,
    cancel: &CancellationToken,
) -> Result<BackupRunRecord> {
    let mut run = BackupRunRecord::new(config.source.source_name());
    store.save(&run).await?;
    events.emit(PipelineEvent::RunStarted {
        run_id: run.run_id,
        source: run.source.clone(),
    });

    let orchestrator = DeliveryOrchestrator::new(
        config.retry_policy.clone(),
        config.cleanup_orphans,
        events.clone(),
        store.clone(),
    );

    run.mark_running()?;
    store.save(&run).await?;

    let artifact = match DumpProducer::produce(&config.source).await {
        Ok(artifact) => artifact,
        Err(e) => {
            // Pre-delivery failure: no destination attempted. The run still
            // reaches its terminal state through the one aggregation path,
            // and `produce` already dropped its workspace.
            events.emit(PipelineEvent::RunFailed {
                run_id: run.run_id,
                error: e.to_string(),
            });
            orchestrator.finalize_run(&mut run, BTreeMap::new()).await?;
            return Err(e);
        }
    };

    println!(
        "📂 Dump ready: {} ({} bytes)",
        artifact.filename(),
        artifact.size_bytes()
    );

    deliver_and_release(&orchestrator, &mut run, artifact, registry, cancel).await?;
    Ok(run)
}

/// Delivery plus the workspace-release ordering guarantee: the artifact is
/// released after aggregation on every path, including delivery errors.
async fn deliver_and_release(
    orchestrator: &DeliveryOrchestrator,
    run: &mut BackupRunRecord,
    artifact: ArtifactHandle,
    registry: &DestinationRegistry,
    cancel: &CancellationToken,
) -> Result<BTreeMap<String, DestinationOutcome>> {
    let delivery = orchestrator.deliver(run, &artifact, registry, cancel).await;
    let released = artifact.release();
    let outcomes = delivery?;
    released?;
    Ok(outcomes)
}

/// Standalone size estimation for capacity planning.
pub async fn run_estimate_flow(config: &AppConfig) -> Result<u64> {
    let bytes = DumpProducer::estimate_size(&config.source).await?;
    let tables = DumpProducer::get_tables(&config.source).await?;
    println!(
        "📊 Estimated size of {}: {} bytes across {} tables",
        config.source.source_name(),
        bytes,
        tables.len()
    );
    Ok(bytes)
}

/// Retrieves a stored artifact copy from a named destination.
pub async fn run_fetch_flow(
    config: &AppConfig,
    destination_id: &str,
    stored_path: &str,
    dest_dir: &Path,
) -> Result<PathBuf> {
    let registry = config.build_registry().await?;
    let destination = registry.find(destination_id).ok_or_else(|| {
        PipelineError::InvalidInput(format!("unknown destination: {}", destination_id))
    })?;

    let filename = Path::new(stored_path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| {
            PipelineError::InvalidInput(format!("stored path has no filename: {}", stored_path))
        })?;

    let local_path = destination
        .fetch(stored_path, &dest_dir.join(filename))
        .await?;
    println!(
        "✅ Fetched {} from [{}] to {}",
        stored_path,
        destination_id,
        local_path.display()
    );
    Ok(local_path)
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};
    use std::io::Write;

    use super::*;
    use crate::connection::ConnectionSpec;
    use crate::delivery::{BackoffGrowth, RetryPolicy};
    use crate::destination::LocalDestination;
    use crate::events::ChannelEventSink;
    use crate::run::store::MemoryRunStore;
    use crate::run::RunStatus;

    fn unreachable_config(run_log_dir: PathBuf, local_dir: PathBuf) -> AppConfig {
        AppConfig {
            source: ConnectionSpec::new(
                "127.0.0.1",
                1,
                "appdb",
                "backup",
                "secret",
                true,
                BTreeSet::new(),
                BTreeSet::new(),
                None,
                BTreeMap::new(),
            )
            .unwrap(),
            local_base_dir: Some(local_dir),
            s3_config: None,
            retry_policy: RetryPolicy::new(
                2,
                std::time::Duration::from_millis(1),
                std::time::Duration::from_millis(2),
                BackoffGrowth::Fixed,
            ),
            cleanup_orphans: true,
            run_log_dir,
        }
    }

    fn test_artifact() -> ArtifactHandle {
        let workspace = tempfile::Builder::new()
            .prefix("pipeline_test_")
            .tempdir()
            .unwrap();
        let path = workspace.path().join("appdb_dump.sql.gz");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"dump bytes").unwrap();
        ArtifactHandle::new(workspace, path).unwrap()
    }

    fn orchestrator(store: Arc<MemoryRunStore>) -> DeliveryOrchestrator {
        DeliveryOrchestrator::new(
            RetryPolicy::new(
                2,
                std::time::Duration::from_millis(1),
                std::time::Duration::from_millis(2),
                BackoffGrowth::Fixed,
            ),
            true,
            Arc::new(crate::events::NullEventSink),
            store,
        )
    }

    #[tokio::test]
    async fn test_workspace_released_after_delivery() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = Arc::new(MemoryRunStore::new());
        let orchestrator = orchestrator(store.clone());

        let mut registry = DestinationRegistry::new();
        registry.register(Arc::new(
            LocalDestination::new("local", dir.path().join("backups")).await?,
        ));

        let mut run = BackupRunRecord::new("appdb");
        run.mark_running()?;
        let artifact = test_artifact();
        let workspace_path = artifact.path().parent().unwrap().to_path_buf();
        let cancel = CancellationToken::new();

        let outcomes =
            deliver_and_release(&orchestrator, &mut run, artifact, &registry, &cancel).await?;

        assert_eq!(run.status, RunStatus::Completed);
        assert!(outcomes["local"].success);
        // Stored copy survives, workspace does not.
        let stored = outcomes["local"].stored_path.as_deref().unwrap();
        assert!(Path::new(stored).exists());
        assert!(!workspace_path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_workspace_released_with_zero_destinations() -> Result<()> {
        let store = Arc::new(MemoryRunStore::new());
        let orchestrator = orchestrator(store.clone());
        let registry = DestinationRegistry::new();

        let mut run = BackupRunRecord::new("appdb");
        run.mark_running()?;
        let artifact = test_artifact();
        let workspace_path = artifact.path().parent().unwrap().to_path_buf();
        let cancel = CancellationToken::new();

        let outcomes =
            deliver_and_release(&orchestrator, &mut run, artifact, &registry, &cancel).await?;

        assert!(outcomes.is_empty());
        assert_eq!(run.status, RunStatus::Failed);
        assert!(!workspace_path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_dump_failure_reaches_failed_through_aggregation() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = unreachable_config(
            dir.path().join("runs"),
            dir.path().join("backups"),
        );
        let registry = config.build_registry().await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let store = Arc::new(MemoryRunStore::new());
        let cancel = CancellationToken::new();

        let result = run_backup_with(
            &config,
            &registry,
            Arc::new(ChannelEventSink::new(tx)),
            store.clone(),
            &cancel,
        )
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err, PipelineError::Connection(_)));

        // The persisted record reached Failed through the aggregation path.
        let mut saw_run_failed = false;
        let mut saw_processed = false;
        let mut run_id = None;
        while let Ok(event) = rx.try_recv() {
            match event {
                PipelineEvent::RunFailed { run_id: id, .. } => {
                    saw_run_failed = true;
                    run_id = Some(id);
                }
                PipelineEvent::AllDestinationsProcessed {
                    status, outcomes, ..
                } => {
                    saw_processed = true;
                    assert_eq!(status, RunStatus::Failed);
                    assert!(outcomes.is_empty());
                }
                _ => {}
            }
        }
        assert!(saw_run_failed);
        assert!(saw_processed);

        let saved = store.load(run_id.unwrap()).await?.expect("record saved");
        assert_eq!(saved.status, RunStatus::Failed);
        assert!(saved.outcomes.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_flow_unknown_destination() {
        let dir = tempfile::tempdir().unwrap();
        let config = unreachable_config(
            dir.path().join("runs"),
            dir.path().join("backups"),
        );
        let result = run_fetch_flow(&config, "offsite", "/backups/a.sql.gz", dir.path()).await;
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_fetch_flow_round_trip_via_local() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = unreachable_config(
            dir.path().join("runs"),
            dir.path().join("backups"),
        );
        let registry = config.build_registry().await.unwrap();
        let destination = registry.find("local").unwrap();

        // Store a copy through the destination, then fetch it back by path.
        let run = BackupRunRecord::new("appdb");
        let artifact_path = dir.path().join("appdb_dump.sql.gz");
        tokio::fs::write(&artifact_path, b"dump bytes").await?;
        let metadata = crate::destination::StoreMetadata::new("appdb_dump.sql.gz", 10);
        let stored = destination
            .store(&run, &artifact_path, "appdb_dump.sql.gz", &metadata)
            .await?;

        let fetched =
            run_fetch_flow(&config, "local", &stored, &dir.path().join("restore")).await?;
        assert_eq!(tokio::fs::read(&fetched).await?, b"dump bytes");
        Ok(())
    }
}
