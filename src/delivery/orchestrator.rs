// backupengine/src/delivery/orchestrator.rs
use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::retry::RetryPolicy;
use crate::destination::{Destination, DestinationRegistry, StoreMetadata};
use crate::dump::ArtifactHandle;
use crate::errors::{PipelineError, Result};
use crate::events::{EventSink, PipelineEvent};
use crate::run::store::RunStore;
use crate::run::{BackupRunRecord, DestinationOutcome, RunStatus};

/// Fans the artifact out to every enabled destination and aggregates the
/// per-destination outcome map.
///
/// Destinations are processed one after another; each one's retry loop and
/// backoff sleeps are local to it, and no destination's failure ever aborts
/// the others. The caller keeps the artifact alive until [`deliver`] returns
/// and releases it afterwards — aggregation always runs before cleanup, even
/// on cancellation.
///
/// [`deliver`]: DeliveryOrchestrator::deliver
pub struct DeliveryOrchestrator {
    policy: RetryPolicy,
    cleanup_orphans: bool,
    events: Arc<dyn EventSink>,
    store: Arc<dyn RunStore>,
}

impl DeliveryOrchestrator {
    pub fn new(
        policy: RetryPolicy,
        cleanup_orphans: bool,
        events: Arc<dyn EventSink>,
        store: Arc<dyn RunStore>,
    ) -> Self {
        DeliveryOrchestrator {
            policy,
            cleanup_orphans,
            events,
            store,
        }
    }

    /// Delivers the artifact to every enabled destination, then finalizes
    /// the run and returns the outcome map.
    pub async fn deliver(
        &self,
        run: &mut BackupRunRecord,
        artifact: &ArtifactHandle,
        registry: &DestinationRegistry,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, DestinationOutcome>> {
        let destinations = registry.enabled_for(run);
        let mut outcomes = BTreeMap::new();

        for destination in &destinations {
            let outcome = if cancel.is_cancelled() {
                DestinationOutcome::failed("run cancelled before delivery".to_string(), 0)
            } else {
                self.deliver_to_destination(run, artifact, destination.as_ref(), cancel)
                    .await
            };
            outcomes.insert(destination.identifier().to_string(), outcome);
        }

        self.finalize_run(run, outcomes).await
    }

    /// The single terminal-state path: computes the overall status from the
    /// outcome map, persists the record, and emits the aggregation event.
    ///
    /// Pre-delivery failures reuse this with an empty map ("zero destinations
    /// attempted, zero successes"), so every run — including a failed dump —
    /// reaches its terminal state through this one function.
    pub async fn finalize_run(
        &self,
        run: &mut BackupRunRecord,
        outcomes: BTreeMap<String, DestinationOutcome>,
    ) -> Result<BTreeMap<String, DestinationOutcome>> {
        let status = run.finalize(outcomes)?;
        self.store.save(run).await?;
        self.events.emit(PipelineEvent::AllDestinationsProcessed {
            run_id: run.run_id,
            status,
            outcomes: run.outcomes.clone(),
        });
        Ok(run.outcomes.clone())
    }

    async fn deliver_to_destination(
        &self,
        run: &BackupRunRecord,
        artifact: &ArtifactHandle,
        destination: &dyn Destination,
        cancel: &CancellationToken,
    ) -> DestinationOutcome {
        let destination_id = destination.identifier().to_string();
        self.events.emit(PipelineEvent::DestinationStarted {
            run_id: run.run_id,
            destination: destination_id.clone(),
        });

        let metadata = StoreMetadata::new(artifact.filename(), artifact.size_bytes());
        let max_attempts = self.policy.max_attempts();
        let mut last_error = String::new();
        let mut retries_used = 0;

        for attempt in 1..=max_attempts {
            retries_used = attempt - 1;

            match self
                .attempt_delivery(run, artifact, destination, &metadata)
                .await
            {
                Ok(stored_path) => {
                    self.events.emit(PipelineEvent::DestinationCompleted {
                        run_id: run.run_id,
                        destination: destination_id,
                        stored_path: stored_path.clone(),
                        size_bytes: artifact.size_bytes(),
                    });
                    return DestinationOutcome::succeeded(stored_path, retries_used);
                }
                Err(error) => {
                    let will_retry = attempt < max_attempts && !cancel.is_cancelled();
                    last_error = error;
                    self.events.emit(PipelineEvent::DestinationFailed {
                        run_id: run.run_id,
                        destination: destination_id.clone(),
                        error: last_error.clone(),
                        retry_count: retries_used,
                        will_retry,
                    });

                    if !will_retry {
                        break;
                    }

                    self.events.emit(PipelineEvent::DestinationRetry {
                        run_id: run.run_id,
                        destination: destination_id.clone(),
                        previous_error: last_error.clone(),
                        attempt: attempt + 1,
                    });

                    // The sleep is local to this destination's loop; a
                    // cancelled run skips the wait but still aggregates.
                    tokio::select! {
                        _ = tokio::time::sleep(self.policy.delay_for(attempt)) => {}
                        _ = cancel.cancelled() => break,
                    }
                }
            }
        }

        DestinationOutcome::failed(last_error, retries_used)
    }

    /// One store + record attempt. A successful store whose record creation
    /// fails is an orphan: optionally delete the stored copy (best effort,
    /// never fatal), then report the attempt as failed so the normal retry
    /// path re-runs `store`.
    async fn attempt_delivery(
        &self,
        run: &BackupRunRecord,
        artifact: &ArtifactHandle,
        destination: &dyn Destination,
        metadata: &StoreMetadata,
    ) -> std::result::Result<String, String> {
        let stored_path = destination
            .store(run, artifact.path(), artifact.filename(), metadata)
            .await
            .map_err(|e| PipelineError::DestinationStore(format!("{:#}", e)).to_string())?;

        match destination
            .create_file_record(
                run,
                artifact.filename(),
                &stored_path,
                artifact.size_bytes(),
                metadata,
            )
            .await
        {
            Ok(_record_id) => Ok(stored_path),
            Err(e) => {
                let record_error =
                    PipelineError::DestinationRecord(format!("{:#}", e)).to_string();
                if self.cleanup_orphans {
                    if let Err(cleanup_err) = destination.delete_stored(&stored_path).await {
                        eprintln!(
                            "⚠️ {}",
                            PipelineError::OrphanCleanup(format!(
                                "[{}] could not remove {}: {:#}",
                                destination.identifier(),
                                stored_path,
                                cleanup_err
                            ))
                        );
                    }
                }
                Err(record_error)
            }
        }
    }
}

/// Per-destination report line, shown after a run instead of one hard
/// pass/fail: a partially failed run is surfaced destination by destination.
pub fn describe_outcomes(status: RunStatus, outcomes: &BTreeMap<String, DestinationOutcome>) -> Vec<String> {
    let mut lines = Vec::with_capacity(outcomes.len() + 1);
    for (destination, outcome) in outcomes {
        if outcome.success {
            lines.push(format!(
                "✓ {} -> {} (retries: {})",
                destination,
                outcome.stored_path.as_deref().unwrap_or("?"),
                outcome.retry_count
            ));
        } else {
            lines.push(format!(
                "✗ {} failed after {} retries: {}",
                destination,
                outcome.retry_count,
                outcome.error.as_deref().unwrap_or("unknown error")
            ));
        }
    }
    lines.push(format!("Overall status: {:?}", status));
    lines
}
