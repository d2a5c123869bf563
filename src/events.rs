// backupengine/src/events.rs
use std::collections::BTreeMap;

use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::run::{DestinationOutcome, RunStatus};

/// Lifecycle notifications emitted by the pipeline.
///
/// Fire-and-forget: sinks must not fail the run, and the orchestrator never
/// waits on a sink.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    RunStarted {
        run_id: Uuid,
        source: String,
    },
    DestinationStarted {
        run_id: Uuid,
        destination: String,
    },
    DestinationCompleted {
        run_id: Uuid,
        destination: String,
        stored_path: String,
        size_bytes: u64,
    },
    DestinationFailed {
        run_id: Uuid,
        destination: String,
        error: String,
        retry_count: u32,
        will_retry: bool,
    },
    DestinationRetry {
        run_id: Uuid,
        destination: String,
        previous_error: String,
        attempt: u32,
    },
    AllDestinationsProcessed {
        run_id: Uuid,
        status: RunStatus,
        outcomes: BTreeMap<String, DestinationOutcome>,
    },
    RunFailed {
        run_id: Uuid,
        error: String,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

/// Discards every event.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: PipelineEvent) {}
}

/// Prints one status line per event.
pub struct ConsoleEventSink;

impl EventSink for ConsoleEventSink {
    fn emit(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::RunStarted { run_id, source } => {
                println!("🚀 Run {} started for source '{}'", run_id, source);
            }
            PipelineEvent::DestinationStarted {
                destination, ..
            } => {
                println!("📦 [{}] delivery started", destination);
            }
            PipelineEvent::DestinationCompleted {
                destination,
                stored_path,
                size_bytes,
                ..
            } => {
                println!(
                    "✅ [{}] stored {} bytes at {}",
                    destination, size_bytes, stored_path
                );
            }
            PipelineEvent::DestinationFailed {
                destination,
                error,
                retry_count,
                will_retry,
                ..
            } => {
                eprintln!(
                    "❌ [{}] attempt failed (retries so far: {}, will retry: {}): {}",
                    destination, retry_count, will_retry, error
                );
            }
            PipelineEvent::DestinationRetry {
                destination,
                previous_error,
                attempt,
                ..
            } => {
                println!(
                    "🔄 [{}] retrying (attempt {}) after: {}",
                    destination, attempt, previous_error
                );
            }
            PipelineEvent::AllDestinationsProcessed {
                run_id,
                status,
                outcomes,
            } => {
                let successes = outcomes.values().filter(|o| o.success).count();
                println!(
                    "🏁 Run {}: {:?} ({}/{} destinations succeeded)",
                    run_id,
                    status,
                    successes,
                    outcomes.len()
                );
            }
            PipelineEvent::RunFailed { run_id, error } => {
                eprintln!("❌ Run {} failed: {}", run_id, error);
            }
        }
    }
}

/// Forwards events to a tokio channel; the receiving side decides what to do
/// with them. Send failures (receiver gone) are swallowed.
pub struct ChannelEventSink {
    sender: UnboundedSender<PipelineEvent>,
}

impl ChannelEventSink {
    pub fn new(sender: UnboundedSender<PipelineEvent>) -> Self {
        ChannelEventSink { sender }
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }
}
