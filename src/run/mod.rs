// backupengine/src/run/mod.rs
pub mod store;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{PipelineError, Result};

/// Lifecycle of one backup run.
///
/// `Pending -> Running -> {Completed | PartiallyFailed | Failed}`. The three
/// right-hand states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    PartiallyFailed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::PartiallyFailed | RunStatus::Failed
        )
    }
}

/// Terminal result for one destination within a run.
///
/// Only the error message is kept, not the error object: the map is
/// persisted and shown to users per destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationOutcome {
    pub success: bool,
    pub stored_path: Option<String>,
    pub error: Option<String>,
    pub retry_count: u32,
}

impl DestinationOutcome {
    pub fn succeeded(stored_path: String, retry_count: u32) -> Self {
        DestinationOutcome {
            success: true,
            stored_path: Some(stored_path),
            error: None,
            retry_count,
        }
    }

    pub fn failed(error: String, retry_count: u32) -> Self {
        DestinationOutcome {
            success: false,
            stored_path: None,
            error: Some(error),
            retry_count,
        }
    }
}

/// Record of one backup attempt for one data source.
///
/// The terminal transition happens exactly once, through [`finalize`], after
/// every enabled destination has a terminal outcome. A dump failure reaches
/// `Failed` through the same path with an empty outcome map.
///
/// [`finalize`]: BackupRunRecord::finalize
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRunRecord {
    pub run_id: Uuid,
    pub source: String,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcomes: BTreeMap<String, DestinationOutcome>,
}

impl BackupRunRecord {
    pub fn new(source: impl Into<String>) -> Self {
        BackupRunRecord {
            run_id: Uuid::new_v4(),
            source: source.into(),
            status: RunStatus::Pending,
            started_at: None,
            finished_at: None,
            outcomes: BTreeMap::new(),
        }
    }

    /// Marks the run as running when the dump begins.
    pub fn mark_running(&mut self) -> Result<()> {
        if self.status != RunStatus::Pending {
            return Err(PipelineError::InvalidTransition(format!(
                "run {} cannot start from state {:?}",
                self.run_id, self.status
            )));
        }
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Writes the terminal state from the aggregated outcome map.
    ///
    /// Status rule: every destination succeeded -> `Completed`; at least one
    /// success and one failure -> `PartiallyFailed`; zero successes
    /// (including an empty map, the dump-failure case) -> `Failed`.
    ///
    /// A second call for the same run is an error: the terminal write runs
    /// exactly once per run id.
    pub fn finalize(&mut self, outcomes: BTreeMap<String, DestinationOutcome>) -> Result<RunStatus> {
        if self.status.is_terminal() {
            return Err(PipelineError::InvalidTransition(format!(
                "run {} already reached terminal state {:?}",
                self.run_id, self.status
            )));
        }

        let successes = outcomes.values().filter(|o| o.success).count();
        let failures = outcomes.len() - successes;

        self.status = if successes == 0 {
            RunStatus::Failed
        } else if failures == 0 {
            RunStatus::Completed
        } else {
            RunStatus::PartiallyFailed
        };
        self.outcomes = outcomes;
        self.finished_at = Some(Utc::now());
        Ok(self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome_map(entries: &[(&str, bool)]) -> BTreeMap<String, DestinationOutcome> {
        entries
            .iter()
            .map(|(id, ok)| {
                let outcome = if *ok {
                    DestinationOutcome::succeeded(format!("/stored/{}", id), 0)
                } else {
                    DestinationOutcome::failed("store failed".to_string(), 2)
                };
                (id.to_string(), outcome)
            })
            .collect()
    }

    #[test]
    fn test_lifecycle_all_success() -> Result<()> {
        let mut run = BackupRunRecord::new("appdb");
        assert_eq!(run.status, RunStatus::Pending);

        run.mark_running()?;
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.started_at.is_some());

        let status = run.finalize(outcome_map(&[("local", true), ("s3", true)]))?;
        assert_eq!(status, RunStatus::Completed);
        assert!(run.finished_at.is_some());
        Ok(())
    }

    #[test]
    fn test_mixed_outcomes_partially_failed() -> Result<()> {
        let mut run = BackupRunRecord::new("appdb");
        run.mark_running()?;
        let status = run.finalize(outcome_map(&[("local", false), ("s3", true)]))?;
        assert_eq!(status, RunStatus::PartiallyFailed);
        assert_eq!(
            run.outcomes.get("s3").and_then(|o| o.stored_path.as_deref()),
            Some("/stored/s3")
        );
        Ok(())
    }

    #[test]
    fn test_zero_successes_failed() -> Result<()> {
        let mut run = BackupRunRecord::new("appdb");
        run.mark_running()?;
        assert_eq!(
            run.finalize(outcome_map(&[("local", false)]))?,
            RunStatus::Failed
        );
        Ok(())
    }

    #[test]
    fn test_empty_outcomes_failed() -> Result<()> {
        // Dump failure: zero destinations attempted, zero successes.
        let mut run = BackupRunRecord::new("appdb");
        run.mark_running()?;
        assert_eq!(run.finalize(BTreeMap::new())?, RunStatus::Failed);
        Ok(())
    }

    #[test]
    fn test_terminal_write_is_exactly_once() -> Result<()> {
        let mut run = BackupRunRecord::new("appdb");
        run.mark_running()?;
        run.finalize(outcome_map(&[("local", true)]))?;

        let second = run.finalize(outcome_map(&[("local", false)]));
        assert!(matches!(second, Err(PipelineError::InvalidTransition(_))));
        // The first terminal write is untouched.
        assert_eq!(run.status, RunStatus::Completed);
        Ok(())
    }

    #[test]
    fn test_mark_running_requires_pending() -> Result<()> {
        let mut run = BackupRunRecord::new("appdb");
        run.mark_running()?;
        assert!(run.mark_running().is_err());

        run.finalize(BTreeMap::new())?;
        assert!(run.mark_running().is_err());
        Ok(())
    }
}
