//! Progress events published to whoever renders scan status.

use crate::{FinalStats, TaskId};
use serde::{Deserialize, Serialize};

/// Counters visible to the UI layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub targets_total: u64,
    pub targets_completed: u64,
    pub messages_scanned: u64,
    pub messages_deleted: u64,
    pub unlock_operations: u64,
    pub current_target: Option<String>,

    /// Milliseconds since the reporter was created.
    pub elapsed_ms: u64,
}

impl ProgressSnapshot {
    /// Completed targets as a whole percentage (0 when the total is unknown).
    pub fn percent_complete(&self) -> u8 {
        if self.targets_total == 0 {
            return 0;
        }
        let pct = self.targets_completed.saturating_mul(100) / self.targets_total;
        pct.min(100) as u8
    }

    /// Messages scanned per second of elapsed time.
    pub fn scan_rate(&self) -> f64 {
        per_second(self.messages_scanned, self.elapsed_ms)
    }

    /// Messages deleted per second of elapsed time.
    pub fn delete_rate(&self) -> f64 {
        per_second(self.messages_deleted, self.elapsed_ms)
    }
}

fn per_second(count: u64, elapsed_ms: u64) -> f64 {
    if elapsed_ms == 0 {
        return 0.0;
    }
    count as f64 * 1000.0 / elapsed_ms as f64
}

/// Type of progress event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventKind {
    /// Target count is known; scanning begins.
    Started,
    /// A new target is being scanned.
    TargetStarted,
    /// Throttled counter update.
    Progress,
    /// Periodic forced refresh.
    Heartbeat,
    /// Run ended (completed or stopped).
    Finished,
    /// Run ended with a run-fatal error.
    Failed,
}

/// A single externally visible progress update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub task_id: TaskId,
    pub kind: ProgressEventKind,
    pub snapshot: ProgressSnapshot,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_stats: Option<FinalStats>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressUpdate {
    pub fn new(task_id: TaskId, kind: ProgressEventKind, snapshot: ProgressSnapshot) -> Self {
        Self {
            task_id,
            kind,
            snapshot,
            final_stats: None,
            error: None,
        }
    }

    /// Create a Finished update.
    pub fn finished(task_id: TaskId, snapshot: ProgressSnapshot, stats: FinalStats) -> Self {
        Self {
            final_stats: Some(stats),
            ..Self::new(task_id, ProgressEventKind::Finished, snapshot)
        }
    }

    /// Create a Failed update.
    pub fn failed(task_id: TaskId, snapshot: ProgressSnapshot, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(task_id, ProgressEventKind::Failed, snapshot)
        }
    }

    /// Returns true for events that end the run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            ProgressEventKind::Finished | ProgressEventKind::Failed
        )
    }
}
