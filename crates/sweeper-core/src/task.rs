//! Cleanup Task and its progress.

use crate::{
    ChannelId, CoreError, ScanTarget, StopReason, TargetKind, TaskId, TaskKind, TaskStatus, UserId,
    WorkspaceId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A Task is one bounded scan-and-clean run over a workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,

    /// Workspace being scanned.
    pub workspace_id: WorkspaceId,

    /// Full scan or selected targets.
    pub kind: TaskKind,

    /// Current task status.
    pub status: TaskStatus,

    /// Progress counters.
    pub progress: TaskProgress,

    /// Channels requested for a selected-targets scan.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selected_targets: Vec<ChannelId>,

    /// Who started this task.
    pub started_by: Option<UserId>,

    /// When the task was created.
    pub created_at: DateTime<Utc>,

    /// Last progress write.
    pub updated_at: Option<DateTime<Utc>>,

    pub completed_at: Option<DateTime<Utc>>,

    pub stopped_at: Option<DateTime<Utc>>,

    pub stop_reason: Option<StopReason>,

    /// Aggregate stats recorded on completion.
    pub final_stats: Option<FinalStats>,
}

impl Task {
    /// Create a running full-scan task.
    pub fn full_scan(workspace_id: WorkspaceId, started_by: Option<UserId>) -> Self {
        Self::new(workspace_id, TaskKind::FullScan, Vec::new(), started_by)
    }

    /// Create a running task limited to the given channels.
    pub fn selected_targets(
        workspace_id: WorkspaceId,
        targets: Vec<ChannelId>,
        started_by: Option<UserId>,
    ) -> Self {
        Self::new(workspace_id, TaskKind::SelectedTargets, targets, started_by)
    }

    fn new(
        workspace_id: WorkspaceId,
        kind: TaskKind,
        selected_targets: Vec<ChannelId>,
        started_by: Option<UserId>,
    ) -> Self {
        Self {
            id: TaskId::generate(),
            workspace_id,
            kind,
            status: TaskStatus::Running,
            progress: TaskProgress::default(),
            selected_targets,
            started_by,
            created_at: Utc::now(),
            updated_at: None,
            completed_at: None,
            stopped_at: None,
            stop_reason: None,
            final_stats: None,
        }
    }

    /// Builder method to set a specific ID (useful for testing).
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Merge a partial progress update.
    pub fn apply_progress(&mut self, patch: &ProgressPatch) {
        self.progress.apply(patch);
        self.updated_at = Some(Utc::now());
    }

    /// Mark the task as completed.
    pub fn complete(&mut self, stats: FinalStats) -> Result<(), CoreError> {
        self.ensure_running(TaskStatus::Completed)?;
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.progress.absorb(&stats);
        self.final_stats = Some(stats);
        Ok(())
    }

    /// Mark the task as stopped.
    pub fn stop(&mut self, reason: StopReason) -> Result<(), CoreError> {
        self.ensure_running(TaskStatus::Stopped)?;
        self.status = TaskStatus::Stopped;
        self.stopped_at = Some(Utc::now());
        self.stop_reason = Some(reason);
        Ok(())
    }

    fn ensure_running(&self, to: TaskStatus) -> Result<(), CoreError> {
        if self.status != TaskStatus::Running {
            return Err(CoreError::InvalidStateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }
}

/// Target currently being scanned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentTarget {
    pub id: ChannelId,
    pub name: String,
    pub kind: TargetKind,
}

impl From<&ScanTarget> for CurrentTarget {
    fn from(target: &ScanTarget) -> Self {
        Self {
            id: target.id.clone(),
            name: target.qualified_name(),
            kind: target.kind,
        }
    }
}

/// Progress snapshot persisted with the task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub total_targets: u64,
    pub completed_targets: u64,
    pub scanned_messages: u64,
    pub deleted_messages: u64,
    pub unlock_operations: u64,
    pub current_target: Option<CurrentTarget>,
}

impl TaskProgress {
    /// Overwrite every field the patch carries.
    pub fn apply(&mut self, patch: &ProgressPatch) {
        if let Some(v) = patch.total_targets {
            self.total_targets = v;
        }
        if let Some(v) = patch.completed_targets {
            self.completed_targets = v;
        }
        if let Some(v) = patch.scanned_messages {
            self.scanned_messages = v;
        }
        if let Some(v) = patch.deleted_messages {
            self.deleted_messages = v;
        }
        if let Some(v) = patch.unlock_operations {
            self.unlock_operations = v;
        }
        if let Some(current) = &patch.current_target {
            self.current_target = Some(current.clone());
        }
    }

    fn absorb(&mut self, stats: &FinalStats) {
        self.completed_targets = stats.targets_scanned;
        self.scanned_messages = stats.messages_scanned;
        self.deleted_messages = stats.messages_deleted;
        self.unlock_operations = stats.unlock_operations;
        self.current_target = None;
    }
}

/// Partial progress update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressPatch {
    pub total_targets: Option<u64>,
    pub completed_targets: Option<u64>,
    pub scanned_messages: Option<u64>,
    pub deleted_messages: Option<u64>,
    pub unlock_operations: Option<u64>,
    pub current_target: Option<CurrentTarget>,
}

impl ProgressPatch {
    pub fn total_targets(total: u64) -> Self {
        Self {
            total_targets: Some(total),
            ..Self::default()
        }
    }

    pub fn current_target(target: &ScanTarget) -> Self {
        Self {
            current_target: Some(target.into()),
            ..Self::default()
        }
    }

    /// Cumulative counters after a target finished.
    pub fn counters(
        completed_targets: u64,
        scanned_messages: u64,
        deleted_messages: u64,
        unlock_operations: u64,
    ) -> Self {
        Self {
            completed_targets: Some(completed_targets),
            scanned_messages: Some(scanned_messages),
            deleted_messages: Some(deleted_messages),
            unlock_operations: Some(unlock_operations),
            ..Self::default()
        }
    }
}

/// A thread whose original lock/archive flags could not be restored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreFailure {
    pub thread_id: ChannelId,
    pub thread_name: String,
    pub errors: Vec<String>,
}

/// Aggregate outcome of a scan run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalStats {
    pub kind: TaskKind,
    pub targets_total: u64,
    pub targets_scanned: u64,
    pub messages_scanned: u64,
    pub messages_deleted: u64,
    pub unlock_operations: u64,

    /// False when the run was stopped before every target was processed.
    pub completed_normally: bool,

    /// Number of channels requested for a selected-targets scan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_count: Option<usize>,

    /// Threads left diverged from their original state, for operator follow-up.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restore_failures: Vec<RestoreFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(deleted: u64) -> FinalStats {
        FinalStats {
            kind: TaskKind::FullScan,
            targets_total: 2,
            targets_scanned: 2,
            messages_scanned: 40,
            messages_deleted: deleted,
            unlock_operations: 0,
            completed_normally: true,
            selected_count: None,
            restore_failures: Vec::new(),
        }
    }

    #[test]
    fn test_new_task_is_running() {
        let task = Task::full_scan(WorkspaceId::new("g1"), Some(UserId::new("u1")));
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.kind, TaskKind::FullScan);
        assert!(!task.is_terminal());
    }

    #[test]
    fn test_apply_progress_merges_only_present_fields() {
        let mut task = Task::full_scan(WorkspaceId::new("g1"), None);
        task.apply_progress(&ProgressPatch::total_targets(7));
        task.apply_progress(&ProgressPatch {
            scanned_messages: Some(120),
            ..ProgressPatch::default()
        });

        assert_eq!(task.progress.total_targets, 7);
        assert_eq!(task.progress.scanned_messages, 120);
        assert_eq!(task.progress.deleted_messages, 0);
        assert!(task.updated_at.is_some());
    }

    #[test]
    fn test_complete_then_stop_is_invalid() {
        let mut task = Task::full_scan(WorkspaceId::new("g1"), None);
        task.complete(stats(3)).unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress.deleted_messages, 3);

        let err = task.stop(StopReason::UserRequested).unwrap_err();
        assert_eq!(
            err,
            CoreError::InvalidStateTransition {
                from: "completed".into(),
                to: "stopped".into()
            }
        );
    }

    #[test]
    fn test_stop_records_reason() {
        let mut task = Task::selected_targets(
            WorkspaceId::new("g1"),
            vec![ChannelId::new("c1")],
            None,
        );
        task.stop(StopReason::Error("no rules".into())).unwrap();

        assert_eq!(task.status, TaskStatus::Stopped);
        assert!(task.stopped_at.is_some());
        assert_eq!(task.stop_reason, Some(StopReason::Error("no rules".into())));
    }
}
