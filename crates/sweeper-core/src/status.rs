//! Status enums for cleanup Tasks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a cleanup Task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is scanning. At most one per workspace.
    #[default]
    Running,
    /// Every target was processed.
    Completed,
    /// Task ended early (user request or run-fatal error).
    Stopped,
}

impl TaskStatus {
    /// Returns true if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Stopped)
    }

    /// Stable lowercase name used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a Task scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Every scannable location in the workspace.
    FullScan,
    /// Only the channels chosen when the task was started.
    SelectedTargets,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullScan => "full_scan",
            Self::SelectedTargets => "selected_targets",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a Task was stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum StopReason {
    /// An operator asked the scan to stop.
    UserRequested,
    /// The run hit a run-fatal error.
    Error(String),
    /// Anything else supplied by the caller.
    Other(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserRequested => f.write_str("user_requested"),
            Self::Error(msg) => write!(f, "error: {msg}"),
            Self::Other(msg) => f.write_str(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Stopped.is_terminal());
    }

    #[test]
    fn test_stop_reason_serialization() {
        let json = serde_json::to_string(&StopReason::Error("boom".into())).unwrap();
        assert_eq!(json, r#"{"reason":"error","detail":"boom"}"#);

        let json = serde_json::to_string(&StopReason::UserRequested).unwrap();
        assert_eq!(json, r#"{"reason":"user_requested"}"#);
    }
}
