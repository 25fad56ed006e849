//! Startup reconciliation of thread state left diverged by an interrupted
//! delete sequence.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use sweeper_core::{RestoreFailure, WorkspaceId};

use crate::journal::{JournalError, PendingRestore, RestoreJournal};
use crate::limiter::RateLimiter;
use crate::platform::{FailureClass, Platform};

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Threads whose flags were put back.
    pub restored: usize,

    /// Threads that no longer exist; their entries were dropped.
    pub vanished: usize,

    /// Threads that still could not be restored; their entries stay pending.
    pub failed: Vec<RestoreFailure>,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Re-apply the original flags of every pending journal entry recorded for
/// `workspace`.
///
/// The journal may hold entries for other workspaces; those are left pending
/// for a pass against their own platform. Lock is restored before archive.
/// Entries are resolved only when every required change succeeded, so a
/// failed pass can simply be run again.
pub async fn reconcile_pending_restores(
    workspace: &WorkspaceId,
    platform: Arc<dyn Platform>,
    limiter: Arc<RateLimiter>,
    journal: Arc<dyn RestoreJournal>,
) -> Result<RecoveryReport, JournalError> {
    let pending: Vec<PendingRestore> = journal
        .pending()
        .await?
        .into_iter()
        .filter(|entry| &entry.workspace_id == workspace)
        .collect();
    let mut report = RecoveryReport::default();
    if pending.is_empty() {
        return Ok(report);
    }
    info!(workspace_id = %workspace, count = pending.len(), "Reconciling pending thread restores");

    for entry in pending {
        match restore_entry(platform.as_ref(), &limiter, &entry).await {
            Ok(()) => {
                journal.resolve(&entry.thread_id).await?;
                info!(thread = %entry.thread_name, "Restored thread state");
                report.restored += 1;
            }
            Err(errors) if errors.iter().all(|(class, _)| *class == FailureClass::NotFound) => {
                journal.resolve(&entry.thread_id).await?;
                warn!(thread = %entry.thread_name, "Thread no longer exists, dropping restore entry");
                report.vanished += 1;
            }
            Err(errors) => {
                let errors: Vec<String> = errors.into_iter().map(|(_, e)| e).collect();
                error!(thread = %entry.thread_name, errors = ?errors, "Failed to restore thread state");
                report.failed.push(RestoreFailure {
                    thread_id: entry.thread_id.clone(),
                    thread_name: entry.thread_name.clone(),
                    errors,
                });
            }
        }
    }

    Ok(report)
}

async fn restore_entry(
    platform: &dyn Platform,
    limiter: &RateLimiter,
    entry: &PendingRestore,
) -> Result<(), Vec<(FailureClass, String)>> {
    let mut errors = Vec::new();

    if entry.restore_locked {
        // An archived thread rejects lock changes.
        if let Err(err) = limiter
            .execute(|| platform.set_thread_archived(&entry.thread_id, false))
            .await
        {
            if err.class() == FailureClass::NotFound {
                return Err(vec![(err.class(), format!("unarchive: {err}"))]);
            }
        }
        if let Err(err) = limiter
            .execute(|| platform.set_thread_locked(&entry.thread_id, true))
            .await
        {
            errors.push((err.class(), format!("relock: {err}")));
        }
    }
    if entry.restore_archived {
        if let Err(err) = limiter
            .execute(|| platform.set_thread_archived(&entry.thread_id, true))
            .await
        {
            errors.push((err.class(), format!("rearchive: {err}")));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{FileJournal, MemoryJournal};
    use crate::platform::memory::{MemoryPlatform, ThreadOp};
    use crate::platform::PlatformError;
    use chrono::Utc;
    use sweeper_core::{ChannelId, ChannelInfo, ChannelKind};

    fn entry(thread: &str, locked: bool, archived: bool) -> PendingRestore {
        PendingRestore {
            workspace_id: WorkspaceId::new("g1"),
            thread_id: ChannelId::new(thread),
            thread_name: format!("forum/{thread}"),
            restore_locked: locked,
            restore_archived: archived,
            recorded_at: Utc::now(),
        }
    }

    fn diverged_thread(platform: &MemoryPlatform, id: &str) {
        // Left unlocked and unarchived by an interrupted sequence.
        platform.add_forum_thread(
            ChannelInfo::new(id, id, ChannelKind::PublicThread).with_parent("f1"),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_restores_lock_then_archive() {
        let platform = Arc::new(MemoryPlatform::new("g1"));
        diverged_thread(&platform, "t1");
        let journal = Arc::new(MemoryJournal::new());
        journal.record(&entry("t1", true, true)).await.unwrap();

        let report = reconcile_pending_restores(
            &WorkspaceId::new("g1"),
            platform.clone(),
            Arc::new(RateLimiter::default()),
            journal.clone(),
        )
        .await
        .unwrap();

        assert_eq!(report.restored, 1);
        assert!(report.is_clean());
        let info = platform.channel(&ChannelId::new("t1")).unwrap();
        assert!(info.locked && info.archived);
        assert!(journal.pending().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_restore_stays_pending() {
        let platform = Arc::new(MemoryPlatform::new("g1"));
        diverged_thread(&platform, "t1");
        diverged_thread(&platform, "t2");
        platform.fail_thread_op(
            &ChannelId::new("t1"),
            ThreadOp::Lock,
            PlatformError::MissingPermissions("ManageThreads".into()),
            None,
        );
        let journal = Arc::new(MemoryJournal::new());
        journal.record(&entry("t1", true, false)).await.unwrap();
        journal.record(&entry("t2", false, true)).await.unwrap();

        let report = reconcile_pending_restores(
            &WorkspaceId::new("g1"),
            platform.clone(),
            Arc::new(RateLimiter::default()),
            journal.clone(),
        )
        .await
        .unwrap();

        assert_eq!(report.restored, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].thread_id, ChannelId::new("t1"));
        let pending = journal.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(platform.channel(&ChannelId::new("t2")).unwrap().archived);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanished_thread_is_dropped() {
        let platform = Arc::new(MemoryPlatform::new("g1"));
        let journal = Arc::new(MemoryJournal::new());
        journal.record(&entry("gone", true, true)).await.unwrap();

        let report = reconcile_pending_restores(
            &WorkspaceId::new("g1"),
            platform,
            Arc::new(RateLimiter::default()),
            journal.clone(),
        )
        .await
        .unwrap();

        assert_eq!(report.vanished, 1);
        assert!(journal.pending().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_workspace_entries_stay_pending() {
        let platform = Arc::new(MemoryPlatform::new("g1"));
        diverged_thread(&platform, "t1");
        let journal = Arc::new(MemoryJournal::new());
        journal.record(&entry("t1", true, false)).await.unwrap();
        let mut foreign = entry("t9", true, true);
        foreign.workspace_id = WorkspaceId::new("g2");
        journal.record(&foreign).await.unwrap();

        let report = reconcile_pending_restores(
            &WorkspaceId::new("g1"),
            platform,
            Arc::new(RateLimiter::default()),
            journal.clone(),
        )
        .await
        .unwrap();

        assert_eq!(report.restored, 1);
        assert_eq!(report.vanished, 0);
        let pending = journal.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].workspace_id, WorkspaceId::new("g2"));
        assert_eq!(pending[0].thread_id, ChannelId::new("t9"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_compact_after_recovery_keeps_other_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Arc::new(FileJournal::new(dir.path().join("restore-journal.jsonl")));
        let platform = Arc::new(MemoryPlatform::new("g1"));
        diverged_thread(&platform, "t1");
        journal.record(&entry("t1", false, true)).await.unwrap();
        let mut foreign = entry("t9", true, false);
        foreign.workspace_id = WorkspaceId::new("g2");
        journal.record(&foreign).await.unwrap();

        reconcile_pending_restores(
            &WorkspaceId::new("g1"),
            platform,
            Arc::new(RateLimiter::default()),
            journal.clone(),
        )
        .await
        .unwrap();

        assert_eq!(journal.compact().await.unwrap(), 1);
        let pending = journal.pending().await.unwrap();
        assert_eq!(pending[0].workspace_id, WorkspaceId::new("g2"));
    }
}
