//! Message deletion, including the unlock → delete → relock sequence for
//! locked or archived threads.
//!
//! Every platform call goes through the rate limiter. Before a thread's flags
//! are touched a pending-restore entry is journaled; it is resolved only once
//! both flags are confirmed back to their original values.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};

use sweeper_core::{MessageId, RestoreFailure, ScanTarget, WorkspaceId};

use crate::journal::{JournalError, PendingRestore, RestoreJournal};
use crate::limiter::RateLimiter;
use crate::platform::{FailureClass, Platform, PlatformError};

/// Why a deletion did not happen.
#[derive(Debug, Error)]
pub enum DeletionError {
    #[error("Failed to unlock thread {thread}: {source}")]
    Unlock {
        thread: String,
        #[source]
        source: PlatformError,
    },

    #[error("Failed to delete message: {0}")]
    Delete(#[source] PlatformError),

    #[error("Failed to journal thread state: {0}")]
    Journal(#[from] JournalError),
}

impl DeletionError {
    /// Whether the scan should give up on the current target.
    ///
    /// Only a delete that failed as not-found or transient is isolated to the
    /// single message.
    pub fn aborts_target(&self) -> bool {
        match self {
            Self::Delete(err) => err.class() == FailureClass::Permission,
            Self::Unlock { .. } | Self::Journal(_) => true,
        }
    }
}

/// A deletion that went through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// The thread's flags were changed to make the delete possible.
    pub state_changed: bool,

    /// Set when the original flags could not be put back.
    pub restore_failure: Option<RestoreFailure>,
}

/// A deletion that failed, with any restore failure it caused.
#[derive(Debug)]
pub struct DeleteFailure {
    pub error: DeletionError,
    pub restore_failure: Option<RestoreFailure>,
}

impl From<DeletionError> for DeleteFailure {
    fn from(error: DeletionError) -> Self {
        Self {
            error,
            restore_failure: None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Changes {
    unarchived: bool,
    unlocked: bool,
}

impl Changes {
    fn any(&self) -> bool {
        self.unarchived || self.unlocked
    }
}

/// Deletes messages on behalf of one workspace's scan.
pub struct MessageDeleter {
    workspace: WorkspaceId,
    platform: Arc<dyn Platform>,
    limiter: Arc<RateLimiter>,
    journal: Arc<dyn RestoreJournal>,
    settle_delay: Duration,
}

impl MessageDeleter {
    pub fn new(
        workspace: WorkspaceId,
        platform: Arc<dyn Platform>,
        limiter: Arc<RateLimiter>,
        journal: Arc<dyn RestoreJournal>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            workspace,
            platform,
            limiter,
            journal,
            settle_delay,
        }
    }

    /// Delete one message from a target.
    pub async fn delete(
        &self,
        target: &ScanTarget,
        message: &MessageId,
    ) -> Result<DeleteOutcome, DeleteFailure> {
        let needs_sequence =
            target.is_locked && target.is_thread() && (target.was_locked || target.was_archived);
        if !needs_sequence {
            self.delete_once(target, message)
                .await
                .map_err(DeletionError::Delete)?;
            return Ok(DeleteOutcome::default());
        }
        self.delete_in_locked_thread(target, message).await
    }

    async fn delete_once(
        &self,
        target: &ScanTarget,
        message: &MessageId,
    ) -> Result<(), PlatformError> {
        self.limiter
            .execute(|| self.platform.delete_message(&target.id, message))
            .await
    }

    async fn set_archived(&self, target: &ScanTarget, archived: bool) -> Result<(), PlatformError> {
        self.limiter
            .execute(|| self.platform.set_thread_archived(&target.id, archived))
            .await
    }

    async fn set_locked(&self, target: &ScanTarget, locked: bool) -> Result<(), PlatformError> {
        self.limiter
            .execute(|| self.platform.set_thread_locked(&target.id, locked))
            .await
    }

    async fn settle(&self) {
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
    }

    async fn delete_in_locked_thread(
        &self,
        target: &ScanTarget,
        message: &MessageId,
    ) -> Result<DeleteOutcome, DeleteFailure> {
        let name = target.qualified_name();
        self.journal
            .record(&PendingRestore::for_target(&self.workspace, target))
            .await
            .map_err(DeletionError::from)?;

        let mut changes = Changes::default();

        if target.was_archived {
            if let Err(source) = self.set_archived(target, false).await {
                let restore_failure = self.restore(target, changes).await;
                return Err(DeleteFailure {
                    error: DeletionError::Unlock { thread: name, source },
                    restore_failure,
                });
            }
            changes.unarchived = true;
            info!(thread = %name, "Unarchived thread");
            self.settle().await;
        }

        if target.was_locked {
            if let Err(source) = self.set_locked(target, false).await {
                let restore_failure = self.restore(target, changes).await;
                return Err(DeleteFailure {
                    error: DeletionError::Unlock { thread: name, source },
                    restore_failure,
                });
            }
            changes.unlocked = true;
            info!(thread = %name, "Unlocked thread");
            self.settle().await;
        }

        let mut result = self.delete_once(target, message).await;
        if let Err(PlatformError::ThreadArchived(_)) = &result {
            warn!(thread = %name, message_id = %message, "Thread still archived, retrying delete once");
            match self.set_archived(target, false).await {
                Ok(()) => {
                    self.settle().await;
                    result = self.delete_once(target, message).await;
                }
                Err(err) => warn!(thread = %name, error = %err, "Re-unarchive failed"),
            }
        }

        let restore_failure = self.restore(target, changes).await;

        match result {
            Ok(()) => Ok(DeleteOutcome {
                state_changed: changes.any(),
                restore_failure,
            }),
            Err(err) => Err(DeleteFailure {
                error: DeletionError::Delete(err),
                restore_failure,
            }),
        }
    }

    /// Put back whatever `changes` altered: relock first, then rearchive.
    async fn restore(&self, target: &ScanTarget, changes: Changes) -> Option<RestoreFailure> {
        let name = target.qualified_name();
        let mut errors = Vec::new();

        if changes.unlocked {
            match self.set_locked(target, true).await {
                Ok(()) => info!(thread = %name, "Relocked thread"),
                Err(err) => errors.push(format!("relock: {err}")),
            }
        }
        if changes.unarchived {
            match self.set_archived(target, true).await {
                Ok(()) => info!(thread = %name, "Rearchived thread"),
                Err(err) => errors.push(format!("rearchive: {err}")),
            }
        }

        if errors.is_empty() {
            if let Err(err) = self.journal.resolve(&target.id).await {
                warn!(thread = %name, error = %err, "Failed to resolve restore journal entry");
            }
            return None;
        }

        error!(
            workspace_id = %self.workspace,
            thread = %name,
            errors = ?errors,
            "Failed to restore thread state"
        );
        Some(RestoreFailure {
            thread_id: target.id.clone(),
            thread_name: name,
            errors,
        })
    }
}
