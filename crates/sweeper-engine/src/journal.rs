//! Durable log of threads whose lock/archive flags were changed but not yet
//! confirmed restored.
//!
//! The deleter records an entry before touching a thread and resolves it once
//! the original flags are back. Anything still pending after a crash is
//! replayed by [`crate::recovery::reconcile_pending_restores`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use sweeper_core::{ChannelId, ScanTarget, WorkspaceId};

/// Errors from the restore journal.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("Journal I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Journal entry is malformed: {0}")]
    Json(#[from] serde_json::Error),
}

/// A thread whose original flags still have to be put back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRestore {
    pub workspace_id: WorkspaceId,
    pub thread_id: ChannelId,
    pub thread_name: String,

    /// The thread was locked before it was touched.
    pub restore_locked: bool,

    /// The thread was archived before it was touched.
    pub restore_archived: bool,

    pub recorded_at: DateTime<Utc>,
}

impl PendingRestore {
    pub fn for_target(workspace_id: &WorkspaceId, target: &ScanTarget) -> Self {
        Self {
            workspace_id: workspace_id.clone(),
            thread_id: target.id.clone(),
            thread_name: target.qualified_name(),
            restore_locked: target.was_locked,
            restore_archived: target.was_archived,
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalEntry {
    Altered(PendingRestore),
    Restored {
        thread_id: ChannelId,
        at: DateTime<Utc>,
    },
}

/// Append-only restore journal.
#[async_trait]
pub trait RestoreJournal: Send + Sync {
    /// Record that a thread is about to be altered.
    async fn record(&self, entry: &PendingRestore) -> Result<(), JournalError>;

    /// Mark a thread's flags as restored.
    async fn resolve(&self, thread: &ChannelId) -> Result<(), JournalError>;

    /// Entries recorded but not resolved, in recording order.
    async fn pending(&self) -> Result<Vec<PendingRestore>, JournalError>;
}

fn replay(entries: impl IntoIterator<Item = JournalEntry>) -> Vec<PendingRestore> {
    let mut pending: Vec<PendingRestore> = Vec::new();
    for entry in entries {
        match entry {
            JournalEntry::Altered(restore) => {
                pending.retain(|p| p.thread_id != restore.thread_id);
                pending.push(restore);
            }
            JournalEntry::Restored { thread_id, .. } => {
                pending.retain(|p| p.thread_id != thread_id);
            }
        }
    }
    pending
}

/// JSON Lines journal on disk.
pub struct FileJournal {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, entry: &JournalEntry) -> Result<(), JournalError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn read_entries(&self) -> Result<Vec<JournalEntry>, JournalError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(JournalError::from))
            .collect()
    }

    /// Rewrite the file so it holds only pending entries.
    pub async fn compact(&self) -> Result<usize, JournalError> {
        let _guard = self.write_lock.lock().await;
        let pending = replay(self.read_entries().await?);

        let mut content = String::new();
        for restore in &pending {
            content.push_str(&serde_json::to_string(&JournalEntry::Altered(restore.clone()))?);
            content.push('\n');
        }
        let tmp = self.path.with_extension("jsonl.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(pending.len())
    }
}

#[async_trait]
impl RestoreJournal for FileJournal {
    async fn record(&self, entry: &PendingRestore) -> Result<(), JournalError> {
        self.append(&JournalEntry::Altered(entry.clone())).await
    }

    async fn resolve(&self, thread: &ChannelId) -> Result<(), JournalError> {
        self.append(&JournalEntry::Restored {
            thread_id: thread.clone(),
            at: Utc::now(),
        })
        .await
    }

    async fn pending(&self) -> Result<Vec<PendingRestore>, JournalError> {
        Ok(replay(self.read_entries().await?))
    }
}

/// In-memory journal.
#[derive(Default)]
pub struct MemoryJournal {
    pending: Mutex<Vec<PendingRestore>>,
    failing: AtomicBool,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), JournalError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(JournalError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "journal unavailable",
            )));
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PendingRestore>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RestoreJournal for MemoryJournal {
    async fn record(&self, entry: &PendingRestore) -> Result<(), JournalError> {
        self.check_writable()?;
        let mut pending = self.lock();
        pending.retain(|p| p.thread_id != entry.thread_id);
        pending.push(entry.clone());
        Ok(())
    }

    async fn resolve(&self, thread: &ChannelId) -> Result<(), JournalError> {
        self.check_writable()?;
        self.lock().retain(|p| &p.thread_id != thread);
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<PendingRestore>, JournalError> {
        Ok(self.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sweeper_core::{ChannelInfo, ChannelKind};

    fn pending(thread: &str) -> PendingRestore {
        let info = ChannelInfo::new(thread, "post", ChannelKind::PublicThread).with_flags(true, true);
        PendingRestore::for_target(&WorkspaceId::new("g1"), &ScanTarget::forum_thread(&info, "forum", false))
    }

    #[tokio::test]
    async fn test_file_journal_replays_unresolved() {
        let dir = tempfile::tempdir().unwrap();
        let journal = FileJournal::new(dir.path().join("restore-journal.jsonl"));

        journal.record(&pending("t1")).await.unwrap();
        journal.record(&pending("t2")).await.unwrap();
        journal.resolve(&ChannelId::new("t1")).await.unwrap();

        let reopened = FileJournal::new(dir.path().join("restore-journal.jsonl"));
        let left = reopened.pending().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].thread_id, ChannelId::new("t2"));
        assert!(left[0].restore_locked);
        assert!(left[0].restore_archived);
        assert_eq!(left[0].thread_name, "forum/post");
    }

    #[tokio::test]
    async fn test_compact_keeps_only_pending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("restore-journal.jsonl");
        let journal = FileJournal::new(&path);

        for id in ["t1", "t2", "t3"] {
            journal.record(&pending(id)).await.unwrap();
        }
        journal.resolve(&ChannelId::new("t2")).await.unwrap();

        assert_eq!(journal.compact().await.unwrap(), 2);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert_eq!(journal.pending().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_file_has_nothing_pending() {
        let dir = tempfile::tempdir().unwrap();
        let journal = FileJournal::new(dir.path().join("absent.jsonl"));
        assert!(journal.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_journal_failure_switch() {
        let journal = MemoryJournal::new();
        journal.set_failing(true);
        assert!(journal.record(&pending("t1")).await.is_err());

        journal.set_failing(false);
        journal.record(&pending("t1")).await.unwrap();
        assert_eq!(journal.pending().await.unwrap().len(), 1);
    }
}
