//! Per-workspace task registry.
//!
//! Holds at most one running task per workspace and the set of workspaces
//! whose live moderation is paused. Both live behind one lock, so a workspace
//! with an active task is always paused and a start is atomic with respect to
//! other starts.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use sweeper_core::{
    ChannelId, CoreError, FinalStats, ProgressPatch, StopReason, Task, TaskId, TaskKind,
    TaskProgress, UserId, WorkspaceId,
};

use crate::store::{StoreError, TaskStore};

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("A task is already active for workspace {0}")]
    TaskAlreadyActive(WorkspaceId),

    #[error("No targets selected")]
    NoTargetsSelected,

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Caller-supplied options for starting a task.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub started_by: Option<UserId>,
}

/// Summary of one active task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveTaskSummary {
    pub workspace_id: WorkspaceId,
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub progress: TaskProgress,
    pub created_at: DateTime<Utc>,
}

/// Registry-wide counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub active_count: usize,
    pub paused_count: usize,
    pub tasks: Vec<ActiveTaskSummary>,
}

#[derive(Default)]
struct RegistryInner {
    active: HashMap<WorkspaceId, Task>,
    paused: HashSet<WorkspaceId>,
}

/// Single-active-task state machine per workspace.
pub struct TaskRegistry {
    store: Arc<dyn TaskStore>,
    inner: RwLock<RegistryInner>,
}

impl TaskRegistry {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Start a scan over the whole workspace.
    pub async fn start_full_scan(
        &self,
        workspace: &WorkspaceId,
        options: ScanOptions,
    ) -> Result<Task, RegistryError> {
        self.start(Task::full_scan(workspace.clone(), options.started_by))
            .await
    }

    /// Start a scan limited to the given channels.
    pub async fn start_selected_targets_scan(
        &self,
        workspace: &WorkspaceId,
        targets: Vec<ChannelId>,
        options: ScanOptions,
    ) -> Result<Task, RegistryError> {
        if targets.is_empty() {
            return Err(RegistryError::NoTargetsSelected);
        }
        self.start(Task::selected_targets(
            workspace.clone(),
            targets,
            options.started_by,
        ))
        .await
    }

    async fn start(&self, task: Task) -> Result<Task, RegistryError> {
        let workspace = task.workspace_id.clone();
        // Held across the whole check-and-create.
        let mut inner = self.inner.write().await;

        if inner.active.contains_key(&workspace) {
            return Err(RegistryError::TaskAlreadyActive(workspace));
        }

        if let Some(existing) = self.store.find_running(&workspace).await? {
            warn!(
                workspace_id = %workspace,
                task_id = %existing.id,
                "Found persisted running task, refusing to start another"
            );
            inner.active.insert(workspace.clone(), existing);
            inner.paused.insert(workspace.clone());
            return Err(RegistryError::TaskAlreadyActive(workspace));
        }

        self.store.save(&task).await?;
        inner.active.insert(workspace.clone(), task.clone());
        inner.paused.insert(workspace.clone());

        info!(
            workspace_id = %workspace,
            task_id = %task.id,
            kind = %task.kind,
            "Task started, live moderation paused"
        );
        Ok(task)
    }

    /// Merge a progress patch into the active task. Returns false for a stale task id.
    pub async fn update_progress(
        &self,
        workspace: &WorkspaceId,
        task_id: &TaskId,
        patch: &ProgressPatch,
    ) -> Result<bool, RegistryError> {
        let mut inner = self.inner.write().await;
        let Some(task) = inner.active.get_mut(workspace).filter(|t| &t.id == task_id) else {
            debug!(workspace_id = %workspace, task_id = %task_id, "Ignoring stale progress update");
            return Ok(false);
        };

        task.apply_progress(patch);
        self.store.save(task).await?;
        Ok(true)
    }

    /// Mark the active task completed and resume live moderation.
    pub async fn complete(
        &self,
        workspace: &WorkspaceId,
        task_id: &TaskId,
        stats: FinalStats,
    ) -> Result<Option<Task>, RegistryError> {
        self.finish(workspace, task_id, |task| task.complete(stats))
            .await
    }

    /// Mark the active task stopped and resume live moderation.
    pub async fn stop(
        &self,
        workspace: &WorkspaceId,
        task_id: &TaskId,
        reason: StopReason,
    ) -> Result<Option<Task>, RegistryError> {
        self.finish(workspace, task_id, |task| task.stop(reason))
            .await
    }

    async fn finish<F>(
        &self,
        workspace: &WorkspaceId,
        task_id: &TaskId,
        transition: F,
    ) -> Result<Option<Task>, RegistryError>
    where
        F: FnOnce(&mut Task) -> Result<(), CoreError>,
    {
        let mut inner = self.inner.write().await;
        let Some(active) = inner.active.get(workspace).filter(|t| &t.id == task_id) else {
            warn!(workspace_id = %workspace, task_id = %task_id, "No matching active task to finish");
            return Ok(None);
        };

        let mut task = active.clone();
        transition(&mut task)?;
        // Release the workspace only once the terminal record is durable.
        self.store.save(&task).await?;

        inner.active.remove(workspace);
        inner.paused.remove(workspace);
        info!(
            workspace_id = %workspace,
            task_id = %task_id,
            status = %task.status,
            "Task finished, live moderation resumed"
        );
        Ok(Some(task))
    }

    /// The running task for a workspace, consulting the store on a cache miss.
    pub async fn get_active(&self, workspace: &WorkspaceId) -> Result<Option<Task>, RegistryError> {
        if let Some(task) = self.inner.read().await.active.get(workspace) {
            return Ok(Some(task.clone()));
        }

        let mut inner = self.inner.write().await;
        if let Some(task) = inner.active.get(workspace) {
            return Ok(Some(task.clone()));
        }
        let Some(task) = self.store.find_running(workspace).await? else {
            return Ok(None);
        };

        debug!(workspace_id = %workspace, task_id = %task.id, "Loaded running task from store");
        inner.active.insert(workspace.clone(), task.clone());
        inner.paused.insert(workspace.clone());
        Ok(Some(task))
    }

    /// Whether live moderation is paused for a workspace.
    pub async fn is_paused(&self, workspace: &WorkspaceId) -> bool {
        self.inner.read().await.paused.contains(workspace)
    }

    pub async fn stats(&self) -> RegistryStats {
        let inner = self.inner.read().await;
        let mut tasks: Vec<ActiveTaskSummary> = inner
            .active
            .values()
            .map(|task| ActiveTaskSummary {
                workspace_id: task.workspace_id.clone(),
                task_id: task.id.clone(),
                kind: task.kind,
                progress: task.progress.clone(),
                created_at: task.created_at,
            })
            .collect();
        tasks.sort_by(|a, b| a.workspace_id.cmp(&b.workspace_id));

        RegistryStats {
            active_count: inner.active.len(),
            paused_count: inner.paused.len(),
            tasks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicBool, Ordering};
    use sweeper_core::TaskStatus;

    fn registry() -> (Arc<TaskRegistry>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (Arc::new(TaskRegistry::new(store.clone())), store)
    }

    fn stats() -> FinalStats {
        FinalStats {
            kind: TaskKind::FullScan,
            targets_total: 1,
            targets_scanned: 1,
            messages_scanned: 5,
            messages_deleted: 1,
            unlock_operations: 0,
            completed_normally: true,
            selected_count: None,
            restore_failures: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let (registry, _) = registry();
        let ws = WorkspaceId::new("g1");

        registry
            .start_full_scan(&ws, ScanOptions::default())
            .await
            .unwrap();
        let err = registry
            .start_full_scan(&ws, ScanOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, RegistryError::TaskAlreadyActive(w) if w == ws));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_starts_exactly_one_wins() {
        let (registry, store) = registry();
        let ws = WorkspaceId::new("g1");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let ws = ws.clone();
            handles.push(tokio::spawn(async move {
                registry.start_full_scan(&ws, ScanOptions::default()).await
            }));
        }

        let mut ok = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(RegistryError::TaskAlreadyActive(_)) => rejected += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(ok, 1);
        assert_eq!(rejected, 7);
        assert_eq!(store.list(&ws).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pause_follows_task_lifecycle() {
        let (registry, store) = registry();
        let ws = WorkspaceId::new("g1");
        assert!(!registry.is_paused(&ws).await);

        let task = registry
            .start_full_scan(&ws, ScanOptions::default())
            .await
            .unwrap();
        assert!(registry.get_active(&ws).await.unwrap().is_some());
        assert!(registry.is_paused(&ws).await);

        let finished = registry.complete(&ws, &task.id, stats()).await.unwrap().unwrap();
        assert_eq!(finished.status, TaskStatus::Completed);
        assert!(registry.get_active(&ws).await.unwrap().is_none());
        assert!(!registry.is_paused(&ws).await);

        let stored = store.get(&ws, &task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(stored.final_stats, Some(stats()));
    }

    #[tokio::test]
    async fn test_stale_progress_is_ignored() {
        let (registry, _) = registry();
        let ws = WorkspaceId::new("g1");
        let task = registry
            .start_full_scan(&ws, ScanOptions::default())
            .await
            .unwrap();

        let stale = registry
            .update_progress(&ws, &TaskId::new("other"), &ProgressPatch::total_targets(9))
            .await
            .unwrap();
        assert!(!stale);

        let applied = registry
            .update_progress(&ws, &task.id, &ProgressPatch::total_targets(4))
            .await
            .unwrap();
        assert!(applied);
        let active = registry.get_active(&ws).await.unwrap().unwrap();
        assert_eq!(active.progress.total_targets, 4);
    }

    #[tokio::test]
    async fn test_persisted_running_task_blocks_start() {
        let store = Arc::new(MemoryStore::new());
        let ws = WorkspaceId::new("g1");
        let leftover = Task::full_scan(ws.clone(), None);
        store.save(&leftover).await.unwrap();

        let registry = TaskRegistry::new(store);
        let err = registry
            .start_full_scan(&ws, ScanOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::TaskAlreadyActive(_)));
        assert!(registry.is_paused(&ws).await);

        registry
            .stop(&ws, &leftover.id, StopReason::Other("recovered".into()))
            .await
            .unwrap();
        assert!(!registry.is_paused(&ws).await);
    }

    #[tokio::test]
    async fn test_get_active_loads_from_store() {
        let store = Arc::new(MemoryStore::new());
        let ws = WorkspaceId::new("g1");
        let leftover = Task::full_scan(ws.clone(), None);
        store.save(&leftover).await.unwrap();

        let registry = TaskRegistry::new(store);
        assert!(!registry.is_paused(&ws).await);
        let active = registry.get_active(&ws).await.unwrap().unwrap();

        assert_eq!(active.id, leftover.id);
        assert!(registry.is_paused(&ws).await);
    }

    #[tokio::test]
    async fn test_selected_scan_and_stats() {
        let (registry, _) = registry();
        let ws = WorkspaceId::new("g1");

        let err = registry
            .start_selected_targets_scan(&ws, Vec::new(), ScanOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NoTargetsSelected));

        let task = registry
            .start_selected_targets_scan(
                &ws,
                vec![ChannelId::new("c1"), ChannelId::new("c2")],
                ScanOptions {
                    started_by: Some(UserId::new("u1")),
                },
            )
            .await
            .unwrap();
        assert_eq!(task.kind, TaskKind::SelectedTargets);
        assert_eq!(task.selected_targets.len(), 2);

        let stats = registry.stats().await;
        assert_eq!(stats.active_count, 1);
        assert_eq!(stats.paused_count, 1);
        assert_eq!(stats.tasks[0].task_id, task.id);
    }

    /// Task store whose saves can be switched off.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_saves: AtomicBool,
    }

    #[async_trait::async_trait]
    impl TaskStore for FlakyStore {
        async fn save(&self, task: &Task) -> Result<(), StoreError> {
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(StoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk full",
                )));
            }
            self.inner.save(task).await
        }

        async fn find_running(&self, workspace: &WorkspaceId) -> Result<Option<Task>, StoreError> {
            self.inner.find_running(workspace).await
        }

        async fn get(&self, workspace: &WorkspaceId, id: &TaskId) -> Result<Option<Task>, StoreError> {
            self.inner.get(workspace, id).await
        }

        async fn list(&self, workspace: &WorkspaceId) -> Result<Vec<Task>, StoreError> {
            self.inner.list(workspace).await
        }

        async fn delete(&self, workspace: &WorkspaceId, id: &TaskId) -> Result<bool, StoreError> {
            self.inner.delete(workspace, id).await
        }
    }

    #[tokio::test]
    async fn test_failed_terminal_save_keeps_task_active() {
        let store = Arc::new(FlakyStore::default());
        let registry = TaskRegistry::new(store.clone());
        let ws = WorkspaceId::new("g1");
        let task = registry
            .start_full_scan(&ws, ScanOptions::default())
            .await
            .unwrap();

        store.fail_saves.store(true, Ordering::SeqCst);
        let err = registry
            .stop(&ws, &task.id, StopReason::UserRequested)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Store(_)));
        assert!(registry.is_paused(&ws).await);
        assert_eq!(registry.get_active(&ws).await.unwrap().unwrap().status, TaskStatus::Running);

        store.fail_saves.store(false, Ordering::SeqCst);
        let stopped = registry
            .stop(&ws, &task.id, StopReason::UserRequested)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stopped.status, TaskStatus::Stopped);
        assert!(!registry.is_paused(&ws).await);
        assert!(store.find_running(&ws).await.unwrap().is_none());
        registry
            .start_full_scan(&ws, ScanOptions::default())
            .await
            .unwrap();
    }
}
