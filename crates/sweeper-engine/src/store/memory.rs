//! In-memory store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use sweeper_core::{Task, TaskId, TaskStatus, WorkspaceId};

use super::{ModerationSettings, SettingsStore, StoreError, TaskStore};

/// Store that keeps everything in process memory.
#[derive(Default)]
pub struct MemoryStore {
    tasks: RwLock<HashMap<WorkspaceId, Vec<Task>>>,
    settings: RwLock<HashMap<WorkspaceId, ModerationSettings>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutate a workspace's settings in place.
    pub async fn update_settings<F>(&self, workspace: &WorkspaceId, f: F)
    where
        F: FnOnce(&mut ModerationSettings),
    {
        let mut settings = self.settings.write().await;
        f(settings.entry(workspace.clone()).or_default());
    }

    /// Replace the banned rules for a workspace.
    pub async fn set_rules(&self, workspace: &WorkspaceId, rules: &[&str]) {
        self.update_settings(workspace, |s| {
            s.banned_keywords = rules.iter().map(|r| r.to_string()).collect();
        })
        .await;
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn save(&self, task: &Task) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        let records = tasks.entry(task.workspace_id.clone()).or_default();
        match records.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task.clone(),
            None => records.push(task.clone()),
        }
        Ok(())
    }

    async fn find_running(&self, workspace: &WorkspaceId) -> Result<Option<Task>, StoreError> {
        let tasks = self.tasks.read().await;
        Ok(tasks.get(workspace).and_then(|records| {
            records
                .iter()
                .find(|t| t.status == TaskStatus::Running)
                .cloned()
        }))
    }

    async fn get(&self, workspace: &WorkspaceId, id: &TaskId) -> Result<Option<Task>, StoreError> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .get(workspace)
            .and_then(|records| records.iter().find(|t| &t.id == id).cloned()))
    }

    async fn list(&self, workspace: &WorkspaceId) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read().await;
        Ok(tasks.get(workspace).cloned().unwrap_or_default())
    }

    async fn delete(&self, workspace: &WorkspaceId, id: &TaskId) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.write().await;
        let Some(records) = tasks.get_mut(workspace) else {
            return Ok(false);
        };
        let before = records.len();
        records.retain(|t| &t.id != id);
        Ok(records.len() != before)
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn settings(&self, workspace: &WorkspaceId) -> Result<ModerationSettings, StoreError> {
        let settings = self.settings.read().await;
        Ok(settings.get(workspace).cloned().unwrap_or_default())
    }
}
