//! JSON file store.
//!
//! Layout under the data directory:
//! - `settings.json`: workspace id → [`ModerationSettings`]
//! - `tasks.json`: workspace id → task id → [`Task`]
//!
//! Every read goes to disk. Writes are serialized by an async mutex and land
//! through a temporary file that is renamed over the original.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use sweeper_core::{ChannelId, Task, TaskId, TaskStatus, WorkspaceId};

use super::{ModerationSettings, SettingsStore, StoreError, TaskStore};

type SettingsFile = BTreeMap<WorkspaceId, ModerationSettings>;
type TasksFile = BTreeMap<WorkspaceId, BTreeMap<TaskId, Task>>;

/// File-backed store for settings and task records.
pub struct JsonFileStore {
    settings_path: PathBuf,
    tasks_path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open (lazily) the store rooted at `data_dir`.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let dir = data_dir.as_ref();
        Self {
            settings_path: dir.join("settings.json"),
            tasks_path: dir.join("tasks.json"),
            write_lock: Mutex::new(()),
        }
    }

    /// Apply `f` to a workspace's settings and persist the result.
    pub async fn update_settings<F, R>(&self, workspace: &WorkspaceId, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut ModerationSettings) -> R,
    {
        let _guard = self.write_lock.lock().await;
        let mut file: SettingsFile = read_json(&self.settings_path).await?;
        let result = f(file.entry(workspace.clone()).or_default());
        write_json(&self.settings_path, &file).await?;
        Ok(result)
    }

    /// Add a banned rule; returns false if it was already present.
    pub async fn add_rule(&self, workspace: &WorkspaceId, rule: &str) -> Result<bool, StoreError> {
        let rule = rule.trim().to_owned();
        self.update_settings(workspace, |s| {
            if rule.is_empty() || s.banned_keywords.contains(&rule) {
                return false;
            }
            s.banned_keywords.push(rule);
            true
        })
        .await
    }

    /// Remove a banned rule; returns false if it was not present.
    pub async fn remove_rule(&self, workspace: &WorkspaceId, rule: &str) -> Result<bool, StoreError> {
        let rule = rule.trim();
        self.update_settings(workspace, |s| {
            let before = s.banned_keywords.len();
            s.banned_keywords.retain(|r| r != rule);
            s.banned_keywords.len() != before
        })
        .await
    }

    pub async fn add_exempt(
        &self,
        workspace: &WorkspaceId,
        channel: &ChannelId,
    ) -> Result<bool, StoreError> {
        self.update_settings(workspace, |s| {
            if s.exempt_channels.contains(channel) {
                return false;
            }
            s.exempt_channels.push(channel.clone());
            true
        })
        .await
    }

    pub async fn remove_exempt(
        &self,
        workspace: &WorkspaceId,
        channel: &ChannelId,
    ) -> Result<bool, StoreError> {
        self.update_settings(workspace, |s| {
            let before = s.exempt_channels.len();
            s.exempt_channels.retain(|c| c != channel);
            s.exempt_channels.len() != before
        })
        .await
    }

    /// Every workspace with at least one task record.
    pub async fn workspaces(&self) -> Result<Vec<WorkspaceId>, StoreError> {
        let file: TasksFile = read_json(&self.tasks_path).await?;
        Ok(file.into_keys().collect())
    }

    async fn update_tasks<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut TasksFile) -> R,
    {
        let _guard = self.write_lock.lock().await;
        let mut file: TasksFile = read_json(&self.tasks_path).await?;
        let result = f(&mut file);
        write_json(&self.tasks_path, &file).await?;
        Ok(result)
    }
}

async fn read_json<T>(path: &Path) -> Result<T, StoreError>
where
    T: DeserializeOwned + Default,
{
    match fs::read_to_string(path).await {
        Ok(content) if content.trim().is_empty() => Ok(T::default()),
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(err) => Err(err.into()),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).await?;
    fs::rename(&tmp, path).await?;
    debug!(path = %path.display(), "Wrote store file");
    Ok(())
}

#[async_trait]
impl TaskStore for JsonFileStore {
    async fn save(&self, task: &Task) -> Result<(), StoreError> {
        let task = task.clone();
        self.update_tasks(move |file| {
            file.entry(task.workspace_id.clone())
                .or_default()
                .insert(task.id.clone(), task);
        })
        .await
    }

    async fn find_running(&self, workspace: &WorkspaceId) -> Result<Option<Task>, StoreError> {
        let file: TasksFile = read_json(&self.tasks_path).await?;
        Ok(file.get(workspace).and_then(|tasks| {
            tasks
                .values()
                .find(|t| t.status == TaskStatus::Running)
                .cloned()
        }))
    }

    async fn get(&self, workspace: &WorkspaceId, id: &TaskId) -> Result<Option<Task>, StoreError> {
        let file: TasksFile = read_json(&self.tasks_path).await?;
        Ok(file.get(workspace).and_then(|tasks| tasks.get(id).cloned()))
    }

    async fn list(&self, workspace: &WorkspaceId) -> Result<Vec<Task>, StoreError> {
        let file: TasksFile = read_json(&self.tasks_path).await?;
        let mut tasks: Vec<Task> = file
            .get(workspace)
            .map(|tasks| tasks.values().cloned().collect())
            .unwrap_or_default();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn delete(&self, workspace: &WorkspaceId, id: &TaskId) -> Result<bool, StoreError> {
        self.update_tasks(|file| {
            let Some(tasks) = file.get_mut(workspace) else {
                return false;
            };
            let removed = tasks.remove(id).is_some();
            if tasks.is_empty() {
                file.remove(workspace);
            }
            removed
        })
        .await
    }
}

#[async_trait]
impl SettingsStore for JsonFileStore {
    async fn settings(&self, workspace: &WorkspaceId) -> Result<ModerationSettings, StoreError> {
        let file: SettingsFile = read_json(&self.settings_path).await?;
        Ok(file.get(workspace).cloned().unwrap_or_default())
    }
}
