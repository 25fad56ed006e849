//! Persistence collaborators: task records and per-workspace moderation settings.

pub mod json;
pub mod memory;

pub use json::JsonFileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use sweeper_core::{ChannelId, Task, TaskId, WorkspaceId};

/// Errors from a persistence backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Moderation settings for one workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationSettings {
    /// Literal keywords and `/regex/` rules.
    #[serde(default)]
    pub banned_keywords: Vec<String>,

    /// Channels watched by live moderation; empty means all.
    #[serde(default)]
    pub monitor_channels: Vec<ChannelId>,

    /// Channels and threads excluded from scanning. Exempting a forum exempts its threads.
    #[serde(default)]
    pub exempt_channels: Vec<ChannelId>,

    #[serde(default = "default_true")]
    pub is_enabled: bool,

    /// Live deletion of matching messages.
    #[serde(default)]
    pub auto_cleanup_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ModerationSettings {
    fn default() -> Self {
        Self {
            banned_keywords: Vec::new(),
            monitor_channels: Vec::new(),
            exempt_channels: Vec::new(),
            is_enabled: true,
            auto_cleanup_enabled: false,
        }
    }
}

impl ModerationSettings {
    pub fn is_exempt(&self, channel: &ChannelId) -> bool {
        self.exempt_channels.contains(channel)
    }

    /// Whether live moderation watches this channel.
    pub fn is_monitored(&self, channel: &ChannelId) -> bool {
        self.monitor_channels.is_empty() || self.monitor_channels.contains(channel)
    }
}

/// Durable task records.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert or replace a task record.
    async fn save(&self, task: &Task) -> Result<(), StoreError>;

    /// The running task for a workspace, if one was persisted.
    async fn find_running(&self, workspace: &WorkspaceId) -> Result<Option<Task>, StoreError>;

    async fn get(&self, workspace: &WorkspaceId, id: &TaskId) -> Result<Option<Task>, StoreError>;

    /// Every task recorded for a workspace, oldest first.
    async fn list(&self, workspace: &WorkspaceId) -> Result<Vec<Task>, StoreError>;

    /// Remove a task record; returns whether it existed.
    async fn delete(&self, workspace: &WorkspaceId, id: &TaskId) -> Result<bool, StoreError>;
}

/// Read access to moderation settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn settings(&self, workspace: &WorkspaceId) -> Result<ModerationSettings, StoreError>;

    async fn banned_rules(&self, workspace: &WorkspaceId) -> Result<Vec<String>, StoreError> {
        Ok(self.settings(workspace).await?.banned_keywords)
    }

    async fn is_channel_exempt(
        &self,
        workspace: &WorkspaceId,
        channel: &ChannelId,
    ) -> Result<bool, StoreError> {
        Ok(self.settings(workspace).await?.is_exempt(channel))
    }

    /// A thread is exempt when it or its parent channel is.
    async fn is_thread_exempt(
        &self,
        workspace: &WorkspaceId,
        thread: &ChannelId,
        parent: Option<&ChannelId>,
    ) -> Result<bool, StoreError> {
        let settings = self.settings(workspace).await?;
        Ok(settings.is_exempt(thread) || parent.is_some_and(|p| settings.is_exempt(p)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let settings: ModerationSettings =
            serde_json::from_str(r#"{"bannedKeywords":["spam"],"exemptChannels":["c9"]}"#).unwrap();

        assert_eq!(settings.banned_keywords, vec!["spam".to_string()]);
        assert!(settings.is_enabled);
        assert!(!settings.auto_cleanup_enabled);
        assert!(settings.is_exempt(&ChannelId::new("c9")));
        assert!(settings.is_monitored(&ChannelId::new("anything")));
    }

    #[tokio::test]
    async fn test_thread_exempt_through_parent() {
        let store = MemoryStore::new();
        let ws = WorkspaceId::new("g1");
        store
            .update_settings(&ws, |s| s.exempt_channels.push(ChannelId::new("forum")))
            .await;

        let thread = ChannelId::new("t1");
        assert!(store
            .is_thread_exempt(&ws, &thread, Some(&ChannelId::new("forum")))
            .await
            .unwrap());
        assert!(!store.is_thread_exempt(&ws, &thread, None).await.unwrap());
    }
}
