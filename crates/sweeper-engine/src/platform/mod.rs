//! The chat platform as seen by the scan engine.
//!
//! The engine never talks to a concrete REST client; everything goes through
//! the [`Platform`] capability set so tests and offline tooling can swap in
//! [`memory::MemoryPlatform`].

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use sweeper_core::{ChannelId, ChannelInfo, MessageId, MessagePage, WorkspaceId};

/// Maximum page size the platform accepts for history fetches.
pub const MAX_PAGE_SIZE: usize = 100;

/// Errors returned by the platform.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    /// The bot lacks a permission for this action.
    #[error("Missing permissions: {0}")]
    MissingPermissions(String),

    /// The bot cannot access the channel at all.
    #[error("Missing access: {0}")]
    MissingAccess(String),

    /// The channel or message no longer exists.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The thread is archived and rejects the action.
    #[error("Thread is archived: {0}")]
    ThreadArchived(String),

    /// Any other request failure.
    #[error("Request failed: {0}")]
    Request(String),
}

/// How the orchestrator treats a platform failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Insufficient rights; expected, abort the target.
    Permission,
    /// The item vanished; expected.
    NotFound,
    /// Anything else.
    Transient,
}

impl PlatformError {
    /// Classify this error for failure isolation.
    pub fn class(&self) -> FailureClass {
        match self {
            Self::MissingPermissions(_) | Self::MissingAccess(_) => FailureClass::Permission,
            Self::NotFound(_) => FailureClass::NotFound,
            Self::ThreadArchived(_) | Self::Request(_) => FailureClass::Transient,
        }
    }
}

/// Result of a per-channel capability check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessCheck {
    pub can_access: bool,
    pub missing: Vec<String>,
}

impl AccessCheck {
    pub fn granted() -> Self {
        Self {
            can_access: true,
            missing: Vec::new(),
        }
    }

    pub fn denied(missing: Vec<String>) -> Self {
        Self {
            can_access: false,
            missing,
        }
    }
}

/// Capabilities consumed from the chat platform.
#[async_trait]
pub trait Platform: Send + Sync {
    /// List every channel in the workspace.
    async fn list_channels(&self, workspace: &WorkspaceId)
        -> Result<Vec<ChannelInfo>, PlatformError>;

    /// Look up a single channel or thread.
    async fn get_channel(
        &self,
        workspace: &WorkspaceId,
        channel: &ChannelId,
    ) -> Result<Option<ChannelInfo>, PlatformError>;

    /// Active threads under a forum channel.
    async fn list_active_threads(&self, forum: &ChannelId)
        -> Result<Vec<ChannelInfo>, PlatformError>;

    /// Archived threads under a forum channel.
    async fn list_archived_threads(
        &self,
        forum: &ChannelId,
    ) -> Result<Vec<ChannelInfo>, PlatformError>;

    /// Fetch up to `limit` messages older than `before` (newest first).
    async fn fetch_messages(
        &self,
        channel: &ChannelId,
        before: Option<&MessageId>,
        limit: usize,
    ) -> Result<MessagePage, PlatformError>;

    /// Delete one message.
    async fn delete_message(
        &self,
        channel: &ChannelId,
        message: &MessageId,
    ) -> Result<(), PlatformError>;

    async fn set_thread_archived(
        &self,
        thread: &ChannelId,
        archived: bool,
    ) -> Result<(), PlatformError>;

    async fn set_thread_locked(&self, thread: &ChannelId, locked: bool)
        -> Result<(), PlatformError>;

    /// Check view, read-history and manage-messages rights on a channel.
    async fn check_access(&self, channel: &ChannelId) -> Result<AccessCheck, PlatformError>;
}
