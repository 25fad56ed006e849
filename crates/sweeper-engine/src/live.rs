//! Real-time moderation of newly posted messages.
//!
//! This is the path a bulk scan pauses: while the registry reports the
//! workspace as paused, incoming messages are left alone.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use sweeper_core::{Message, WorkspaceId};

use crate::limiter::RateLimiter;
use crate::matcher::ContentMatcher;
use crate::platform::{Platform, PlatformError};
use crate::registry::TaskRegistry;
use crate::store::{SettingsStore, StoreError};

/// Errors from the live moderation path.
#[derive(Debug, Error)]
pub enum LiveError {
    #[error("Failed to load settings: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to delete message: {0}")]
    Platform(#[from] PlatformError),
}

/// Why a message was not inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    BotAuthor,
    SystemMessage,
    /// A bulk scan is running for the workspace.
    Paused,
    Disabled,
    NoRules,
    NotMonitored,
}

/// What happened to one incoming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveOutcome {
    Ignored(IgnoreReason),
    Clean,
    Deleted { matched_rules: Vec<String> },
}

/// Gate for incoming messages.
pub struct LiveModerator {
    registry: Arc<TaskRegistry>,
    settings: Arc<dyn SettingsStore>,
    platform: Arc<dyn Platform>,
    limiter: Arc<RateLimiter>,
    matcher: ContentMatcher,
}

impl LiveModerator {
    pub fn new(
        registry: Arc<TaskRegistry>,
        settings: Arc<dyn SettingsStore>,
        platform: Arc<dyn Platform>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            registry,
            settings,
            platform,
            limiter,
            matcher: ContentMatcher::new(),
        }
    }

    pub async fn handle_message(
        &self,
        workspace: &WorkspaceId,
        message: &Message,
    ) -> Result<LiveOutcome, LiveError> {
        if message.author_is_bot {
            return Ok(LiveOutcome::Ignored(IgnoreReason::BotAuthor));
        }
        if message.system {
            return Ok(LiveOutcome::Ignored(IgnoreReason::SystemMessage));
        }
        if self.registry.is_paused(workspace).await {
            debug!(workspace_id = %workspace, "Live moderation paused by running scan");
            return Ok(LiveOutcome::Ignored(IgnoreReason::Paused));
        }

        let settings = self.settings.settings(workspace).await?;
        if !settings.is_enabled || !settings.auto_cleanup_enabled {
            return Ok(LiveOutcome::Ignored(IgnoreReason::Disabled));
        }
        if settings.banned_keywords.is_empty() {
            return Ok(LiveOutcome::Ignored(IgnoreReason::NoRules));
        }
        if !settings.is_monitored(&message.channel_id) {
            return Ok(LiveOutcome::Ignored(IgnoreReason::NotMonitored));
        }

        let verdict = self
            .matcher
            .check_message(message, &settings.banned_keywords);
        if !verdict.should_delete {
            return Ok(LiveOutcome::Clean);
        }

        self.limiter
            .execute(|| {
                self.platform
                    .delete_message(&message.channel_id, &message.id)
            })
            .await?;
        info!(
            workspace_id = %workspace,
            channel_id = %message.channel_id,
            message_id = %message.id,
            rules = ?verdict.matched_rules,
            "Deleted violating message"
        );

        Ok(LiveOutcome::Deleted {
            matched_rules: verdict.matched_rules,
        })
    }
}
