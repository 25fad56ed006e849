//! Target enumeration.
//!
//! Walks a workspace's channel listing in discovery order, drops unviewable
//! and exempt channels, and turns what is left into [`ScanTarget`]s. Forums
//! expand into their active threads followed by their archived threads.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use sweeper_core::{ChannelId, ChannelInfo, ChannelKind, ScanTarget, TargetKind, WorkspaceId};

use crate::limiter::RateLimiter;
use crate::platform::{Platform, PlatformError};
use crate::store::{SettingsStore, StoreError};

/// Errors that prevent enumeration as a whole.
#[derive(Debug, Error)]
pub enum EnumerationError {
    #[error("Failed to list channels: {0}")]
    Platform(#[from] PlatformError),

    #[error("Failed to read exemptions: {0}")]
    Store(#[from] StoreError),
}

/// Counters logged after enumeration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnumerationSummary {
    pub channels: usize,
    pub threads: usize,
    pub forum_threads: usize,
    pub exempt: usize,
    pub unviewable: usize,
    pub unknown: usize,
    pub failed_forums: usize,
}

impl EnumerationSummary {
    fn count(&mut self, target: &ScanTarget) {
        match target.kind {
            TargetKind::Channel => self.channels += 1,
            TargetKind::Thread => self.threads += 1,
            TargetKind::ForumThread => self.forum_threads += 1,
        }
    }

    fn log(&self, workspace: &WorkspaceId) {
        info!(
            workspace_id = %workspace,
            channels = self.channels,
            threads = self.threads,
            forum_threads = self.forum_threads,
            exempt = self.exempt,
            unviewable = self.unviewable,
            unknown = self.unknown,
            failed_forums = self.failed_forums,
            "Enumerated scan targets"
        );
    }
}

/// Builds the ordered target list for a run.
pub struct TargetEnumerator {
    platform: Arc<dyn Platform>,
    settings: Arc<dyn SettingsStore>,
    limiter: Arc<RateLimiter>,
}

impl TargetEnumerator {
    pub fn new(
        platform: Arc<dyn Platform>,
        settings: Arc<dyn SettingsStore>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            platform,
            settings,
            limiter,
        }
    }

    /// Every scannable target in the workspace.
    pub async fn enumerate(
        &self,
        workspace: &WorkspaceId,
    ) -> Result<Vec<ScanTarget>, EnumerationError> {
        let channels = self
            .limiter
            .execute(|| self.platform.list_channels(workspace))
            .await?;

        let names: HashMap<ChannelId, String> = channels
            .iter()
            .map(|c| (c.id.clone(), c.name.clone()))
            .collect();

        let mut walk = Walk::default();
        for info in &channels {
            let parent_name = info
                .parent_id
                .as_ref()
                .and_then(|p| names.get(p).cloned());
            self.visit(workspace, info, parent_name, &mut walk).await?;
        }

        walk.summary.log(workspace);
        Ok(walk.targets)
    }

    /// Targets for an explicit channel selection, skipping unknown,
    /// unviewable and exempt channels.
    pub async fn resolve_selected(
        &self,
        workspace: &WorkspaceId,
        selected: &[ChannelId],
    ) -> Result<Vec<ScanTarget>, EnumerationError> {
        let mut walk = Walk::default();

        for id in selected {
            let info = match self
                .limiter
                .execute(|| self.platform.get_channel(workspace, id))
                .await
            {
                Ok(Some(info)) => info,
                Ok(None) => {
                    warn!(workspace_id = %workspace, channel_id = %id, "Selected channel not found, skipping");
                    walk.summary.unknown += 1;
                    continue;
                }
                Err(err) => {
                    warn!(workspace_id = %workspace, channel_id = %id, error = %err, "Failed to look up selected channel, skipping");
                    walk.summary.unknown += 1;
                    continue;
                }
            };

            let parent_name = match &info.parent_id {
                Some(parent) if info.kind.is_thread() => self
                    .limiter
                    .execute(|| self.platform.get_channel(workspace, parent))
                    .await
                    .ok()
                    .flatten()
                    .map(|p| p.name),
                _ => None,
            };
            self.visit(workspace, &info, parent_name, &mut walk).await?;
        }

        walk.summary.log(workspace);
        Ok(walk.targets)
    }

    async fn visit(
        &self,
        workspace: &WorkspaceId,
        info: &ChannelInfo,
        parent_name: Option<String>,
        walk: &mut Walk,
    ) -> Result<(), EnumerationError> {
        if !info.viewable {
            debug!(channel = %info.name, "Channel not viewable, skipping");
            walk.summary.unviewable += 1;
            return Ok(());
        }
        if self.settings.is_channel_exempt(workspace, &info.id).await? {
            debug!(channel = %info.name, "Channel exempt, skipping");
            walk.summary.exempt += 1;
            return Ok(());
        }

        match info.kind {
            ChannelKind::Text | ChannelKind::Announcement => {
                walk.push(ScanTarget::channel(info));
            }
            ChannelKind::Voice | ChannelKind::Stage => {
                if info.text_capable {
                    walk.push(ScanTarget::channel(info));
                }
            }
            ChannelKind::PublicThread | ChannelKind::PrivateThread => {
                if self
                    .settings
                    .is_thread_exempt(workspace, &info.id, info.parent_id.as_ref())
                    .await?
                {
                    debug!(thread = %info.name, "Thread exempt through its parent, skipping");
                    walk.summary.exempt += 1;
                    return Ok(());
                }
                walk.push(ScanTarget::thread(info, parent_name));
            }
            ChannelKind::Forum => {
                self.expand_forum(workspace, info, walk).await?;
            }
            ChannelKind::Category | ChannelKind::Other => {}
        }
        Ok(())
    }

    async fn expand_forum(
        &self,
        workspace: &WorkspaceId,
        forum: &ChannelInfo,
        walk: &mut Walk,
    ) -> Result<(), EnumerationError> {
        let listed = async {
            let active = self
                .limiter
                .execute(|| self.platform.list_active_threads(&forum.id))
                .await?;
            let archived = self
                .limiter
                .execute(|| self.platform.list_archived_threads(&forum.id))
                .await?;
            Ok::<_, PlatformError>((active, archived))
        }
        .await;

        let (active, archived) = match listed {
            Ok(lists) => lists,
            Err(err) => {
                warn!(forum = %forum.name, error = %err, "Failed to list forum threads, skipping forum");
                walk.summary.failed_forums += 1;
                return Ok(());
            }
        };

        let (active_count, archived_count) = (active.len(), archived.len());
        let listings = active
            .iter()
            .map(|t| (t, false))
            .chain(archived.iter().map(|t| (t, true)));

        for (thread, from_archive) in listings {
            if self
                .settings
                .is_thread_exempt(workspace, &thread.id, Some(&forum.id))
                .await?
            {
                walk.summary.exempt += 1;
                continue;
            }
            walk.push(ScanTarget::forum_thread(thread, &forum.name, from_archive));
        }

        debug!(
            forum = %forum.name,
            active = active_count,
            archived = archived_count,
            "Expanded forum"
        );
        Ok(())
    }
}

#[derive(Default)]
struct Walk {
    targets: Vec<ScanTarget>,
    seen: HashSet<ChannelId>,
    summary: EnumerationSummary,
}

impl Walk {
    fn push(&mut self, target: ScanTarget) {
        if self.seen.insert(target.id.clone()) {
            self.summary.count(&target);
            self.targets.push(target);
        }
    }
}
