//! Channels as reported by the platform, and the scan targets built from them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ChannelId;

/// Kind of a platform channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Text,
    Announcement,
    Voice,
    Stage,
    Forum,
    PublicThread,
    PrivateThread,
    Category,
    #[serde(other)]
    Other,
}

impl ChannelKind {
    /// Returns true for nested conversations (threads).
    pub fn is_thread(&self) -> bool {
        matches!(self, Self::PublicThread | Self::PrivateThread)
    }
}

/// A channel or thread as listed by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub name: String,
    pub kind: ChannelKind,

    /// Whether the bot can see this channel at all.
    #[serde(default = "default_true")]
    pub viewable: bool,

    /// Whether a voice/stage channel carries a text chat.
    #[serde(default)]
    pub text_capable: bool,

    /// Parent forum/channel for threads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ChannelId>,

    #[serde(default)]
    pub locked: bool,

    #[serde(default)]
    pub archived: bool,
}

fn default_true() -> bool {
    true
}

impl ChannelInfo {
    /// Create a viewable, unlocked channel of the given kind.
    pub fn new(id: impl Into<ChannelId>, name: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            viewable: true,
            text_capable: matches!(kind, ChannelKind::Text | ChannelKind::Announcement),
            parent_id: None,
            locked: false,
            archived: false,
        }
    }

    /// Builder method to set the parent channel.
    pub fn with_parent(mut self, parent: impl Into<ChannelId>) -> Self {
        self.parent_id = Some(parent.into());
        self
    }

    /// Builder method to set lock/archive flags.
    pub fn with_flags(mut self, locked: bool, archived: bool) -> Self {
        self.locked = locked;
        self.archived = archived;
        self
    }

    /// Builder method to mark a voice/stage channel as carrying text.
    pub fn with_text(mut self) -> Self {
        self.text_capable = true;
        self
    }

    /// Builder method to hide the channel from the bot.
    pub fn hidden(mut self) -> Self {
        self.viewable = false;
        self
    }
}

/// Kind of a scan target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// A plain message channel.
    Channel,
    /// A standalone thread.
    Thread,
    /// A thread under a forum channel.
    ForumThread,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Channel => "channel",
            Self::Thread => "thread",
            Self::ForumThread => "forum_thread",
        }
    }
}

/// A scannable location, snapshotted at enumeration time.
///
/// The lock/archive flags record the state seen during enumeration and are
/// never refreshed; the deleter restores exactly these values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanTarget {
    pub id: ChannelId,
    pub display_name: String,
    pub kind: TargetKind,

    /// Write access is restricted; deletion needs the unlock sequence.
    pub is_locked: bool,

    /// The thread was locked when enumerated.
    pub was_locked: bool,

    /// The thread was archived when enumerated.
    pub was_archived: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_forum_name: Option<String>,
}

impl ScanTarget {
    /// A plain message channel.
    pub fn channel(info: &ChannelInfo) -> Self {
        Self {
            id: info.id.clone(),
            display_name: info.name.clone(),
            kind: TargetKind::Channel,
            is_locked: false,
            was_locked: false,
            was_archived: false,
            parent_forum_name: None,
        }
    }

    /// A standalone thread, optionally carrying its parent's name.
    pub fn thread(info: &ChannelInfo, parent_name: Option<String>) -> Self {
        Self {
            id: info.id.clone(),
            display_name: info.name.clone(),
            kind: TargetKind::Thread,
            is_locked: info.locked || info.archived,
            was_locked: info.locked,
            was_archived: info.archived,
            parent_forum_name: parent_name,
        }
    }

    /// A thread listed under a forum channel.
    ///
    /// Threads that came from the archived listing always need unlocking.
    pub fn forum_thread(info: &ChannelInfo, forum_name: &str, from_archive: bool) -> Self {
        let archived = info.archived || from_archive;
        Self {
            id: info.id.clone(),
            display_name: info.name.clone(),
            kind: TargetKind::ForumThread,
            is_locked: info.locked || archived,
            was_locked: info.locked,
            was_archived: archived,
            parent_forum_name: Some(forum_name.to_owned()),
        }
    }

    /// Returns true if the target is a thread of either kind.
    pub fn is_thread(&self) -> bool {
        matches!(self.kind, TargetKind::Thread | TargetKind::ForumThread)
    }

    /// Name including the parent forum, e.g. `forum/thread`.
    pub fn qualified_name(&self) -> String {
        match &self.parent_forum_name {
            Some(parent) => format!("{}/{}", parent, self.display_name),
            None => self.display_name.clone(),
        }
    }
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.as_str(), self.qualified_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archived_forum_thread_needs_unlock() {
        let info = ChannelInfo::new("t1", "old-post", ChannelKind::PublicThread).with_parent("f1");
        let target = ScanTarget::forum_thread(&info, "showcase", true);

        assert!(target.is_locked);
        assert!(target.was_archived);
        assert!(!target.was_locked);
        assert_eq!(target.qualified_name(), "showcase/old-post");
    }

    #[test]
    fn test_active_unlocked_thread_is_plain() {
        let info = ChannelInfo::new("t2", "fresh", ChannelKind::PublicThread);
        let target = ScanTarget::thread(&info, None);

        assert!(!target.is_locked);
        assert!(target.is_thread());
    }

    #[test]
    fn test_unknown_channel_kind_deserializes() {
        let info: ChannelInfo =
            serde_json::from_str(r#"{"id":"1","name":"x","kind":"directory"}"#).unwrap();
        assert_eq!(info.kind, ChannelKind::Other);
        assert!(info.viewable);
    }
}
