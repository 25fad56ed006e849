//! Messages fetched from the platform and the matcher's verdict on them.

use serde::{Deserialize, Serialize};

use crate::{ChannelId, MessageId, UserId};

/// A single message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<UserId>,

    #[serde(default)]
    pub content: String,

    /// Sent by a bot account.
    #[serde(default)]
    pub author_is_bot: bool,

    /// Platform-generated (joins, pins, ...).
    #[serde(default)]
    pub system: bool,
}

impl Message {
    /// Create a user message with the given content.
    pub fn new(
        id: impl Into<MessageId>,
        channel_id: impl Into<ChannelId>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            channel_id: channel_id.into(),
            author_id: None,
            content: content.into(),
            author_is_bot: false,
            system: false,
        }
    }
}

/// One page of history, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,

    /// Older messages exist beyond this page.
    pub has_more: bool,
}

impl MessagePage {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Cursor for the next (older) page.
    pub fn oldest_id(&self) -> Option<&MessageId> {
        self.messages.last().map(|m| &m.id)
    }
}

/// Verdict of the content matcher for one message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub should_delete: bool,
    pub matched_rules: Vec<String>,
}

impl MatchResult {
    /// Build a result from the rules that matched.
    pub fn from_matches(matched_rules: Vec<String>) -> Self {
        Self {
            should_delete: !matched_rules.is_empty(),
            matched_rules,
        }
    }
}
