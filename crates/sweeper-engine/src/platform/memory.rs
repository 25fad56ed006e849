//! In-memory platform backed by a workspace snapshot.
//!
//! Used by the CLI to scan exported snapshots offline and by tests as a
//! deterministic fake. Every call is recorded, and faults can be injected per
//! channel, message, or thread operation.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sweeper_core::{
    ChannelId, ChannelInfo, Message, MessageId, MessagePage, UserId, WorkspaceId,
};

use super::{AccessCheck, Platform, PlatformError};

/// A recorded platform call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    ListChannels,
    GetChannel(ChannelId),
    ListActiveThreads(ChannelId),
    ListArchivedThreads(ChannelId),
    FetchMessages {
        channel: ChannelId,
        before: Option<MessageId>,
        limit: usize,
    },
    DeleteMessage {
        channel: ChannelId,
        message: MessageId,
    },
    SetArchived {
        thread: ChannelId,
        archived: bool,
    },
    SetLocked {
        thread: ChannelId,
        locked: bool,
    },
    CheckAccess(ChannelId),
}

/// Thread state mutations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadOp {
    Archive,
    Unarchive,
    Lock,
    Unlock,
}

impl ThreadOp {
    fn archive(archived: bool) -> Self {
        if archived {
            Self::Archive
        } else {
            Self::Unarchive
        }
    }

    fn lock(locked: bool) -> Self {
        if locked {
            Self::Lock
        } else {
            Self::Unlock
        }
    }
}

#[derive(Debug, Clone)]
struct Fault {
    error: PlatformError,
    /// Remaining failures; `None` fails forever.
    remaining: Option<usize>,
}

impl Fault {
    fn new(error: PlatformError, times: Option<usize>) -> Self {
        Self {
            error,
            remaining: times,
        }
    }
}

fn take_fault<K: std::hash::Hash + Eq>(
    faults: &mut HashMap<K, Fault>,
    key: &K,
) -> Result<(), PlatformError> {
    let Some(fault) = faults.get_mut(key) else {
        return Ok(());
    };
    let error = fault.error.clone();
    match fault.remaining {
        None => Err(error),
        Some(0) => Ok(()),
        Some(ref mut n) => {
            *n -= 1;
            Err(error)
        }
    }
}

#[derive(Default)]
struct State {
    /// Top-level listing, in discovery order.
    channels: Vec<ChannelInfo>,
    /// Threads under forum channels.
    threads: Vec<ChannelInfo>,
    /// History per channel, oldest first.
    messages: HashMap<ChannelId, Vec<Message>>,
    /// Deleted messages stay in `messages` so older cursors keep resolving.
    deleted: HashSet<MessageId>,
    denied: HashMap<ChannelId, Vec<String>>,
    listing_fault: Option<PlatformError>,
    fetch_faults: HashMap<ChannelId, Fault>,
    delete_faults: HashMap<MessageId, Fault>,
    thread_faults: HashMap<(ChannelId, ThreadOp), Fault>,
    calls: Vec<PlatformCall>,
}

impl State {
    fn find(&self, id: &ChannelId) -> Option<&ChannelInfo> {
        self.channels
            .iter()
            .chain(self.threads.iter())
            .find(|c| &c.id == id)
    }

    fn find_mut(&mut self, id: &ChannelId) -> Option<&mut ChannelInfo> {
        self.channels
            .iter_mut()
            .chain(self.threads.iter_mut())
            .find(|c| &c.id == id)
    }

    /// Messages not yet deleted, oldest first.
    fn visible<'a>(&'a self, channel: &ChannelId) -> impl Iterator<Item = &'a Message> + 'a {
        self.messages
            .get(channel)
            .into_iter()
            .flatten()
            .filter(move |m| !self.deleted.contains(&m.id))
    }

    fn ensure_access(&self, id: &ChannelId) -> Result<(), PlatformError> {
        match self.denied.get(id) {
            Some(_) => Err(PlatformError::MissingAccess(id.to_string())),
            None => Ok(()),
        }
    }
}

/// Deterministic in-memory [`Platform`].
pub struct MemoryPlatform {
    workspace_id: WorkspaceId,
    state: Mutex<State>,
}

impl MemoryPlatform {
    /// Create an empty workspace.
    pub fn new(workspace_id: impl Into<WorkspaceId>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn workspace_id(&self) -> &WorkspaceId {
        &self.workspace_id
    }

    /// Add a channel to the top-level listing.
    pub fn add_channel(&self, info: ChannelInfo) {
        self.state().channels.push(info);
    }

    /// Add a thread under a forum channel (not part of the top-level listing).
    pub fn add_forum_thread(&self, info: ChannelInfo) {
        self.state().threads.push(info);
    }

    /// Append messages to a channel's history (oldest first).
    pub fn add_messages(&self, channel: &ChannelId, messages: impl IntoIterator<Item = Message>) {
        self.state()
            .messages
            .entry(channel.clone())
            .or_default()
            .extend(messages);
    }

    /// Make the access check and history fetches for a channel fail.
    pub fn deny_access(&self, channel: &ChannelId, missing: Vec<String>) {
        self.state().denied.insert(channel.clone(), missing);
    }

    /// Make `list_channels` fail.
    pub fn fail_listing(&self, error: PlatformError) {
        self.state().listing_fault = Some(error);
    }

    /// Make history fetches for a channel fail `times` times (`None` = always).
    pub fn fail_fetch(&self, channel: &ChannelId, error: PlatformError, times: Option<usize>) {
        self.state()
            .fetch_faults
            .insert(channel.clone(), Fault::new(error, times));
    }

    /// Make deleting a message fail `times` times (`None` = always).
    pub fn fail_delete(&self, message: &MessageId, error: PlatformError, times: Option<usize>) {
        self.state()
            .delete_faults
            .insert(message.clone(), Fault::new(error, times));
    }

    /// Make a thread state change fail `times` times (`None` = always).
    pub fn fail_thread_op(
        &self,
        thread: &ChannelId,
        op: ThreadOp,
        error: PlatformError,
        times: Option<usize>,
    ) {
        self.state()
            .thread_faults
            .insert((thread.clone(), op), Fault::new(error, times));
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<PlatformCall> {
        self.state().calls.clone()
    }

    /// Number of history fetches made against a channel.
    pub fn fetch_count(&self, channel: &ChannelId) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| matches!(c, PlatformCall::FetchMessages { channel: ch, .. } if ch == channel))
            .count()
    }

    /// Current state of a channel or thread.
    pub fn channel(&self, id: &ChannelId) -> Option<ChannelInfo> {
        self.state().find(id).cloned()
    }

    /// Ids of the messages still present in a channel, oldest first.
    pub fn message_ids(&self, channel: &ChannelId) -> Vec<MessageId> {
        self.state()
            .visible(channel)
            .map(|m| m.id.clone())
            .collect()
    }

    /// Build a platform from an exported snapshot.
    pub fn from_snapshot(snapshot: WorkspaceSnapshot) -> Self {
        let platform = Self::new(snapshot.workspace_id);
        {
            let mut state = platform.state();
            for channel in snapshot.channels {
                load_channel(&mut state, channel, false);
            }
        }
        platform
    }

    /// Export the current state as a snapshot.
    pub fn to_snapshot(&self) -> WorkspaceSnapshot {
        let state = self.state();
        let channels = state
            .channels
            .iter()
            .map(|info| {
                let mut exported = export_channel(&state, info);
                exported.threads = state
                    .threads
                    .iter()
                    .filter(|t| t.parent_id.as_ref() == Some(&info.id))
                    .map(|t| export_channel(&state, t))
                    .collect();
                exported
            })
            .collect();

        WorkspaceSnapshot {
            workspace_id: self.workspace_id.clone(),
            channels,
        }
    }
}

fn load_channel(state: &mut State, snapshot: SnapshotChannel, nested: bool) {
    let SnapshotChannel {
        info,
        messages,
        threads,
        missing_permissions,
    } = snapshot;

    let id = info.id.clone();
    if !missing_permissions.is_empty() {
        state.denied.insert(id.clone(), missing_permissions);
    }
    let history = messages.into_iter().map(|m| m.into_message(&id)).collect();
    state.messages.insert(id.clone(), history);

    if nested {
        state.threads.push(info);
    } else {
        state.channels.push(info);
    }

    for mut thread in threads {
        if thread.info.parent_id.is_none() {
            thread.info.parent_id = Some(id.clone());
        }
        load_channel(state, thread, true);
    }
}

fn export_channel(state: &State, info: &ChannelInfo) -> SnapshotChannel {
    SnapshotChannel {
        info: info.clone(),
        messages: state.visible(&info.id).map(SnapshotMessage::from).collect(),
        threads: Vec::new(),
        missing_permissions: state.denied.get(&info.id).cloned().unwrap_or_default(),
    }
}

/// Exported workspace state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceSnapshot {
    pub workspace_id: WorkspaceId,
    #[serde(default)]
    pub channels: Vec<SnapshotChannel>,
}

/// A channel with its history and, for forums, its threads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotChannel {
    #[serde(flatten)]
    pub info: ChannelInfo,

    /// History, oldest first.
    #[serde(default)]
    pub messages: Vec<SnapshotMessage>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub threads: Vec<SnapshotChannel>,

    /// Capabilities the bot lacks on this channel.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_permissions: Vec<String>,
}

/// A message inside a snapshot; the channel is implied by nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMessage {
    pub id: MessageId,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<UserId>,
    #[serde(default)]
    pub author_is_bot: bool,
    #[serde(default)]
    pub system: bool,
}

impl SnapshotMessage {
    fn into_message(self, channel: &ChannelId) -> Message {
        Message {
            id: self.id,
            channel_id: channel.clone(),
            author_id: self.author_id,
            content: self.content,
            author_is_bot: self.author_is_bot,
            system: self.system,
        }
    }
}

impl From<&Message> for SnapshotMessage {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id.clone(),
            content: m.content.clone(),
            author_id: m.author_id.clone(),
            author_is_bot: m.author_is_bot,
            system: m.system,
        }
    }
}

#[async_trait]
impl Platform for MemoryPlatform {
    async fn list_channels(
        &self,
        workspace: &WorkspaceId,
    ) -> Result<Vec<ChannelInfo>, PlatformError> {
        let mut state = self.state();
        state.calls.push(PlatformCall::ListChannels);
        if workspace != &self.workspace_id {
            return Err(PlatformError::NotFound(workspace.to_string()));
        }
        if let Some(error) = state.listing_fault.clone() {
            return Err(error);
        }
        Ok(state.channels.clone())
    }

    async fn get_channel(
        &self,
        workspace: &WorkspaceId,
        channel: &ChannelId,
    ) -> Result<Option<ChannelInfo>, PlatformError> {
        let mut state = self.state();
        state.calls.push(PlatformCall::GetChannel(channel.clone()));
        if workspace != &self.workspace_id {
            return Err(PlatformError::NotFound(workspace.to_string()));
        }
        Ok(state.find(channel).cloned())
    }

    async fn list_active_threads(
        &self,
        forum: &ChannelId,
    ) -> Result<Vec<ChannelInfo>, PlatformError> {
        let mut state = self.state();
        state.calls.push(PlatformCall::ListActiveThreads(forum.clone()));
        state.ensure_access(forum)?;
        Ok(state
            .threads
            .iter()
            .filter(|t| t.parent_id.as_ref() == Some(forum) && !t.archived)
            .cloned()
            .collect())
    }

    async fn list_archived_threads(
        &self,
        forum: &ChannelId,
    ) -> Result<Vec<ChannelInfo>, PlatformError> {
        let mut state = self.state();
        state
            .calls
            .push(PlatformCall::ListArchivedThreads(forum.clone()));
        state.ensure_access(forum)?;
        Ok(state
            .threads
            .iter()
            .filter(|t| t.parent_id.as_ref() == Some(forum) && t.archived)
            .cloned()
            .collect())
    }

    async fn fetch_messages(
        &self,
        channel: &ChannelId,
        before: Option<&MessageId>,
        limit: usize,
    ) -> Result<MessagePage, PlatformError> {
        let mut state = self.state();
        state.calls.push(PlatformCall::FetchMessages {
            channel: channel.clone(),
            before: before.cloned(),
            limit,
        });
        take_fault(&mut state.fetch_faults, channel)?;
        state.ensure_access(channel)?;
        if state.find(channel).is_none() {
            return Err(PlatformError::NotFound(channel.to_string()));
        }

        let history = state.messages.get(channel).map(Vec::as_slice).unwrap_or(&[]);
        let end = match before {
            Some(cursor) => history
                .iter()
                .position(|m| &m.id == cursor)
                .ok_or_else(|| PlatformError::NotFound(cursor.to_string()))?,
            None => history.len(),
        };
        let older: Vec<&Message> = history[..end]
            .iter()
            .filter(|m| !state.deleted.contains(&m.id))
            .collect();
        let start = older.len().saturating_sub(limit);

        Ok(MessagePage {
            messages: older[start..].iter().rev().map(|m| (*m).clone()).collect(),
            has_more: start > 0,
        })
    }

    async fn delete_message(
        &self,
        channel: &ChannelId,
        message: &MessageId,
    ) -> Result<(), PlatformError> {
        let mut state = self.state();
        state.calls.push(PlatformCall::DeleteMessage {
            channel: channel.clone(),
            message: message.clone(),
        });
        take_fault(&mut state.delete_faults, message)?;

        let info = state
            .find(channel)
            .ok_or_else(|| PlatformError::NotFound(channel.to_string()))?;
        if info.kind.is_thread() {
            if info.archived {
                return Err(PlatformError::ThreadArchived(channel.to_string()));
            }
            if info.locked {
                return Err(PlatformError::MissingPermissions(format!(
                    "thread {channel} is locked"
                )));
            }
        }

        if !state.visible(channel).any(|m| &m.id == message) {
            return Err(PlatformError::NotFound(message.to_string()));
        }
        state.deleted.insert(message.clone());
        Ok(())
    }

    async fn set_thread_archived(
        &self,
        thread: &ChannelId,
        archived: bool,
    ) -> Result<(), PlatformError> {
        let mut state = self.state();
        state.calls.push(PlatformCall::SetArchived {
            thread: thread.clone(),
            archived,
        });
        take_fault(&mut state.thread_faults, &(thread.clone(), ThreadOp::archive(archived)))?;

        let info = state
            .find_mut(thread)
            .filter(|info| info.kind.is_thread())
            .ok_or_else(|| PlatformError::NotFound(thread.to_string()))?;
        info.archived = archived;
        Ok(())
    }

    async fn set_thread_locked(
        &self,
        thread: &ChannelId,
        locked: bool,
    ) -> Result<(), PlatformError> {
        let mut state = self.state();
        state.calls.push(PlatformCall::SetLocked {
            thread: thread.clone(),
            locked,
        });
        take_fault(&mut state.thread_faults, &(thread.clone(), ThreadOp::lock(locked)))?;

        let info = state
            .find_mut(thread)
            .filter(|info| info.kind.is_thread())
            .ok_or_else(|| PlatformError::NotFound(thread.to_string()))?;
        if info.archived {
            return Err(PlatformError::ThreadArchived(thread.to_string()));
        }
        info.locked = locked;
        Ok(())
    }

    async fn check_access(&self, channel: &ChannelId) -> Result<AccessCheck, PlatformError> {
        let mut state = self.state();
        state.calls.push(PlatformCall::CheckAccess(channel.clone()));
        if state.find(channel).is_none() {
            return Err(PlatformError::NotFound(channel.to_string()));
        }
        Ok(match state.denied.get(channel) {
            Some(missing) => AccessCheck::denied(missing.clone()),
            None => AccessCheck::granted(),
        })
    }
}

/// Convenience for building numbered test histories: `prefix-0 .. prefix-(n-1)`.
pub fn numbered_messages(
    channel: &ChannelId,
    prefix: &str,
    count: usize,
    content: impl Fn(usize) -> String,
) -> Vec<Message> {
    (0..count)
        .map(|i| Message::new(format!("{prefix}-{i}"), channel.clone(), content(i)))
        .collect()
}
