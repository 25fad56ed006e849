//! Scan orchestrator.
//!
//! Drives one task from enumeration to its terminal state: loads the banned
//! rules, builds the target list, then scans targets strictly one after
//! another. Each target's history is paged backwards, matched, and violating
//! messages are deleted. Failures are isolated to the smallest scope that
//! makes sense; only the pre-flight checks end a run early.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sweeper_core::{
    FinalStats, MessageId, ProgressPatch, RestoreFailure, ScanTarget, StopReason, Task, TaskKind,
    WorkspaceId,
};

use crate::config::{ProgressConfig, ScanConfig};
use crate::deletion::MessageDeleter;
use crate::enumerator::{EnumerationError, TargetEnumerator};
use crate::journal::RestoreJournal;
use crate::limiter::RateLimiter;
use crate::matcher::ContentMatcher;
use crate::platform::Platform;
use crate::progress::{ProgressCounters, ProgressReporter, ProgressSink, TracingSink};
use crate::registry::{RegistryError, TaskRegistry};
use crate::store::{SettingsStore, StoreError};

/// Run-level errors.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("A scan is already running for workspace {0}")]
    AlreadyRunning(WorkspaceId),

    #[error("Task belongs to workspace {task}, orchestrator serves {orchestrator}")]
    WorkspaceMismatch {
        task: WorkspaceId,
        orchestrator: WorkspaceId,
    },

    #[error("No banned rules configured for workspace {0}")]
    NoRulesConfigured(WorkspaceId),

    #[error("No scannable targets in workspace {0}")]
    NoScannableTargets(WorkspaceId),

    #[error("Target enumeration failed: {0}")]
    Enumeration(#[from] EnumerationError),

    #[error("Failed to load settings: {0}")]
    Store(#[from] StoreError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// How a single target's scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetOutcome {
    Completed,
    /// Access check failed; nothing was fetched.
    Skipped,
    /// A failure ended this target's loop early.
    Aborted,
    Cancelled,
}

#[derive(Debug, Default)]
struct RunCounters {
    targets_completed: u64,
    messages_scanned: u64,
    messages_deleted: u64,
    unlock_operations: u64,
    restore_failures: Vec<RestoreFailure>,
}

impl RunCounters {
    fn progress(&self) -> ProgressCounters {
        ProgressCounters {
            targets_completed: self.targets_completed,
            messages_scanned: self.messages_scanned,
            messages_deleted: self.messages_deleted,
            unlock_operations: self.unlock_operations,
        }
    }

    fn patch(&self) -> ProgressPatch {
        ProgressPatch::counters(
            self.targets_completed,
            self.messages_scanned,
            self.messages_deleted,
            self.unlock_operations,
        )
    }
}

/// Clears the running flag when a run ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Per-workspace scan driver.
pub struct ScanOrchestrator {
    workspace: WorkspaceId,
    platform: Arc<dyn Platform>,
    limiter: Arc<RateLimiter>,
    settings: Arc<dyn SettingsStore>,
    registry: Arc<TaskRegistry>,
    journal: Arc<dyn RestoreJournal>,
    sink: Arc<dyn ProgressSink>,
    matcher: ContentMatcher,
    scan_config: ScanConfig,
    progress_config: ProgressConfig,
    running: AtomicBool,
    cancel: Mutex<CancellationToken>,
}

impl ScanOrchestrator {
    pub fn new(
        workspace: WorkspaceId,
        platform: Arc<dyn Platform>,
        limiter: Arc<RateLimiter>,
        settings: Arc<dyn SettingsStore>,
        registry: Arc<TaskRegistry>,
        journal: Arc<dyn RestoreJournal>,
    ) -> Self {
        Self {
            workspace,
            platform,
            limiter,
            settings,
            registry,
            journal,
            sink: Arc::new(TracingSink),
            matcher: ContentMatcher::new(),
            scan_config: ScanConfig::default(),
            progress_config: ProgressConfig::default(),
            running: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Builder method to publish progress to a custom sink.
    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_scan_config(mut self, config: ScanConfig) -> Self {
        self.scan_config = config;
        self
    }

    pub fn with_progress_config(mut self, config: ProgressConfig) -> Self {
        self.progress_config = config;
        self
    }

    pub fn workspace(&self) -> &WorkspaceId {
        &self.workspace
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Request a cooperative stop. No new page, message or target starts
    /// afterwards; a delete sequence already in flight completes.
    pub fn stop(&self) {
        // Same lock as the token swap in `start`, so a running run is always
        // holding the token cancelled here.
        let cancel = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.is_running() {
            return;
        }
        info!(workspace_id = %self.workspace, "Scan stop requested");
        cancel.cancel();
    }

    /// Run a task to completion and hand it to the registry's terminal state.
    pub async fn start(&self, task: &Task) -> Result<FinalStats, ScanError> {
        if task.workspace_id != self.workspace {
            return Err(ScanError::WorkspaceMismatch {
                task: task.workspace_id.clone(),
                orchestrator: self.workspace.clone(),
            });
        }
        let token = {
            let mut cancel = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
            if self.running.swap(true, Ordering::SeqCst) {
                return Err(ScanError::AlreadyRunning(self.workspace.clone()));
            }
            let token = CancellationToken::new();
            *cancel = token.clone();
            token
        };
        let _guard = RunningGuard(&self.running);

        let reporter = ProgressReporter::new(
            task.id.clone(),
            self.sink.clone(),
            self.progress_config.clone(),
        );
        info!(
            workspace_id = %self.workspace,
            task_id = %task.id,
            kind = %task.kind,
            "Scan started"
        );

        match self.run(task, &reporter, &token).await {
            Ok(stats) => {
                let handoff = if stats.completed_normally {
                    self.registry
                        .complete(&self.workspace, &task.id, stats.clone())
                        .await
                } else {
                    self.registry
                        .stop(&self.workspace, &task.id, StopReason::UserRequested)
                        .await
                };
                if let Err(err) = handoff {
                    error!(task_id = %task.id, error = %err, "Failed to record scan result");
                }

                info!(
                    workspace_id = %self.workspace,
                    task_id = %task.id,
                    scanned = stats.messages_scanned,
                    deleted = stats.messages_deleted,
                    unlocks = stats.unlock_operations,
                    completed_normally = stats.completed_normally,
                    restore_failures = stats.restore_failures.len(),
                    "Scan finished"
                );
                reporter.on_finished(&stats);
                Ok(stats)
            }
            Err(err) => {
                warn!(workspace_id = %self.workspace, task_id = %task.id, error = %err, "Scan failed");
                if let Err(stop_err) = self
                    .registry
                    .stop(&self.workspace, &task.id, StopReason::Error(err.to_string()))
                    .await
                {
                    error!(task_id = %task.id, error = %stop_err, "Failed to record scan failure");
                }
                reporter.on_error(&err.to_string());
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        task: &Task,
        reporter: &ProgressReporter,
        token: &CancellationToken,
    ) -> Result<FinalStats, ScanError> {
        let rules: Vec<String> = self
            .settings
            .banned_rules(&self.workspace)
            .await?
            .into_iter()
            .filter(|r| !r.trim().is_empty())
            .collect();
        if rules.is_empty() {
            return Err(ScanError::NoRulesConfigured(self.workspace.clone()));
        }

        let enumerator = TargetEnumerator::new(
            self.platform.clone(),
            self.settings.clone(),
            self.limiter.clone(),
        );
        let targets = match task.kind {
            TaskKind::FullScan => enumerator.enumerate(&self.workspace).await?,
            TaskKind::SelectedTargets => {
                enumerator
                    .resolve_selected(&self.workspace, &task.selected_targets)
                    .await?
            }
        };
        if targets.is_empty() {
            return Err(ScanError::NoScannableTargets(self.workspace.clone()));
        }

        let total = targets.len() as u64;
        self.record_progress(task, &ProgressPatch::total_targets(total))
            .await;
        reporter.on_totals_known(total);

        let deleter = MessageDeleter::new(
            self.workspace.clone(),
            self.platform.clone(),
            self.limiter.clone(),
            self.journal.clone(),
            self.scan_config.state_settle_delay,
        );

        let mut counters = RunCounters::default();
        let mut cancelled = false;

        for target in &targets {
            if token.is_cancelled() {
                cancelled = true;
                break;
            }

            let outcome = self
                .scan_target(task, target, &deleter, &rules, reporter, token, &mut counters)
                .await;
            if outcome == TargetOutcome::Cancelled {
                cancelled = true;
                self.record_progress(task, &counters.patch()).await;
                break;
            }

            counters.targets_completed += 1;
            debug!(target = %target, outcome = ?outcome, "Target done");
            self.record_progress(task, &counters.patch()).await;
            reporter.on_target_completed(counters.progress());
        }

        if cancelled {
            info!(
                workspace_id = %self.workspace,
                completed = counters.targets_completed,
                total,
                "Scan stopped before all targets were processed"
            );
        }

        Ok(FinalStats {
            kind: task.kind,
            targets_total: total,
            targets_scanned: counters.targets_completed,
            messages_scanned: counters.messages_scanned,
            messages_deleted: counters.messages_deleted,
            unlock_operations: counters.unlock_operations,
            completed_normally: !cancelled,
            selected_count: match task.kind {
                TaskKind::SelectedTargets => Some(task.selected_targets.len()),
                TaskKind::FullScan => None,
            },
            restore_failures: counters.restore_failures,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn scan_target(
        &self,
        task: &Task,
        target: &ScanTarget,
        deleter: &MessageDeleter,
        rules: &[String],
        reporter: &ProgressReporter,
        token: &CancellationToken,
        counters: &mut RunCounters,
    ) -> TargetOutcome {
        match self
            .limiter
            .execute(|| self.platform.check_access(&target.id))
            .await
        {
            Ok(check) if !check.can_access => {
                warn!(target = %target, missing = ?check.missing, "Insufficient access, skipping target");
                return TargetOutcome::Skipped;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(target = %target, error = %err, "Access check failed, skipping target");
                return TargetOutcome::Skipped;
            }
        }

        self.record_progress(task, &ProgressPatch::current_target(target))
            .await;
        reporter.on_target_started(target);
        info!(target = %target, locked = target.is_locked, "Scanning target");

        let page_size = self.scan_config.effective_page_size();
        let mut cursor: Option<MessageId> = None;

        loop {
            if token.is_cancelled() {
                return TargetOutcome::Cancelled;
            }

            let fetch = self.limiter.execute(|| {
                self.platform
                    .fetch_messages(&target.id, cursor.as_ref(), page_size)
            });
            let page = tokio::select! {
                biased;
                _ = token.cancelled() => return TargetOutcome::Cancelled,
                page = fetch => page,
            };
            let page = match page {
                Ok(page) => page,
                Err(err) => {
                    warn!(target = %target, error = %err, class = ?err.class(), "Page fetch failed, aborting target");
                    return TargetOutcome::Aborted;
                }
            };
            if page.is_empty() {
                break;
            }
            debug!(target = %target, messages = page.messages.len(), has_more = page.has_more, "Fetched page");

            let mut scanned_in_page = 0u64;
            for message in &page.messages {
                if token.is_cancelled() {
                    reporter.on_batch_scanned(scanned_in_page);
                    return TargetOutcome::Cancelled;
                }
                scanned_in_page += 1;
                counters.messages_scanned += 1;

                let verdict = self.matcher.check_message(message, rules);
                if !verdict.should_delete {
                    continue;
                }
                debug!(target = %target, message_id = %message.id, rules = ?verdict.matched_rules, "Message matched");

                match deleter.delete(target, &message.id).await {
                    Ok(outcome) => {
                        counters.messages_deleted += 1;
                        if outcome.state_changed {
                            counters.unlock_operations += 1;
                        }
                        counters.restore_failures.extend(outcome.restore_failure);
                    }
                    Err(failure) => {
                        counters.restore_failures.extend(failure.restore_failure);
                        if failure.error.aborts_target() {
                            warn!(target = %target, message_id = %message.id, error = %failure.error, "Delete failed, aborting target");
                            reporter.on_batch_scanned(scanned_in_page);
                            return TargetOutcome::Aborted;
                        }
                        warn!(target = %target, message_id = %message.id, error = %failure.error, "Delete failed, skipping message");
                    }
                }
            }
            reporter.on_batch_scanned(scanned_in_page);

            if !page.has_more {
                break;
            }
            cursor = page.oldest_id().cloned();

            tokio::select! {
                biased;
                _ = token.cancelled() => return TargetOutcome::Cancelled,
                _ = tokio::time::sleep(self.scan_config.page_delay) => {}
            }
        }

        TargetOutcome::Completed
    }

    /// Progress writes are best effort; a failed write never stops the scan.
    async fn record_progress(&self, task: &Task, patch: &ProgressPatch) {
        if let Err(err) = self
            .registry
            .update_progress(&self.workspace, &task.id, patch)
            .await
        {
            warn!(task_id = %task.id, error = %err, "Failed to persist progress");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use sweeper_core::{
        ChannelId, ChannelInfo, ChannelKind, Message, ProgressEventKind, ProgressUpdate,
        TaskStatus,
    };
    use tokio::sync::mpsc;

    use crate::journal::MemoryJournal;
    use crate::limiter::RateLimitConfig;
    use crate::platform::memory::{numbered_messages, MemoryPlatform, PlatformCall};
    use crate::platform::PlatformError;
    use crate::progress::ChannelSink;
    use crate::registry::ScanOptions;
    use crate::store::{MemoryStore, TaskStore};

    struct Fixture {
        ws: WorkspaceId,
        platform: Arc<MemoryPlatform>,
        store: Arc<MemoryStore>,
        registry: Arc<TaskRegistry>,
        orchestrator: Arc<ScanOrchestrator>,
        updates: mpsc::UnboundedReceiver<ProgressUpdate>,
    }

    impl Fixture {
        async fn new(rules: &[&str]) -> Self {
            let ws = WorkspaceId::new("g1");
            let platform = Arc::new(MemoryPlatform::new("g1"));
            let store = Arc::new(MemoryStore::new());
            store.set_rules(&ws, rules).await;
            let registry = Arc::new(TaskRegistry::new(store.clone()));
            let (sink, updates) = ChannelSink::new();

            let orchestrator = ScanOrchestrator::new(
                ws.clone(),
                platform.clone(),
                Arc::new(RateLimiter::default()),
                store.clone(),
                registry.clone(),
                Arc::new(MemoryJournal::new()),
            )
            .with_sink(Arc::new(sink));

            Self {
                ws,
                platform,
                store,
                registry,
                orchestrator: Arc::new(orchestrator),
                updates,
            }
        }

        fn text_channel(&self, id: &str, messages: Vec<Message>) -> ChannelId {
            let channel = ChannelId::new(id);
            self.platform
                .add_channel(ChannelInfo::new(id, id, ChannelKind::Text));
            self.platform.add_messages(&channel, messages);
            channel
        }

        async fn start_full(&self) -> Task {
            self.registry
                .start_full_scan(&self.ws, ScanOptions::default())
                .await
                .unwrap()
        }

        fn drain(&mut self) -> Vec<ProgressUpdate> {
            let mut out = Vec::new();
            while let Ok(update) = self.updates.try_recv() {
                out.push(update);
            }
            out
        }
    }

    fn history(channel: &str, count: usize, violating: &[usize]) -> Vec<Message> {
        let violating = violating.to_vec();
        numbered_messages(&ChannelId::new(channel), channel, count, move |i| {
            match violating.iter().position(|v| *v == i) {
                Some(0) => "buy SPAM now".to_string(),
                Some(1) => "Spam Spam".to_string(),
                Some(_) => "this is spam".to_string(),
                None => format!("hello {i}"),
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_deletes_only_violations() {
        let mut f = Fixture::new(&["spam"]).await;
        let channel = f.text_channel("c1", history("c1", 250, &[10, 120, 240]));
        let task = f.start_full().await;

        let stats = f.orchestrator.start(&task).await.unwrap();

        assert_eq!(stats.messages_scanned, 250);
        assert_eq!(stats.messages_deleted, 3);
        assert_eq!(stats.targets_total, 1);
        assert_eq!(stats.targets_scanned, 1);
        assert!(stats.completed_normally);
        assert_eq!(f.platform.fetch_count(&channel), 3);
        assert_eq!(f.platform.message_ids(&channel).len(), 247);

        assert!(!f.orchestrator.is_running());
        assert!(!f.registry.is_paused(&f.ws).await);
        let stored = f.store.get(&f.ws, &task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(stored.progress.deleted_messages, 3);

        let updates = f.drain();
        assert_eq!(updates.first().map(|u| u.kind), Some(ProgressEventKind::Started));
        assert_eq!(updates.last().map(|u| u.kind), Some(ProgressEventKind::Finished));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pagination_fetch_counts() {
        let f = Fixture::new(&["spam"]).await;
        let empty = f.text_channel("c0", Vec::new());
        let exact = f.text_channel("c1", history("c1", 100, &[]));
        let two = f.text_channel("c2", history("c2", 200, &[]));
        let task = f.start_full().await;

        let stats = f.orchestrator.start(&task).await.unwrap();

        assert_eq!(stats.messages_scanned, 300);
        assert_eq!(f.platform.fetch_count(&empty), 1);
        assert_eq!(f.platform.fetch_count(&exact), 1);
        assert_eq!(f.platform.fetch_count(&two), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_archived_forum_thread_is_restored() {
        let f = Fixture::new(&["spam"]).await;
        f.platform
            .add_channel(ChannelInfo::new("f1", "showcase", ChannelKind::Forum));
        let thread = ChannelId::new("t1");
        f.platform.add_forum_thread(
            ChannelInfo::new("t1", "old-post", ChannelKind::PublicThread)
                .with_parent("f1")
                .with_flags(false, true),
        );
        f.platform.add_messages(
            &thread,
            vec![Message::new("m1", "t1", "nice"), Message::new("m2", "t1", "spam link")],
        );
        let task = f.start_full().await;

        let stats = f.orchestrator.start(&task).await.unwrap();

        assert_eq!(stats.messages_deleted, 1);
        assert_eq!(stats.unlock_operations, 1);
        assert!(stats.restore_failures.is_empty());
        assert!(f.platform.channel(&thread).unwrap().archived);
        assert_eq!(f.platform.message_ids(&thread), vec![MessageId::new("m1")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_rules_is_fatal() {
        let mut f = Fixture::new(&[]).await;
        f.text_channel("c1", history("c1", 5, &[]));
        let task = f.start_full().await;

        let err = f.orchestrator.start(&task).await.unwrap_err();
        assert!(matches!(err, ScanError::NoRulesConfigured(_)));

        assert!(!f.registry.is_paused(&f.ws).await);
        let stored = f.store.get(&f.ws, &task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Stopped);
        assert!(matches!(stored.stop_reason, Some(StopReason::Error(_))));
        assert!(f.platform.calls().is_empty());

        let updates = f.drain();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].kind, ProgressEventKind::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_workspace_is_fatal() {
        let f = Fixture::new(&["spam"]).await;
        f.platform
            .add_channel(ChannelInfo::new("cat", "Info", ChannelKind::Category));
        let task = f.start_full().await;

        let err = f.orchestrator.start(&task).await.unwrap_err();
        assert!(matches!(err, ScanError::NoScannableTargets(_)));
        assert!(f.registry.get_active(&f.ws).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_new_pages_and_targets() {
        let f = Fixture::new(&["spam"]).await;
        let first = f.text_channel("c1", history("c1", 1_000, &[]));
        let second = f.text_channel("c2", history("c2", 50, &[]));
        let task = f.start_full().await;

        let orchestrator = f.orchestrator.clone();
        let run_task = task.clone();
        let handle = tokio::spawn(async move { orchestrator.start(&run_task).await });

        tokio::time::sleep(Duration::from_millis(450)).await;
        assert!(f.orchestrator.is_running());
        f.orchestrator.stop();

        let stats = handle.await.unwrap().unwrap();
        assert!(!stats.completed_normally);
        assert_eq!(stats.targets_scanned, 0);
        assert!(f.platform.fetch_count(&first) < 10);
        assert_eq!(f.platform.fetch_count(&second), 0);

        let stored = f.store.get(&f.ws, &task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Stopped);
        assert_eq!(stored.stop_reason, Some(StopReason::UserRequested));
        assert!(!f.registry.is_paused(&f.ws).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_while_running_is_rejected() {
        let f = Fixture::new(&["spam"]).await;
        f.text_channel("c1", history("c1", 500, &[]));
        let task = f.start_full().await;

        let orchestrator = f.orchestrator.clone();
        let run_task = task.clone();
        let handle = tokio::spawn(async move { orchestrator.start(&run_task).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = f.orchestrator.start(&task).await.unwrap_err();
        assert!(matches!(err, ScanError::AlreadyRunning(_)));
        assert!(f.registry.is_paused(&f.ws).await);

        assert!(handle.await.unwrap().unwrap().completed_normally);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_isolated_per_target() {
        let f = Fixture::new(&["spam"]).await;
        let broken = f.text_channel("c1", history("c1", 10, &[1]));
        let guarded = f.text_channel("c2", history("c2", 10, &[2, 5]));
        let flaky = f.text_channel("c3", history("c3", 10, &[3, 7]));
        let hidden = f.text_channel("c4", history("c4", 10, &[0]));
        let healthy = f.text_channel("c5", history("c5", 10, &[4]));

        f.platform
            .fail_fetch(&broken, PlatformError::Request("502".into()), None);
        // Newest first: c2-5 is reached before c2-2.
        f.platform.fail_delete(
            &MessageId::new("c2-5"),
            PlatformError::MissingPermissions("ManageMessages".into()),
            None,
        );
        f.platform.fail_delete(
            &MessageId::new("c3-7"),
            PlatformError::NotFound("c3-7".into()),
            None,
        );
        f.platform.deny_access(&hidden, vec!["ReadMessageHistory".into()]);
        let task = f.start_full().await;

        let stats = f.orchestrator.start(&task).await.unwrap();

        assert!(stats.completed_normally);
        assert_eq!(stats.targets_scanned, 5);
        assert_eq!(f.platform.message_ids(&guarded).len(), 10);
        assert_eq!(f.platform.message_ids(&flaky).len(), 9);
        assert_eq!(f.platform.fetch_count(&hidden), 0);
        assert_eq!(f.platform.message_ids(&healthy).len(), 9);
        // c3-3 and c5-4.
        assert_eq!(stats.messages_deleted, 2);
        // c1 contributes nothing; c2 stops after its first violation.
        assert_eq!(stats.messages_scanned, 5 + 10 + 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_selected_targets_scan() {
        let f = Fixture::new(&["spam"]).await;
        let skipped = f.text_channel("c1", history("c1", 10, &[1]));
        let chosen = f.text_channel("c2", history("c2", 10, &[1]));

        let selection = vec![ChannelId::parse_reference("<#c2>").unwrap()];
        let task = f
            .registry
            .start_selected_targets_scan(&f.ws, selection, ScanOptions::default())
            .await
            .unwrap();

        let stats = f.orchestrator.start(&task).await.unwrap();

        assert_eq!(stats.kind, TaskKind::SelectedTargets);
        assert_eq!(stats.selected_count, Some(1));
        assert_eq!(stats.messages_deleted, 1);
        assert_eq!(f.platform.fetch_count(&skipped), 0);
        assert_eq!(f.platform.fetch_count(&chosen), 1);
        assert!(!f
            .platform
            .calls()
            .iter()
            .any(|c| matches!(c, PlatformCall::ListChannels)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stop_right_after_start_always_cancels() {
        let ws = WorkspaceId::new("g1");
        let platform = Arc::new(MemoryPlatform::new("g1"));
        platform.add_channel(ChannelInfo::new("c1", "c1", ChannelKind::Text));
        platform.add_messages(&ChannelId::new("c1"), history("c1", 500, &[]));
        let store = Arc::new(MemoryStore::new());
        store.set_rules(&ws, &["spam"]).await;
        let registry = Arc::new(TaskRegistry::new(store.clone()));
        let limiter = RateLimiter::new(RateLimitConfig {
            max_per_window: 1_000,
            window: Duration::from_secs(1),
            min_gap: Duration::ZERO,
        });
        let orchestrator = Arc::new(
            ScanOrchestrator::new(
                ws.clone(),
                platform,
                Arc::new(limiter),
                store,
                registry.clone(),
                Arc::new(MemoryJournal::new()),
            )
            .with_scan_config(ScanConfig {
                page_size: 100,
                page_delay: Duration::from_millis(20),
                state_settle_delay: Duration::ZERO,
            }),
        );

        for _ in 0..20 {
            let task = registry
                .start_full_scan(&ws, ScanOptions::default())
                .await
                .unwrap();
            let runner = orchestrator.clone();
            let handle = tokio::spawn(async move { runner.start(&task).await });
            while !orchestrator.is_running() {
                tokio::task::yield_now().await;
            }
            orchestrator.stop();

            let stats = handle.await.unwrap().unwrap();
            assert!(!stats.completed_normally);
        }
    }
}
