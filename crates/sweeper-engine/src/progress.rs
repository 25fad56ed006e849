//! Progress reporting.
//!
//! [`ProgressReporter`] accumulates run counters and publishes
//! [`ProgressUpdate`]s to a [`ProgressSink`]. Routine updates are throttled to
//! one per `min_interval`; a background ticker forces a heartbeat every
//! `refresh_interval` while the run is live. Final and error events bypass the
//! throttle.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, trace, warn};

use sweeper_core::{
    FinalStats, ProgressEventKind, ProgressSnapshot, ProgressUpdate, ScanTarget, TaskId,
};

use crate::config::ProgressConfig;

/// Receives externally visible progress updates.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, update: ProgressUpdate);
}

/// Sink that forwards updates over an unbounded channel.
///
/// # Example
///
/// ```rust,no_run
/// use sweeper_engine::ChannelSink;
///
/// let (sink, mut rx) = ChannelSink::new();
///
/// tokio::spawn(async move {
///     while let Some(update) = rx.recv().await {
///         println!("{}%", update.snapshot.percent_complete());
///     }
/// });
/// ```
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn publish(&self, update: ProgressUpdate) {
        // Receiver may be gone; progress is best effort.
        self.tx.send(update).ok();
    }
}

/// Sink that logs every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn publish(&self, update: ProgressUpdate) {
        let s = &update.snapshot;
        match update.kind {
            ProgressEventKind::Failed => warn!(
                task_id = %update.task_id,
                error = update.error.as_deref().unwrap_or("unknown"),
                "Scan failed"
            ),
            kind => info!(
                task_id = %update.task_id,
                kind = ?kind,
                percent = s.percent_complete(),
                targets_completed = s.targets_completed,
                targets_total = s.targets_total,
                scanned = s.messages_scanned,
                deleted = s.messages_deleted,
                unlocks = s.unlock_operations,
                current = s.current_target.as_deref().unwrap_or("-"),
                "Scan progress"
            ),
        }
    }
}

/// Cumulative run counters after a target finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressCounters {
    pub targets_completed: u64,
    pub messages_scanned: u64,
    pub messages_deleted: u64,
    pub unlock_operations: u64,
}

struct ReporterState {
    snapshot: ProgressSnapshot,
    started: Instant,
    last_emit: Option<Instant>,
    ticker: Option<JoinHandle<()>>,
    finished: bool,
}

struct Shared {
    task_id: TaskId,
    sink: Arc<dyn ProgressSink>,
    config: ProgressConfig,
    state: Mutex<ReporterState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ReporterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Build an update if the throttle (or `force`) allows it.
    fn prepare(
        &self,
        state: &mut ReporterState,
        kind: ProgressEventKind,
        force: bool,
    ) -> Option<ProgressUpdate> {
        if state.finished {
            return None;
        }
        let now = Instant::now();
        let due = state
            .last_emit
            .map_or(true, |last| now.duration_since(last) >= self.config.min_interval);
        if !force && !due {
            trace!(task_id = %self.task_id, "Progress update throttled");
            return None;
        }

        state.last_emit = Some(now);
        state.snapshot.elapsed_ms = now.duration_since(state.started).as_millis() as u64;
        Some(ProgressUpdate::new(
            self.task_id.clone(),
            kind,
            state.snapshot.clone(),
        ))
    }

    fn emit(&self, kind: ProgressEventKind, force: bool, f: impl FnOnce(&mut ProgressSnapshot)) {
        let update = {
            let mut state = self.lock();
            if state.finished {
                return;
            }
            f(&mut state.snapshot);
            self.prepare(&mut state, kind, force)
        };
        if let Some(update) = update {
            self.sink.publish(update);
        }
    }

    /// Returns false once the run is over.
    fn heartbeat(&self) -> bool {
        let update = {
            let mut state = self.lock();
            if state.finished {
                return false;
            }
            self.prepare(&mut state, ProgressEventKind::Heartbeat, true)
        };
        if let Some(update) = update {
            self.sink.publish(update);
        }
        true
    }

    /// Mark the run finished and build the terminal update.
    fn finish(&self, build: impl FnOnce(&mut ProgressSnapshot) -> ProgressUpdate) {
        let update = {
            let mut state = self.lock();
            if state.finished {
                return;
            }
            state.finished = true;
            if let Some(ticker) = state.ticker.take() {
                ticker.abort();
            }
            state.snapshot.elapsed_ms = state.started.elapsed().as_millis() as u64;
            build(&mut state.snapshot)
        };
        self.sink.publish(update);
    }
}

/// Throttled progress reporter for one task.
#[derive(Clone)]
pub struct ProgressReporter {
    shared: Arc<Shared>,
}

impl ProgressReporter {
    pub fn new(task_id: TaskId, sink: Arc<dyn ProgressSink>, config: ProgressConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                task_id,
                sink,
                config,
                state: Mutex::new(ReporterState {
                    snapshot: ProgressSnapshot::default(),
                    started: Instant::now(),
                    last_emit: None,
                    ticker: None,
                    finished: false,
                }),
            }),
        }
    }

    /// Current counters.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.shared.lock();
        let mut snapshot = state.snapshot.clone();
        if !state.finished {
            snapshot.elapsed_ms = state.started.elapsed().as_millis() as u64;
        }
        snapshot
    }

    /// Target count is known: publish `Started` and begin heartbeats.
    pub fn on_totals_known(&self, total: u64) {
        self.shared.emit(ProgressEventKind::Started, true, |s| {
            s.targets_total = total;
        });
        self.start_ticker();
    }

    pub fn on_target_started(&self, target: &ScanTarget) {
        let name = target.qualified_name();
        self.shared
            .emit(ProgressEventKind::TargetStarted, false, |s| {
                s.current_target = Some(name);
            });
    }

    pub fn on_batch_scanned(&self, count: u64) {
        self.shared.emit(ProgressEventKind::Progress, false, |s| {
            s.messages_scanned += count;
        });
    }

    pub fn on_target_completed(&self, counters: ProgressCounters) {
        self.shared.emit(ProgressEventKind::Progress, false, |s| {
            s.targets_completed = counters.targets_completed;
            s.messages_scanned = counters.messages_scanned;
            s.messages_deleted = counters.messages_deleted;
            s.unlock_operations = counters.unlock_operations;
            s.current_target = None;
        });
    }

    /// Publish the final stats immediately.
    pub fn on_finished(&self, stats: &FinalStats) {
        let task_id = self.shared.task_id.clone();
        self.shared.finish(|s| {
            s.targets_total = stats.targets_total;
            s.targets_completed = stats.targets_scanned;
            s.messages_scanned = stats.messages_scanned;
            s.messages_deleted = stats.messages_deleted;
            s.unlock_operations = stats.unlock_operations;
            s.current_target = None;
            ProgressUpdate::finished(task_id, s.clone(), stats.clone())
        });
    }

    /// Publish a run-fatal error immediately.
    pub fn on_error(&self, error: &str) {
        let task_id = self.shared.task_id.clone();
        self.shared
            .finish(|s| ProgressUpdate::failed(task_id, s.clone(), error));
    }

    fn start_ticker(&self) {
        let period = self.shared.config.refresh_interval;
        if period.is_zero() {
            return;
        }

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else { break };
                if !shared.heartbeat() {
                    break;
                }
            }
        });

        let mut state = self.shared.lock();
        if state.finished {
            handle.abort();
        } else if let Some(old) = state.ticker.replace(handle) {
            old.abort();
        }
    }
}
