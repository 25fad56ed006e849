//! Sweeper Scan Engine
//!
//! This crate provides the bulk content-moderation scan engine: rate limiting,
//! content matching, the per-workspace task registry, target enumeration, and
//! the scan orchestrator with locked-thread handling. Live moderation,
//! startup recovery and metrics sit alongside it.

pub mod config;
pub mod deletion;
pub mod enumerator;
pub mod journal;
pub mod limiter;
pub mod live;
pub mod matcher;
pub mod metrics;
pub mod orchestrator;
pub mod platform;
pub mod progress;
pub mod recovery;
pub mod registry;
pub mod store;

pub use config::{Config, ProgressConfig, ScanConfig};
pub use deletion::{DeleteOutcome, DeletionError, MessageDeleter};
pub use enumerator::{EnumerationError, TargetEnumerator};
pub use journal::{FileJournal, JournalError, MemoryJournal, PendingRestore, RestoreJournal};
pub use limiter::{RateLimitConfig, RateLimiter, RateLimiterPool};
pub use live::{IgnoreReason, LiveError, LiveModerator, LiveOutcome};
pub use matcher::ContentMatcher;
pub use metrics::collect_metrics;
pub use orchestrator::{ScanError, ScanOrchestrator};
pub use platform::{AccessCheck, FailureClass, Platform, PlatformError};
pub use progress::{ChannelSink, ProgressCounters, ProgressReporter, ProgressSink, TracingSink};
pub use recovery::{reconcile_pending_restores, RecoveryReport};
pub use registry::{ActiveTaskSummary, RegistryError, RegistryStats, ScanOptions, TaskRegistry};
pub use store::{
    JsonFileStore, MemoryStore, ModerationSettings, SettingsStore, StoreError, TaskStore,
};
