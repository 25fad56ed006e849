//! Sweeper Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - The chat platform's API
//! - Persistence
//! - Runtime specifics
//!
//! Everything the scan engine passes between its components is defined here.

pub mod error;
pub mod ids;
pub mod message;
pub mod progress;
pub mod status;
pub mod target;
pub mod task;

// Re-export commonly used types
pub use error::CoreError;
pub use ids::{ChannelId, MessageId, TaskId, UserId, WorkspaceId};
pub use message::{MatchResult, Message, MessagePage};
pub use progress::{ProgressEventKind, ProgressSnapshot, ProgressUpdate};
pub use status::{StopReason, TaskKind, TaskStatus};
pub use target::{ChannelInfo, ChannelKind, ScanTarget, TargetKind};
pub use task::{CurrentTarget, FinalStats, ProgressPatch, RestoreFailure, Task, TaskProgress};
