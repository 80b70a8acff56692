//! Backfill scheduling: rebuilds archive segments from replayed history.

pub mod config;
pub mod pending;
pub mod provider;
pub mod schedule;
pub mod scheduler;
pub mod task;

pub use config::{BackFillerConfig, ScheduleConfig};
pub use pending::{coalesce, PendingSegments, StreamUpdateMonitor};
pub use provider::{
    LocalStreamRegistry, Replay, ReplayProvider, ReplayRequest, StreamKind, StreamRegistry,
    StreamSubscriber, SubscriptionId,
};
pub use schedule::{FillRequest, Schedule};
pub use scheduler::{BackFiller, BackFillerDeps, BackFillerStats, FillTaskHandle, SchedulerState};
pub use task::{FillContext, FillReport, FillTask, TaskOrigin, TaskStatus};
