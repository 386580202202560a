//! GraphTTL Core - Tiered Expiration Scheduler
//!
//! Revisits every graph entity that carries a time-to-live at, or shortly
//! after, its deadline without blocking the entity's normal traffic:
//! - Tiers: long, medium and short partitioned maps migrated toward
//!   execution as deadlines approach
//! - Monitor: periodic task driving migrations, input draining and executor
//!   hand-off
//! - Executor: on-demand task expiring entities in capped batches
//! - Processor: owning aggregate with a reentrant acquisition lock
//! - Store: capability traits the storage layer implements

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod backlog;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod executor;
mod monitor;
pub mod processor;
pub mod queue;
pub mod reentrant;
mod schedule;
pub mod store;
pub mod tier;
pub mod trigger;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{FlushOutcome, ToggleOutcome};
pub use backlog::BacklogInfo;
pub use config::{ExecutorConfig, MonitorConfig, SchedulerConfig, TierConfig};
pub use context::ExecContext;
pub use error::{AccessReason, EventError, FailureClass, Result};
pub use event::{
    millis_to_timestamp, EntityHandle, Event, EventKind, EventValue, Timestamp, TIMESTAMP_MIN,
    TIMESTAMP_NEVER,
};
pub use executor::ExecutorStats;
pub use processor::{EventProcessor, ProcessorGuard, ProcessorState};
pub use queue::{DueHeap, InputQueue};
pub use reentrant::{Reentrant, ReentrantGuard};
pub use store::{ComponentExpiry, Entity, EntityStore, Expiration, WriteGuard};
pub use tier::{ScheduleTier, TierKind};
pub use trigger::{ActionTrigger, MonitorAction};
