//! Scheduler configuration
//!
//! Production defaults derive from per-stage arrival deadlines: an event must
//! reach the executor within 2s of its deadline, the short tier within 28s,
//! the medium tier within 452s and the long tier within 7228s. Each
//! migration cycle runs at 90% of the arrival deadline of the stage it feeds.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{EventError, Result};

const COMPLETION_THRESHOLD_MS: u64 = 2_000;
const EXECUTOR_INSERTION_MS: u64 = 30_000;
const SHORT_INSERTION_MS: u64 = 480_000;
const MEDIUM_INSERTION_MS: u64 = 7_680_000;

const SHORT_ARRIVAL_SECS: u64 = 28;
const LONG_ARRIVAL_SECS: u64 = 7_228;
const MEDIUM_CYCLE_MS: u64 = 40_000;

const MAX_MAP_ORDER: u8 = 16;

fn cycle_for_arrival(arrival_secs: u64) -> u64 {
    arrival_secs * 900
}

/// Migration parameters for one schedule tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    /// How close (ms) a deadline must be for an event to enter this tier.
    /// `None` means unbounded.
    pub insertion_threshold_ms: Option<u64>,
    /// Wall-clock time (ms) to migrate every partition once
    pub migration_cycle_ms: u64,
    /// Tier holds `2^map_order` partitions
    pub map_order: u8,
}

impl TierConfig {
    /// Create tier parameters
    #[must_use]
    pub fn new(insertion_threshold_ms: Option<u64>, migration_cycle_ms: u64, map_order: u8) -> Self {
        Self {
            insertion_threshold_ms,
            migration_cycle_ms,
            map_order,
        }
    }

    /// Number of partitions
    #[must_use]
    pub fn partitions(&self) -> usize {
        1usize << self.map_order
    }

    /// Interval between single-partition migrations
    #[must_use]
    pub fn partition_interval(&self) -> Duration {
        Duration::from_millis((self.migration_cycle_ms / self.partitions() as u64).max(1))
    }
}

/// Executor parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Events due within this many ms bypass the tiers and go to the executor
    pub insertion_threshold_ms: u64,
    /// Maximum events executed per iteration
    pub batch_size: usize,
    /// Capacity of the transient retry queue
    pub retry_capacity: usize,
    /// Executor exits after this long without work
    pub idle_timeout_ms: u64,
    /// An execution later than this past its deadline counts as late
    pub late_threshold_secs: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            insertion_threshold_ms: EXECUTOR_INSERTION_MS,
            batch_size: 512,
            retry_capacity: 65_536,
            idle_timeout_ms: 10_000,
            late_threshold_secs: 30,
        }
    }
}

/// Monitor parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Sleep between monitor ticks
    pub tick_ms: u64,
    /// Interval between drains of the public input queue
    pub schedule_interval_ms: u64,
    /// Bounded wait when acquiring the processor each tick
    pub acquire_timeout_ms: u64,
    /// Budget for joining a cancelled executor before forcing it to exit
    pub executor_cancel_timeout_ms: u64,
    /// Budget for the final acquisition at monitor shutdown
    pub shutdown_acquire_timeout_ms: u64,
    /// Budget for joining the monitor task at teardown
    pub join_timeout_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            schedule_interval_ms: 1_000,
            acquire_timeout_ms: 1_000,
            executor_cancel_timeout_ms: 60_000,
            shutdown_acquire_timeout_ms: 10_000,
            join_timeout_ms: 30_000,
        }
    }
}

/// Complete scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Processor name used in logs and backlog reports
    pub name: String,
    /// Long tier (unbounded horizon)
    pub long: TierConfig,
    /// Medium tier
    pub medium: TierConfig,
    /// Short tier
    pub short: TierConfig,
    /// Executor parameters
    pub executor: ExecutorConfig,
    /// Monitor parameters
    pub monitor: MonitorConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: "graph".to_string(),
            long: TierConfig::new(None, cycle_for_arrival(LONG_ARRIVAL_SECS), 10),
            medium: TierConfig::new(Some(MEDIUM_INSERTION_MS), MEDIUM_CYCLE_MS, 7),
            short: TierConfig::new(
                Some(SHORT_INSERTION_MS),
                cycle_for_arrival(SHORT_ARRIVAL_SECS),
                4,
            ),
            executor: ExecutorConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Create a configuration with production defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sub-second cycles and short horizons for tests and demos
    #[must_use]
    pub fn fast() -> Self {
        Self {
            name: "fast".to_string(),
            long: TierConfig::new(None, 1_600, 3),
            medium: TierConfig::new(Some(16_000), 800, 3),
            short: TierConfig::new(Some(6_000), 400, 2),
            executor: ExecutorConfig {
                insertion_threshold_ms: COMPLETION_THRESHOLD_MS,
                batch_size: 128,
                retry_capacity: 4_096,
                idle_timeout_ms: 2_000,
                late_threshold_secs: 5,
            },
            monitor: MonitorConfig {
                tick_ms: 20,
                schedule_interval_ms: 100,
                acquire_timeout_ms: 200,
                executor_cancel_timeout_ms: 2_000,
                shutdown_acquire_timeout_ms: 2_000,
                join_timeout_ms: 5_000,
            },
        }
    }

    /// Set the processor name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set long tier parameters
    #[must_use]
    pub fn with_long(mut self, tier: TierConfig) -> Self {
        self.long = tier;
        self
    }

    /// Set medium tier parameters
    #[must_use]
    pub fn with_medium(mut self, tier: TierConfig) -> Self {
        self.medium = tier;
        self
    }

    /// Set short tier parameters
    #[must_use]
    pub fn with_short(mut self, tier: TierConfig) -> Self {
        self.short = tier;
        self
    }

    /// Set executor batch size
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.executor.batch_size = batch_size;
        self
    }

    /// Set executor parameters
    #[must_use]
    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    /// Set monitor parameters
    #[must_use]
    pub fn with_monitor(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = monitor;
        self
    }

    /// Check the configuration for values the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.executor.batch_size == 0 {
            return Err(EventError::InvalidConfig(
                "executor.batch_size must be positive".to_string(),
            ));
        }
        if self.executor.retry_capacity == 0 {
            return Err(EventError::InvalidConfig(
                "executor.retry_capacity must be positive".to_string(),
            ));
        }
        if self.monitor.tick_ms == 0 || self.monitor.schedule_interval_ms == 0 {
            return Err(EventError::InvalidConfig(
                "monitor intervals must be positive".to_string(),
            ));
        }

        for (name, tier) in [("long", &self.long), ("medium", &self.medium), ("short", &self.short)] {
            if tier.map_order > MAX_MAP_ORDER {
                return Err(EventError::InvalidConfig(format!(
                    "{name}.map_order {} exceeds {MAX_MAP_ORDER}",
                    tier.map_order
                )));
            }
            if tier.migration_cycle_ms == 0 {
                return Err(EventError::InvalidConfig(format!(
                    "{name}.migration_cycle_ms must be positive"
                )));
            }
        }

        let (Some(short), Some(medium)) = (
            self.short.insertion_threshold_ms,
            self.medium.insertion_threshold_ms,
        ) else {
            return Err(EventError::InvalidConfig(
                "short and medium tiers need a bounded insertion threshold".to_string(),
            ));
        };
        if !(self.executor.insertion_threshold_ms < short && short < medium) {
            return Err(EventError::InvalidConfig(format!(
                "insertion thresholds must increase: executor {} < short {short} < medium {medium}",
                self.executor.insertion_threshold_ms
            )));
        }

        Ok(())
    }

    /// Short tier horizon in ms
    pub(crate) fn short_horizon_ms(&self) -> u64 {
        self.short.insertion_threshold_ms.unwrap_or(SHORT_INSERTION_MS)
    }

    /// Medium tier horizon in ms
    pub(crate) fn medium_horizon_ms(&self) -> u64 {
        self.medium.insertion_threshold_ms.unwrap_or(MEDIUM_INSERTION_MS)
    }
}
