//! Periodic action triggers
//!
//! A trigger fires once `now` passes its next fire time, then advances the
//! fire time by one interval. Triggers that may skip ticks jump ahead when
//! they fall behind; the others catch up one interval per tick so every
//! partition is still visited.

use std::fmt;
use std::time::Duration;

use crate::config::SchedulerConfig;

/// Maintenance action driven by a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorAction {
    /// Migrate one long-tier partition into the medium tier
    MigrateLong,
    /// Migrate one medium-tier partition into the short tier
    MigrateMedium,
    /// Drain the public input queue into the tiers
    Schedule,
    /// Hand due short-tier events to the executor
    Execute,
}

impl fmt::Display for MonitorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MigrateLong => write!(f, "Long->Medium"),
            Self::MigrateMedium => write!(f, "Medium->Short"),
            Self::Schedule => write!(f, "Input->Schedule"),
            Self::Execute => write!(f, "Short->Execute"),
        }
    }
}

/// Periodic trigger for one [`MonitorAction`]
#[derive(Debug, Clone)]
pub struct ActionTrigger {
    action: MonitorAction,
    now_ms: i64,
    next_fire_ms: i64,
    interval_ms: i64,
    counter: u64,
    can_skip_ticks: bool,
    pause_after: Option<Duration>,
}

impl ActionTrigger {
    /// Create a trigger that is due once the clock moves past `now_ms`
    #[must_use]
    pub fn new(action: MonitorAction, interval: Duration, now_ms: i64) -> Self {
        let interval_ms = i64::try_from(interval.as_millis()).unwrap_or(i64::MAX).max(1);
        Self {
            action,
            now_ms,
            next_fire_ms: now_ms,
            interval_ms,
            counter: 0,
            can_skip_ticks: false,
            pause_after: None,
        }
    }

    /// Allow the trigger to drop missed ticks
    #[must_use]
    pub fn with_skip_ticks(mut self, can_skip: bool) -> Self {
        self.can_skip_ticks = can_skip;
        self
    }

    /// Pause briefly after each fire
    #[must_use]
    pub fn with_pause_after(mut self, pause: Duration) -> Self {
        self.pause_after = Some(pause);
        self
    }

    /// Action this trigger drives
    #[must_use]
    pub fn action(&self) -> MonitorAction {
        self.action
    }

    /// Number of times fired
    #[must_use]
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Fire interval
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.unsigned_abs())
    }

    /// Pause to take after firing
    #[must_use]
    pub fn pause_after(&self) -> Option<Duration> {
        self.pause_after
    }

    /// Next fire time
    #[must_use]
    pub fn next_fire_ms(&self) -> i64 {
        self.next_fire_ms
    }

    /// Update the trigger's view of the clock
    pub fn refresh(&mut self, now_ms: i64) {
        self.now_ms = now_ms;
    }

    /// Restart the schedule from `now_ms`
    pub fn reset(&mut self, now_ms: i64) {
        self.now_ms = now_ms;
        self.next_fire_ms = now_ms;
    }

    /// Check if the trigger would fire at its current `now`
    #[must_use]
    pub fn is_due(&self) -> bool {
        self.now_ms > self.next_fire_ms
    }

    /// Fire if due, returning the pre-fire counter
    pub fn fire(&mut self) -> Option<u64> {
        if !self.is_due() {
            return None;
        }
        let tick = self.counter;
        self.counter += 1;
        self.next_fire_ms = self.next_fire_ms.saturating_add(self.interval_ms);
        if self.can_skip_ticks && self.next_fire_ms < self.now_ms {
            self.next_fire_ms = self.now_ms.saturating_add(self.interval_ms);
        }
        Some(tick)
    }
}

/// The four monitor triggers in firing order
#[must_use]
pub fn monitor_triggers(config: &SchedulerConfig, now_ms: i64) -> Vec<ActionTrigger> {
    let pause = Duration::from_millis(1);
    vec![
        ActionTrigger::new(
            MonitorAction::MigrateLong,
            config.long.partition_interval(),
            now_ms,
        ),
        ActionTrigger::new(
            MonitorAction::MigrateMedium,
            config.medium.partition_interval(),
            now_ms,
        ),
        ActionTrigger::new(
            MonitorAction::Schedule,
            Duration::from_millis(config.monitor.schedule_interval_ms),
            now_ms,
        )
        .with_skip_ticks(true)
        .with_pause_after(pause),
        ActionTrigger::new(
            MonitorAction::Execute,
            config.short.partition_interval(),
            now_ms,
        )
        .with_pause_after(pause),
    ]
}
