//! Event API
//!
//! Calls that enqueue only touch the public input queue and never wait on
//! the processor. Calls that inspect or mutate the schedule acquire it with a
//! caller-supplied budget. Once the processor is defunct every call is a
//! safe no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backlog::BacklogInfo;
use crate::context::ExecContext;
use crate::error::{EventError, Result};
use crate::event::{EntityHandle, Event, Timestamp, TIMESTAMP_MIN, TIMESTAMP_NEVER};
use crate::processor::{EventProcessor, ProcessorGuard};
use crate::schedule::Cutoffs;
use crate::store::WriteGuard;

const MIN_DISABLE_BUDGET: Duration = Duration::from_secs(5);
const BACKLOG_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(2_000);

/// Result of [`EventProcessor::flush`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Monitor drained all input into the tiers
    Flushed,
    /// Budget expired before the monitor acknowledged
    TimedOut,
    /// No monitor is running
    NotRunning,
}

/// Result of [`EventProcessor::enable`] and [`EventProcessor::disable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// Monitor is running its triggers
    Enabled,
    /// Monitor is suspended
    Disabled,
    /// Budget expired before the monitor acknowledged
    TimedOut,
    /// No monitor is running
    NotRunning,
}

impl EventProcessor {
    /// Schedule `entity` for expiration processing at `at_ts`.
    ///
    /// The first time an entity becomes tracked the scheduler takes one
    /// ownership share of it. `TIMESTAMP_NEVER` queues an immediate event so
    /// the executor can release the entity.
    pub fn schedule_expiration(&self, entity: &mut dyn WriteGuard, at_ts: Timestamp) -> bool {
        if self.is_defunct() {
            return false;
        }
        let handle = entity.handle();
        let exec_ts = if at_ts == TIMESTAMP_NEVER {
            TIMESTAMP_MIN
        } else {
            at_ts
        };
        self.input().push(Event::expiration(handle, exec_ts));

        if !entity.is_event_scheduled() {
            entity.set_event_scheduled(true);
            self.store().incref(handle);
        }
        true
    }

    /// Cancel any schedule for `entity` and release the ownership share
    pub fn remove_schedule(&self, entity: &mut dyn WriteGuard) -> bool {
        if self.is_defunct() {
            return false;
        }
        let handle = entity.handle();
        if entity.is_event_scheduled() {
            entity.set_event_scheduled(false);
            self.store().decref(handle);
        }
        self.input().push(Event::remove_schedule(handle));
        true
    }

    /// Remove `entity` from every tier right away, bypassing the queues.
    ///
    /// The caller must already hold both the processor and the entity's
    /// write lock. Returns the number of tier entries removed.
    pub fn immediate_drop(&self, held: &ProcessorGuard<'_>, entity: &mut dyn WriteGuard) -> usize {
        if self.is_defunct() || !std::ptr::eq(held.processor(), self) {
            return 0;
        }
        let handle = entity.handle();
        if entity.is_event_scheduled() {
            entity.set_event_scheduled(false);
            entity.clear_expiration();
            self.store().decref(handle);
        }
        let removed = held.schedule().remove_everywhere(handle);
        debug!(component = "api", handle = %handle, removed, "Dropped from schedule");
        removed
    }

    /// Number of tiers holding an entry for `handle`
    pub async fn schedule_occurrences(
        &self,
        ctx: &ExecContext,
        handle: EntityHandle,
        timeout: Duration,
    ) -> Result<usize> {
        if self.is_defunct() {
            return Ok(0);
        }
        let guard = self
            .acquire(ctx, timeout)
            .await
            .ok_or(EventError::AcquireTimeout(timeout.as_millis() as u64))?;
        let n = guard.schedule().occurrences(handle);
        Ok(n)
    }

    /// Check if any tier holds an entry for `handle`
    pub async fn exists_in_schedule(
        &self,
        ctx: &ExecContext,
        handle: EntityHandle,
        timeout: Duration,
    ) -> Result<bool> {
        Ok(self.schedule_occurrences(ctx, handle, timeout).await? > 0)
    }

    /// Drain the public input into the tiers right now, if the processor is
    /// free. Imminent events wait for the monitor's next hand-off.
    pub fn schedule_pending(&self, ctx: &ExecContext) -> Result<usize> {
        if self.is_defunct() {
            return Ok(0);
        }
        let guard = self.try_acquire(ctx).ok_or(EventError::AcquireTimeout(0))?;
        let cutoffs = Cutoffs::at(self.store().now_millis(), self.config());
        let mut schedule = guard.schedule();
        schedule.absorb_input(self.input());
        Ok(schedule.schedule_events(&cutoffs).total())
    }

    /// Block until the monitor has drained all input into the tiers
    pub async fn flush(&self, ctx: &ExecContext, budget: Duration) -> FlushOutcome {
        if self.is_defunct() || !self.monitor_running() {
            return FlushOutcome::NotRunning;
        }
        let deadline = Instant::now() + budget;

        {
            let Some(_guard) = self.acquire(ctx, budget).await else {
                return FlushOutcome::TimedOut;
            };
            self.flags.req_flush.store(true, Ordering::SeqCst);
        }

        if self
            .wait_for(deadline, || !self.flags.req_flush.load(Ordering::SeqCst))
            .await
        {
            return FlushOutcome::Flushed;
        }
        self.flags.req_flush.store(false, Ordering::SeqCst);
        if self.monitor_running() {
            warn!(component = "api", budget_ms = budget.as_millis() as u64, "Flush timed out");
            FlushOutcome::TimedOut
        } else {
            FlushOutcome::NotRunning
        }
    }

    /// Resume a suspended monitor
    pub async fn enable(&self, ctx: &ExecContext, budget: Duration) -> ToggleOutcome {
        if self.is_defunct() || !self.monitor_running() {
            return ToggleOutcome::NotRunning;
        }
        if !self.flags.suspended.load(Ordering::SeqCst) {
            return ToggleOutcome::Enabled;
        }
        self.toggle(ctx, budget, &self.flags.req_resume, false).await
    }

    /// Suspend the monitor after draining all input into the tiers.
    ///
    /// Budgets under five seconds are raised to five seconds.
    pub async fn disable(&self, ctx: &ExecContext, budget: Duration) -> ToggleOutcome {
        if self.is_defunct() {
            return ToggleOutcome::NotRunning;
        }
        if !self.monitor_running() || self.flags.suspended.load(Ordering::SeqCst) {
            return ToggleOutcome::Disabled;
        }
        self.toggle(ctx, budget.max(MIN_DISABLE_BUDGET), &self.flags.req_suspend, true)
            .await
    }

    async fn toggle(
        &self,
        ctx: &ExecContext,
        budget: Duration,
        request: &AtomicBool,
        want_suspended: bool,
    ) -> ToggleOutcome {
        let deadline = Instant::now() + budget;
        {
            let Some(_guard) = self.acquire(ctx, budget).await else {
                return ToggleOutcome::TimedOut;
            };
            request.store(true, Ordering::SeqCst);
        }

        let reached = self
            .wait_for(deadline, || {
                self.flags.suspended.load(Ordering::SeqCst) == want_suspended
            })
            .await;

        match (reached, want_suspended) {
            (true, true) => ToggleOutcome::Disabled,
            (true, false) => ToggleOutcome::Enabled,
            (false, _) => {
                request.store(false, Ordering::SeqCst);
                if self.monitor_running() {
                    ToggleOutcome::TimedOut
                } else {
                    ToggleOutcome::NotRunning
                }
            }
        }
    }

    /// Wait for the monitor to make `done` true, until `deadline`
    async fn wait_for(&self, deadline: Instant, done: impl Fn() -> bool) -> bool {
        loop {
            let notified = self.ack.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if done() {
                return true;
            }
            if !self.monitor_running() {
                return false;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return done();
            }
        }
    }

    /// Mark the processor defunct. Idempotent.
    pub async fn set_defunct(&self, ctx: &ExecContext, timeout: Duration) -> Result<()> {
        let _guard = self
            .acquire(ctx, timeout)
            .await
            .ok_or(EventError::AcquireTimeout(timeout.as_millis() as u64))?;
        if !self.flags.defunct.swap(true, Ordering::SeqCst) {
            info!(component = "api", name = %self.name(), "Event processor marked defunct");
        }
        Ok(())
    }

    /// Check if the processor can accept and process work
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state().is_operational()
            && !self.is_defunct()
            && (!self.runs_daemon() || self.monitor_running())
    }

    /// Check if the monitor is running its triggers
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.is_ready() && self.monitor_running() && !self.flags.suspended.load(Ordering::SeqCst)
    }

    fn monitor_running(&self) -> bool {
        self.flags.monitor_running.load(Ordering::SeqCst)
    }

    /// Snapshot of queue and tier sizes.
    ///
    /// Tier sizes are only filled in if the processor can be acquired
    /// within two seconds.
    pub async fn backlog_info(&self, ctx: &ExecContext) -> BacklogInfo {
        let stats = self.stats();
        let mut info = BacklogInfo {
            name: self.name().to_string(),
            n_api: self.input().len(),
            n_long: 0,
            n_medium: 0,
            n_short: 0,
            n_imminent: 0,
            n_executor_current: stats.current() + stats.queued(),
            n_executor_done: stats.executed(),
            on_time_rate: stats.on_time_rate(),
            running: self.monitor_running(),
            paused: self.flags.suspended.load(Ordering::SeqCst),
            filled: false,
        };

        if let Some(guard) = self.acquire(ctx, BACKLOG_ACQUIRE_TIMEOUT).await {
            let schedule = guard.schedule();
            info.n_api += schedule.monitor_queue.len();
            info.n_long = schedule.long.len();
            info.n_medium = schedule.medium.len();
            info.n_short = schedule.short.len();
            info.n_imminent = schedule.exec_queue.len();
            if let Some(job) = &schedule.executor {
                info.n_executor_current = job.backlog();
            }
            info.filled = true;
        }
        info
    }
}
