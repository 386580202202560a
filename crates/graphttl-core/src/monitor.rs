//! Event monitor
//!
//! The long-lived background task. Each tick it acquires the processor,
//! services suspend, resume and flush requests, fires due triggers and reaps
//! a finished executor.
//!
//! ```text
//!   Input ──Schedule──▶ Long ──MigrateLong──▶ Medium ──MigrateMedium──▶ Short
//!     │                                                                   │
//!     └────────────── imminent ──────────▶ Executor ◀─────Execute─────────┘
//! ```

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::ExecContext;
use crate::processor::{EventProcessor, ProcessorGuard, ProcessorState};
use crate::schedule::Cutoffs;
use crate::tier::TierKind;
use crate::trigger::{monitor_triggers, ActionTrigger, MonitorAction};

/// Handle to the running monitor task
#[derive(Debug)]
pub(crate) struct MonitorHandle {
    pub handle: JoinHandle<()>,
    pub shutdown: CancellationToken,
}

impl MonitorHandle {
    /// Request shutdown and join, forcing the task to exit after `timeout`
    pub(crate) async fn stop(self, timeout: Duration) {
        let Self { mut handle, shutdown } = self;
        shutdown.cancel();
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(component = "monitor", error = %e, "Monitor task failed"),
            Err(_) => {
                warn!(component = "monitor", "Monitor did not stop in time, forcing exit");
                handle.abort();
                let _ = handle.await;
            }
        }
    }
}

/// Monitor main loop
pub(crate) async fn run(processor: Arc<EventProcessor>, shutdown: CancellationToken) {
    let ctx = ExecContext::new("monitor");
    let config = processor.config().clone();
    let mut triggers = monitor_triggers(&config, processor.store().now_millis());

    info!(component = "monitor", name = %config.name, "Event monitor running");
    log_flows(&processor, &triggers);

    let tick = Duration::from_millis(config.monitor.tick_ms);
    let acquire_timeout = Duration::from_millis(config.monitor.acquire_timeout_ms);

    loop {
        tokio::select! {
            _ = tokio::time::sleep(tick) => {}
            _ = shutdown.cancelled() => break,
        }

        let guard = loop {
            if let Some(guard) = processor.acquire(&ctx, acquire_timeout).await {
                break Some(guard);
            }
            if shutdown.is_cancelled() {
                break None;
            }
            debug!(component = "monitor", "Processor busy, retrying acquisition");
        };
        let Some(guard) = guard else {
            break;
        };

        run_tick(&processor, &guard, &mut triggers).await;
    }

    let shutdown_timeout = Duration::from_millis(config.monitor.shutdown_acquire_timeout_ms);
    match processor.acquire(&ctx, shutdown_timeout).await {
        Some(guard) => {
            let recovered = cancel_executor(&processor, &guard).await;
            if recovered > 0 {
                info!(component = "monitor", recovered, "Recovered executor events at shutdown");
            }
        }
        None => warn!(component = "monitor", "Could not acquire processor at shutdown"),
    }

    processor.flags.monitor_running.store(false, Ordering::SeqCst);
    processor.ack.notify_waiters();
    info!(component = "monitor", name = %config.name, "Event monitor stopped");
}

fn log_flows(processor: &EventProcessor, triggers: &[ActionTrigger]) {
    let config = processor.config();
    for trigger in triggers {
        let (cycle_ms, partitions) = match trigger.action() {
            MonitorAction::MigrateLong => (config.long.migration_cycle_ms, config.long.partitions()),
            MonitorAction::MigrateMedium => {
                (config.medium.migration_cycle_ms, config.medium.partitions())
            }
            MonitorAction::Schedule => (config.monitor.schedule_interval_ms, 1),
            MonitorAction::Execute => (config.short.migration_cycle_ms, config.short.partitions()),
        };
        info!(
            component = "monitor",
            flow = %trigger.action(),
            cycle_ms,
            partitions,
            interval_ms = trigger.interval().as_millis() as u64,
            "Event flow"
        );
    }
}

/// One monitor tick with the processor held
pub(crate) async fn run_tick(
    processor: &EventProcessor,
    guard: &ProcessorGuard<'_>,
    triggers: &mut [ActionTrigger],
) {
    let flags = &processor.flags;
    let now_ms = processor.store().now_millis();
    for trigger in triggers.iter_mut() {
        trigger.refresh(now_ms);
    }

    if flags.req_resume.swap(false, Ordering::SeqCst) {
        if flags.suspended.load(Ordering::SeqCst) {
            resume(processor, guard, triggers, now_ms);
        }
        processor.ack.notify_waiters();
    }

    let suspend = flags.req_suspend.load(Ordering::SeqCst);
    let flush = flags.req_flush.load(Ordering::SeqCst);
    if suspend || flush {
        flush_input(processor, guard, now_ms);
        if suspend {
            cancel_executor(processor, guard).await;
            flags.suspended.store(true, Ordering::SeqCst);
            flags.req_suspend.store(false, Ordering::SeqCst);
            info!(component = "monitor", name = %processor.name(), "Event monitor suspended");
        }
        if flush {
            flags.req_flush.store(false, Ordering::SeqCst);
        }
        processor.ack.notify_waiters();
    }

    if !flags.suspended.load(Ordering::SeqCst) {
        for trigger in triggers.iter_mut() {
            let Some(tick) = trigger.fire() else {
                continue;
            };
            perform(processor, guard, trigger.action(), tick, now_ms);
            if let Some(pause) = trigger.pause_after() {
                tokio::time::sleep(pause).await;
            }
        }
    }

    let dead = {
        let schedule = guard.schedule();
        schedule.executor.as_ref().is_some_and(|job| job.is_dead())
    };
    if dead {
        let recovered = cancel_executor(processor, guard).await;
        debug!(component = "monitor", recovered, "Reaped finished executor");
    }
}

fn resume(
    processor: &EventProcessor,
    guard: &ProcessorGuard<'_>,
    triggers: &mut [ActionTrigger],
    now_ms: i64,
) {
    guard.set_state(ProcessorState::MigrateLong);
    let cutoffs = Cutoffs::at(now_ms, processor.config());
    let migrated = guard.schedule().full_migration(&cutoffs);
    for trigger in triggers.iter_mut() {
        trigger.reset(now_ms);
    }
    processor.flags.suspended.store(false, Ordering::SeqCst);
    guard.set_state(ProcessorState::Busy);
    info!(
        component = "monitor",
        name = %processor.name(),
        migrated,
        "Event monitor resumed"
    );
}

/// Drain all input into the tiers and return imminent events to the short tier
fn flush_input(processor: &EventProcessor, guard: &ProcessorGuard<'_>, now_ms: i64) {
    guard.set_state(ProcessorState::Flush);
    let cutoffs = Cutoffs::at(now_ms, processor.config());
    let (report, returned) = {
        let mut schedule = guard.schedule();
        schedule.absorb_input(processor.input());
        let report = schedule.schedule_events(&cutoffs);
        (report, schedule.reschedule_imminent())
    };
    guard.set_state(ProcessorState::Busy);
    debug!(
        component = "monitor",
        scheduled = report.total(),
        returned,
        "Flushed input"
    );
}

/// Execute one trigger's action
pub(crate) fn perform(
    processor: &EventProcessor,
    guard: &ProcessorGuard<'_>,
    action: MonitorAction,
    tick: u64,
    now_ms: i64,
) {
    let config = processor.config();
    let cutoffs = Cutoffs::at(now_ms, config);
    let mut schedule = guard.schedule();

    match action {
        MonitorAction::MigrateLong => {
            guard.set_state(ProcessorState::MigrateLong);
            let partition = (tick % config.long.partitions() as u64) as usize;
            let moved = schedule.migrate_partition(TierKind::Long, partition, cutoffs.medium);
            if moved > 0 {
                debug!(component = "monitor", tier = %TierKind::Long, partition, moved, "Migrated partition");
            }
        }
        MonitorAction::MigrateMedium => {
            guard.set_state(ProcessorState::MigrateMedium);
            let partition = (tick % config.medium.partitions() as u64) as usize;
            let moved = schedule.migrate_partition(TierKind::Medium, partition, cutoffs.short);
            if moved > 0 {
                debug!(component = "monitor", tier = %TierKind::Medium, partition, moved, "Migrated partition");
            }
        }
        MonitorAction::Schedule => {
            guard.set_state(ProcessorState::Schedule);
            schedule.absorb_input(processor.input());
            let report = schedule.schedule_events(&cutoffs);
            let dispatched = schedule.dispatch(|| processor.spawn_executor());
            if report.total() > 0 {
                debug!(
                    component = "monitor",
                    imminent = report.imminent,
                    short = report.short,
                    medium = report.medium,
                    long = report.long,
                    removed = report.removed,
                    dispatched,
                    "Scheduled input"
                );
            }
        }
        MonitorAction::Execute => {
            guard.set_state(ProcessorState::Execute);
            let partition = (tick % config.short.partitions() as u64) as usize;
            let due = schedule.collect_due(partition, cutoffs.executor);
            let dispatched = schedule.dispatch(|| processor.spawn_executor());
            if due > 0 {
                debug!(component = "monitor", partition, due, dispatched, "Dispatched due events");
            }
        }
    }

    guard.set_state(ProcessorState::Busy);
}

/// Stop the executor, if any, and return its events to the short tier
pub(crate) async fn cancel_executor(processor: &EventProcessor, guard: &ProcessorGuard<'_>) -> usize {
    let job = {
        let mut schedule = guard.schedule();
        schedule.executor.take()
    };
    let Some(job) = job else {
        return 0;
    };

    guard.set_state(ProcessorState::CancelExecution);
    let timeout = Duration::from_millis(processor.config().monitor.executor_cancel_timeout_ms);
    let residue = job.cancel(timeout).await;
    let recovered = guard.schedule().recover(residue);
    guard.set_state(ProcessorState::Busy);
    recovered
}
