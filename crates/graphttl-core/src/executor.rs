//! Event executor
//!
//! An on-demand task that pulls due events from its heap in capped batches
//! and executes each against the live entity. Failed executions are routed
//! by [`FailureClass`]: transient ones retry a second later, the rest are
//! parked until the monitor reaps the executor and returns them to the short
//! tier.
//!
//! The executor's queues have their own lock so batch processing never holds
//! the processor.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ExecutorConfig;
use crate::error::{AccessReason, FailureClass};
use crate::event::{Event, EventKind, Timestamp, TIMESTAMP_NEVER};
use crate::queue::{lock, DueHeap, InputQueue};
use crate::store::{EntityStore, WriteGuard};

const IDLE_DELAY: Duration = Duration::from_millis(333);
const SHORT_DELAY: Duration = Duration::from_millis(1);

/// Cumulative execution counters, shared across executor generations
#[derive(Debug, Default)]
pub struct ExecutorStats {
    executed: AtomicU64,
    on_time: AtomicU64,
    current: AtomicUsize,
    queued: AtomicUsize,
}

impl ExecutorStats {
    /// Events executed since the processor started
    #[must_use]
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    /// Events in the batch being executed
    #[must_use]
    pub fn current(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    /// Events waiting in the executor's queues
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    /// Fraction of executions that were not late, 1.0 before any execution
    #[must_use]
    pub fn on_time_rate(&self) -> f64 {
        let executed = self.executed.load(Ordering::Relaxed);
        if executed == 0 {
            return 1.0;
        }
        self.on_time.load(Ordering::Relaxed) as f64 / executed as f64
    }
}

/// What happened when an event was executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Execution {
    /// Handle no longer resolves, or the entity is defunct
    Stale,
    /// Entity is no longer scheduled
    Unscheduled,
    /// Entity was expired and deleted
    Deleted,
    /// Expired components were removed and the next deadline was queued
    ComponentsExpired { removed: usize, next: Timestamp },
    /// Deadline not reached; the true deadline was queued
    Rescheduled(Timestamp),
    /// No deadline remains; the scheduler's share was released
    Released,
    /// Event kind cannot be executed; the share was released
    Rejected,
}

impl Execution {
    fn releases_share(self) -> bool {
        matches!(self, Self::Deleted | Self::Released | Self::Rejected)
    }
}

#[derive(Debug, Default)]
struct ExecutorQueues {
    heap: DueHeap,
    imminent: VecDeque<Event>,
    pending: VecDeque<Event>,
    closed: bool,
}

impl ExecutorQueues {
    fn len(&self) -> usize {
        self.heap.len() + self.imminent.len() + self.pending.len()
    }

    fn has_work(&self) -> bool {
        !self.heap.is_empty() || !self.imminent.is_empty()
    }

    fn park_all(&mut self) {
        let imminent = std::mem::take(&mut self.imminent);
        self.heap.extend(imminent);
        let parked = self.heap.drain_sorted();
        self.pending.extend(parked);
    }
}

#[derive(Debug, Default)]
struct BatchReport {
    executed: u64,
    on_time: u64,
    transient: Vec<Event>,
    failed: Vec<Event>,
    readonly: bool,
}

/// State shared between the executor task and its owner
#[derive(Debug)]
struct ExecutorShared {
    queues: Mutex<ExecutorQueues>,
    stop: CancellationToken,
    stats: Arc<ExecutorStats>,
}

impl ExecutorShared {
    fn next_batch(&self, now: Timestamp, max: usize) -> Vec<Event> {
        let mut queues = lock(&self.queues);
        let imminent = std::mem::take(&mut queues.imminent);
        queues.heap.extend(imminent);

        let mut batch = Vec::with_capacity(max.min(queues.heap.len()));
        while batch.len() < max {
            match queues.heap.pop_due(now) {
                Some(event) => batch.push(event),
                None => break,
            }
        }
        self.stats.current.store(batch.len(), Ordering::Relaxed);
        self.stats.queued.store(queues.len(), Ordering::Relaxed);
        batch
    }

    fn absorb(&self, report: BatchReport, retry_capacity: usize) -> (usize, bool) {
        let mut queues = lock(&self.queues);
        let transients = report.transient.len();
        for event in report.transient {
            if queues.imminent.len() < retry_capacity {
                queues.imminent.push_back(event);
            } else {
                warn!(
                    component = "executor",
                    handle = %event.handle,
                    "Retry queue full, parking event"
                );
                queues.pending.push_back(event);
            }
        }
        queues.pending.extend(report.failed);

        self.stats.executed.fetch_add(report.executed, Ordering::Relaxed);
        self.stats.on_time.fetch_add(report.on_time, Ordering::Relaxed);
        self.stats.current.store(0, Ordering::Relaxed);
        self.stats.queued.store(queues.len(), Ordering::Relaxed);

        if self.stop.is_cancelled() {
            queues.park_all();
        }
        (transients, !queues.imminent.is_empty())
    }

    fn close(&self) {
        let mut queues = lock(&self.queues);
        queues.closed = true;
        queues.park_all();
    }

    fn close_and_drain(&self) -> VecDeque<Event> {
        let mut queues = lock(&self.queues);
        queues.closed = true;
        queues.park_all();
        self.stats.current.store(0, Ordering::Relaxed);
        self.stats.queued.store(0, Ordering::Relaxed);
        std::mem::take(&mut queues.pending)
    }
}

/// Handle to a running executor task
#[derive(Debug)]
pub(crate) struct ExecutorJob {
    shared: Arc<ExecutorShared>,
    handle: JoinHandle<()>,
}

impl ExecutorJob {
    /// Spawn an executor task on the current runtime
    pub(crate) fn spawn(
        store: Arc<dyn EntityStore>,
        input: Arc<InputQueue>,
        stats: Arc<ExecutorStats>,
        config: ExecutorConfig,
    ) -> Self {
        let shared = Arc::new(ExecutorShared {
            queues: Mutex::new(ExecutorQueues::default()),
            stop: CancellationToken::new(),
            stats,
        });
        let handle = tokio::spawn(run(Arc::clone(&shared), store, input, config));
        Self { shared, handle }
    }

    /// Move every event in `events` into the executor's heap.
    ///
    /// Returns false, leaving `events` untouched, once the executor has
    /// stopped accepting input.
    pub(crate) fn transfer(&self, events: &mut VecDeque<Event>) -> bool {
        let mut queues = lock(&self.shared.queues);
        if queues.closed {
            return false;
        }
        queues.heap.extend(events.drain(..));
        self.shared.stats.queued.store(queues.len(), Ordering::Relaxed);
        true
    }

    /// Task has exited
    pub(crate) fn is_dead(&self) -> bool {
        self.handle.is_finished()
    }

    /// Events held by the executor, including the batch in flight
    pub(crate) fn backlog(&self) -> usize {
        lock(&self.shared.queues).len() + self.shared.stats.current()
    }

    /// Stop the task and return every event it still holds.
    ///
    /// Waits up to `timeout` for the current batch to finish, then forces
    /// the task to exit.
    pub(crate) async fn cancel(self, timeout: Duration) -> VecDeque<Event> {
        let Self { shared, mut handle } = self;
        shared.stop.cancel();

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => debug!(component = "executor", "Executor joined"),
            Ok(Err(e)) => error!(component = "executor", error = %e, "Executor task failed"),
            Err(_) => {
                warn!(
                    component = "executor",
                    timeout_ms = timeout.as_millis() as u64,
                    "Executor did not stop in time, forcing exit"
                );
                handle.abort();
                if let Err(e) = handle.await {
                    if !e.is_cancelled() {
                        error!(component = "executor", error = %e, "Executor task failed");
                    }
                }
            }
        }

        shared.close_and_drain()
    }
}

/// Executor main loop
async fn run(
    shared: Arc<ExecutorShared>,
    store: Arc<dyn EntityStore>,
    input: Arc<InputQueue>,
    config: ExecutorConfig,
) {
    info!(component = "executor", batch_size = config.batch_size, "Event executor started");

    let idle_timeout = Duration::from_millis(config.idle_timeout_ms);
    let mut last_work = Instant::now();

    loop {
        if shared.stop.is_cancelled() {
            break;
        }

        let now = store.now_seconds();
        let batch = shared.next_batch(now, config.batch_size);
        let batch_empty = batch.is_empty();
        let report = execute_batch(store.as_ref(), &input, &batch, now, config.late_threshold_secs);

        let progress = report.executed > 0;
        if report.readonly {
            warn!(component = "executor", "Graph is readonly, stopping executor");
            shared.stop.cancel();
        }
        let (transients, imminent_waiting) = shared.absorb(report, config.retry_capacity);

        let has_work = lock(&shared.queues).has_work();
        if !batch_empty || has_work {
            last_work = Instant::now();
        } else if last_work.elapsed() >= idle_timeout {
            debug!(component = "executor", "Executor idle, exiting");
            break;
        }

        let delay = next_delay(progress, transients, imminent_waiting, batch_empty);
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shared.stop.cancelled() => {}
            }
        }
    }

    shared.close();
    info!(
        component = "executor",
        executed = shared.stats.executed(),
        "Event executor stopped"
    );
}

/// Delay before the next iteration
fn next_delay(progress: bool, transients: usize, imminent_waiting: bool, batch_empty: bool) -> Duration {
    match (progress, transients) {
        (false, 0) if imminent_waiting => SHORT_DELAY,
        (false, 0) if batch_empty => IDLE_DELAY,
        (false, 0) => SHORT_DELAY,
        (false, n) => Duration::from_millis(n as u64),
        (true, 0) => Duration::ZERO,
        (true, _) => SHORT_DELAY,
    }
}

fn execute_batch(
    store: &dyn EntityStore,
    input: &InputQueue,
    batch: &[Event],
    now: Timestamp,
    late_threshold_secs: u32,
) -> BatchReport {
    let mut report = BatchReport::default();

    for event in batch {
        match execute_event(store, input, event, now) {
            Ok(execution) => {
                debug!(
                    component = "executor",
                    handle = %event.handle,
                    outcome = ?execution,
                    "Executed event"
                );
                report.executed += 1;
                if now <= event.exec_ts.saturating_add(late_threshold_secs) {
                    report.on_time += 1;
                }
            }
            Err(reason) => match reason.classify() {
                FailureClass::Transient => {
                    let mut retry = *event;
                    retry.exec_ts = retry.exec_ts.saturating_add(1);
                    report.transient.push(retry);
                }
                FailureClass::ReadonlyShutdown => {
                    report.failed.push(*event);
                    report.readonly = true;
                }
                FailureClass::Permanent => {
                    error!(
                        component = "executor",
                        handle = %event.handle,
                        reason = %reason,
                        "Event execution failed"
                    );
                    report.failed.push(*event);
                }
            },
        }
    }

    report
}

/// Execute one event against the live entity
pub(crate) fn execute_event(
    store: &dyn EntityStore,
    input: &InputQueue,
    event: &Event,
    now: Timestamp,
) -> Result<Execution, AccessReason> {
    let Some(entity) = store.resolve(event.handle) else {
        return Ok(Execution::Stale);
    };
    if entity.is_defunct() {
        return Ok(Execution::Stale);
    }

    let execution = {
        let mut guard = entity.try_write_lock()?;
        if !guard.is_event_scheduled() {
            return Ok(Execution::Unscheduled);
        }

        match event.kind {
            EventKind::Expiration => expire(guard.as_mut(), input, event, now)?,
            EventKind::RemoveSchedule => {
                error!(
                    component = "executor",
                    handle = %event.handle,
                    kind = %event.kind,
                    "Event kind cannot be executed"
                );
                guard.set_event_scheduled(false);
                Execution::Rejected
            }
        }
    };

    if execution.releases_share() {
        store.decref(event.handle);
    }
    Ok(execution)
}

fn expire(
    guard: &mut dyn WriteGuard,
    input: &InputQueue,
    event: &Event,
    now: Timestamp,
) -> Result<Execution, AccessReason> {
    let expiration = guard.expiration();

    if expiration.is_entity_expired(now) {
        guard.delete()?;
        guard.set_event_scheduled(false);
        return Ok(Execution::Deleted);
    }

    if expiration.are_components_expired(now) {
        let expiry = guard.expire_components(now)?;
        let next = expiration.entity_ts.min(expiry.next_component_ts);
        return Ok(match reschedule(guard, input, event, next) {
            Execution::Rescheduled(next) => Execution::ComponentsExpired {
                removed: expiry.removed,
                next,
            },
            other => other,
        });
    }

    Ok(reschedule(guard, input, event, expiration.next_deadline()))
}

fn reschedule(guard: &mut dyn WriteGuard, input: &InputQueue, event: &Event, next: Timestamp) -> Execution {
    if next == TIMESTAMP_NEVER {
        guard.clear_expiration();
        guard.set_event_scheduled(false);
        return Execution::Released;
    }
    input.push(Event {
        exec_ts: next,
        ..*event
    });
    Execution::Rescheduled(next)
}

#[cfg(test)]
mod tests;
