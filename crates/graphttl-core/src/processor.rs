//! Event processor
//!
//! The owning aggregate: schedule tiers, queues, the monitor and executor
//! tasks, and the reentrant acquisition lock guarding them.
//!
//! ## Lifecycle
//!
//! ```ignore
//! let processor = EventProcessor::initialize(store, SchedulerConfig::default(), true)?;
//! processor.start(true)?;
//! // ... schedule_expiration / flush / backlog_info ...
//! processor.destroy().await?;
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::SchedulerConfig;
use crate::context::ExecContext;
use crate::error::{EventError, Result};
use crate::event::{EntityHandle, Event};
use crate::executor::{ExecutorJob, ExecutorStats};
use crate::monitor::{self, MonitorHandle};
use crate::queue::{lock, InputQueue};
use crate::reentrant::{Reentrant, ReentrantGuard};
use crate::schedule::Schedule;
use crate::store::EntityStore;

/// Processor state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessorState {
    /// Constructed, not started
    Initialize = 0,
    /// Operational and not acquired
    Idle = 1,
    /// Acquired
    Busy = 2,
    /// Draining the input queue
    Schedule = 3,
    /// Servicing a flush or suspend request
    Flush = 4,
    /// Migrating a long-tier partition
    MigrateLong = 5,
    /// Migrating a medium-tier partition
    MigrateMedium = 6,
    /// Handing due events to the executor
    Execute = 7,
    /// Cancelling the executor
    CancelExecution = 8,
    /// Being torn down
    Destroy = 9,
    /// Torn down
    Finalized = 10,
}

impl ProcessorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Initialize,
            1 => Self::Idle,
            2 => Self::Busy,
            3 => Self::Schedule,
            4 => Self::Flush,
            5 => Self::MigrateLong,
            6 => Self::MigrateMedium,
            7 => Self::Execute,
            8 => Self::CancelExecution,
            9 => Self::Destroy,
            _ => Self::Finalized,
        }
    }

    /// Between start and teardown
    #[must_use]
    pub fn is_operational(self) -> bool {
        !matches!(self, Self::Initialize | Self::Destroy | Self::Finalized)
    }
}

impl fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initialize => "Initialize",
            Self::Idle => "Idle",
            Self::Busy => "Busy",
            Self::Schedule => "Schedule",
            Self::Flush => "Flush",
            Self::MigrateLong => "MigrateLong",
            Self::MigrateMedium => "MigrateMedium",
            Self::Execute => "Execute",
            Self::CancelExecution => "CancelExecution",
            Self::Destroy => "Destroy",
            Self::Finalized => "Finalized",
        };
        f.write_str(s)
    }
}

/// Request and status flags shared with the monitor
#[derive(Debug, Default)]
pub(crate) struct ProcessorFlags {
    pub defunct: AtomicBool,
    pub suspended: AtomicBool,
    pub req_suspend: AtomicBool,
    pub req_resume: AtomicBool,
    pub req_flush: AtomicBool,
    pub monitor_running: AtomicBool,
}

/// Tiered expiration scheduler
pub struct EventProcessor {
    config: SchedulerConfig,
    store: Arc<dyn EntityStore>,
    input: Arc<InputQueue>,
    schedule: Reentrant<Schedule>,
    state: AtomicU8,
    pub(crate) flags: ProcessorFlags,
    /// Signalled whenever the monitor acknowledges a request or exits
    pub(crate) ack: Notify,
    stats: Arc<ExecutorStats>,
    run_daemon: bool,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl fmt::Debug for EventProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventProcessor")
            .field("name", &self.config.name)
            .field("state", &self.state())
            .field("run_daemon", &self.run_daemon)
            .finish_non_exhaustive()
    }
}

impl EventProcessor {
    /// Create a processor for `store`.
    ///
    /// With `run_daemon` false no monitor is ever started; events accumulate
    /// and can only be drained with [`EventProcessor::schedule_pending`].
    pub fn initialize(
        store: Arc<dyn EntityStore>,
        config: SchedulerConfig,
        run_daemon: bool,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        info!(
            component = "api",
            name = %config.name,
            run_daemon,
            "Event processor initialized"
        );
        Ok(Arc::new(Self {
            schedule: Reentrant::new(Schedule::new(&config)),
            config,
            store,
            input: Arc::new(InputQueue::new()),
            state: AtomicU8::new(ProcessorState::Initialize as u8),
            flags: ProcessorFlags::default(),
            ack: Notify::new(),
            stats: Arc::new(ExecutorStats::default()),
            run_daemon,
            monitor: Mutex::new(None),
        }))
    }

    /// Start the monitor, enabled or suspended
    pub fn start(self: &Arc<Self>, enable: bool) -> Result<()> {
        if self.is_defunct() {
            return Err(EventError::Defunct);
        }
        match self.state() {
            ProcessorState::Initialize => self.set_state(ProcessorState::Idle),
            ProcessorState::Destroy | ProcessorState::Finalized => return Err(EventError::NotReady),
            _ => {}
        }
        if !self.run_daemon {
            return Ok(());
        }

        let mut slot = lock(&self.monitor);
        if slot.is_some() {
            debug!(component = "api", "Event monitor already started");
            return Ok(());
        }
        tokio::runtime::Handle::try_current()
            .map_err(|e| EventError::TaskStart(e.to_string()))?;

        self.flags.suspended.store(true, Ordering::SeqCst);
        self.flags.req_resume.store(enable, Ordering::SeqCst);
        self.flags.monitor_running.store(true, Ordering::SeqCst);

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(monitor::run(Arc::clone(self), shutdown.clone()));
        *slot = Some(MonitorHandle { handle, shutdown });

        info!(component = "api", name = %self.config.name, enable, "Event monitor started");
        Ok(())
    }

    /// Stop every task and release every ownership share still held.
    ///
    /// Returns the number of shares released.
    pub async fn destroy(&self) -> Result<usize> {
        let previous = ProcessorState::from_u8(
            self.state
                .swap(ProcessorState::Destroy as u8, Ordering::SeqCst),
        );
        if matches!(previous, ProcessorState::Destroy | ProcessorState::Finalized) {
            self.set_state(previous);
            return Ok(0);
        }
        info!(component = "api", name = %self.config.name, "Destroying event processor");

        let monitor = lock(&self.monitor).take();
        if let Some(monitor) = monitor {
            monitor
                .stop(Duration::from_millis(self.config.monitor.join_timeout_ms))
                .await;
        }

        let ctx = ExecContext::new("destroy");
        let timeout = Duration::from_millis(self.config.monitor.shutdown_acquire_timeout_ms);
        let Some(guard) = self.schedule.acquire(&ctx, timeout).await else {
            error!(component = "api", "Could not acquire processor for teardown");
            self.flags.defunct.store(true, Ordering::SeqCst);
            return Err(EventError::AcquireTimeout(timeout.as_millis() as u64));
        };

        let job = {
            let mut schedule = guard.state();
            schedule.executor.take()
        };
        let residue = match job {
            Some(job) => {
                job.cancel(Duration::from_millis(
                    self.config.monitor.executor_cancel_timeout_ms,
                ))
                .await
            }
            None => Default::default(),
        };

        let mut events = {
            let mut schedule = guard.state();
            schedule.drain_all()
        };
        events.extend(residue);
        events.extend(self.input.drain());
        drop(guard);

        let released = self.release_shares(&events);
        self.flags.defunct.store(true, Ordering::SeqCst);
        self.set_state(ProcessorState::Finalized);
        self.ack.notify_waiters();

        info!(
            component = "api",
            name = %self.config.name,
            events = events.len(),
            released,
            "Event processor destroyed"
        );
        Ok(released)
    }

    /// Give up the share of every handle in `events`.
    ///
    /// Bypasses the write gate: a readonly graph or a briefly locked entity
    /// must not keep the scheduler's share alive past teardown.
    fn release_shares(&self, events: &[Event]) -> usize {
        let handles: HashSet<EntityHandle> = events.iter().map(|e| e.handle).collect();
        let mut released = 0;
        for handle in handles {
            let Some(entity) = self.store.resolve(handle) else {
                continue;
            };
            if entity.release_scheduled() {
                self.store.decref(handle);
                released += 1;
            } else {
                debug!(component = "api", handle = %handle, "No share held at teardown");
            }
        }
        released
    }

    /// Acquire the processor for `ctx`, waiting at most `timeout`
    pub async fn acquire(&self, ctx: &ExecContext, timeout: Duration) -> Option<ProcessorGuard<'_>> {
        let inner = self.schedule.acquire(ctx, timeout).await?;
        Some(self.wrap(inner))
    }

    /// Acquire the processor for `ctx` without waiting
    pub fn try_acquire(&self, ctx: &ExecContext) -> Option<ProcessorGuard<'_>> {
        let inner = self.schedule.try_acquire(ctx)?;
        Some(self.wrap(inner))
    }

    fn wrap<'a>(&'a self, inner: ReentrantGuard<'a, Schedule>) -> ProcessorGuard<'a> {
        if inner.is_outermost() && self.state() == ProcessorState::Idle {
            self.set_state(ProcessorState::Busy);
        }
        ProcessorGuard {
            processor: self,
            inner,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ProcessorState {
        ProcessorState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: ProcessorState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Processor name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub(crate) fn input(&self) -> &Arc<InputQueue> {
        &self.input
    }

    pub(crate) fn stats(&self) -> &ExecutorStats {
        &self.stats
    }

    /// Check if the processor was marked defunct
    #[must_use]
    pub fn is_defunct(&self) -> bool {
        self.flags.defunct.load(Ordering::SeqCst)
    }

    /// Whether a monitor was requested at initialization
    #[must_use]
    pub fn runs_daemon(&self) -> bool {
        self.run_daemon
    }

    pub(crate) fn spawn_executor(&self) -> ExecutorJob {
        debug!(component = "monitor", "Spawning event executor");
        ExecutorJob::spawn(
            Arc::clone(&self.store),
            Arc::clone(&self.input),
            Arc::clone(&self.stats),
            self.config.executor,
        )
    }
}

/// Exclusive, reentrant ownership of an [`EventProcessor`]
#[derive(Debug)]
pub struct ProcessorGuard<'a> {
    processor: &'a EventProcessor,
    inner: ReentrantGuard<'a, Schedule>,
}

impl<'a> ProcessorGuard<'a> {
    pub(crate) fn schedule(&self) -> MutexGuard<'_, Schedule> {
        self.inner.state()
    }

    pub(crate) fn set_state(&self, state: ProcessorState) {
        if self.processor.state().is_operational() {
            self.processor.set_state(state);
        }
    }

    /// Processor this guard belongs to
    #[must_use]
    pub fn processor(&self) -> &'a EventProcessor {
        self.processor
    }

    /// Nesting depth including this guard
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.inner.depth()
    }
}

impl Drop for ProcessorGuard<'_> {
    fn drop(&mut self) {
        if self.inner.is_outermost() && self.processor.state().is_operational() {
            self.processor.set_state(ProcessorState::Idle);
        }
    }
}
