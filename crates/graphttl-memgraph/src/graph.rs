//! In-memory graph
//!
//! Vertices live in a [`DashMap`] keyed by handle. Each vertex starts with
//! one ownership share held by the graph; deleting the vertex releases that
//! share and the vertex leaves the map once every share is gone.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use graphttl_core::{
    AccessReason, EntityHandle, Entity, EntityStore, EventError, EventProcessor, ExecContext,
    Expiration, Timestamp, WriteGuard, TIMESTAMP_NEVER,
};

use crate::clock::Clock;
use crate::error::{GraphError, Result};
use crate::vertex::{Edge, Vertex, VertexWriteGuard};

/// Write availability of the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GraphMode {
    /// Normal operation
    Writable = 0,
    /// Transitioning to readonly; writes are refused
    ReadonlyPending = 1,
    /// Readonly; writes are refused
    Readonly = 2,
}

impl GraphMode {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Writable,
            1 => Self::ReadonlyPending,
            _ => Self::Readonly,
        }
    }
}

/// Ownership share bookkeeping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShareStats {
    /// Shares granted to the scheduler
    pub increfs: u64,
    /// Shares released by the scheduler
    pub decrefs: u64,
    /// Releases with no share left to release
    pub underflows: u64,
    /// Vertices freed after their last share
    pub freed: u64,
}

#[derive(Debug, Default)]
struct ShareCounters {
    increfs: AtomicU64,
    decrefs: AtomicU64,
    underflows: AtomicU64,
    freed: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
struct Fault {
    reason: AccessReason,
    remaining: u32,
}

#[derive(Debug)]
pub(crate) struct GraphInner {
    vertices: DashMap<EntityHandle, Arc<Vertex>>,
    next_id: AtomicU64,
    mode: AtomicU8,
    clock: Clock,
    shares: ShareCounters,
    faults: DashMap<EntityHandle, Fault>,
}

impl GraphInner {
    /// Refuse writes in readonly modes and serve injected faults
    pub(crate) fn check_access(&self, handle: EntityHandle) -> std::result::Result<(), AccessReason> {
        match GraphMode::from_u8(self.mode.load(Ordering::SeqCst)) {
            GraphMode::Writable => {}
            GraphMode::ReadonlyPending => return Err(AccessReason::ReadonlyPending),
            GraphMode::Readonly => return Err(AccessReason::ReadonlyGraph),
        }

        let fault = match self.faults.get_mut(&handle) {
            Some(mut fault) => {
                fault.remaining = fault.remaining.saturating_sub(1);
                Some((fault.reason, fault.remaining == 0))
            }
            None => None,
        };
        match fault {
            Some((reason, exhausted)) => {
                if exhausted {
                    self.faults.remove(&handle);
                }
                Err(reason)
            }
            None => Ok(()),
        }
    }

    /// Drop one share of `vertex`, freeing it after the last one
    pub(crate) fn release_share(&self, vertex: &Vertex) {
        let remaining = vertex.decref();
        if remaining < 0 {
            self.shares.underflows.fetch_add(1, Ordering::SeqCst);
            error!(
                component = "graph",
                handle = %vertex.handle(),
                refcount = remaining,
                "Reference count underflow"
            );
        } else if remaining == 0 {
            self.vertices.remove(&vertex.handle());
            self.shares.freed.fetch_add(1, Ordering::SeqCst);
            debug!(component = "graph", handle = %vertex.handle(), "Vertex freed");
        }
    }
}

/// Concurrent in-memory graph
#[derive(Debug, Clone)]
pub struct MemGraph {
    inner: Arc<GraphInner>,
}

impl Default for MemGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl MemGraph {
    /// Graph on the wall clock
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Clock::system())
    }

    /// Graph on `clock`
    #[must_use]
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            inner: Arc::new(GraphInner {
                vertices: DashMap::new(),
                next_id: AtomicU64::new(1),
                mode: AtomicU8::new(GraphMode::Writable as u8),
                clock,
                shares: ShareCounters::default(),
                faults: DashMap::new(),
            }),
        }
    }

    /// Graph clock
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.inner.clock
    }

    /// Create a vertex without a deadline
    pub fn create_vertex(&self, name: impl Into<String>) -> EntityHandle {
        let handle = EntityHandle(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let vertex = Vertex::new(handle, name.into(), Arc::downgrade(&self.inner));
        self.inner.vertices.insert(handle, Arc::new(vertex));
        handle
    }

    /// Look up a vertex, defunct or not
    #[must_use]
    pub fn vertex(&self, handle: EntityHandle) -> Option<Arc<Vertex>> {
        self.inner
            .vertices
            .get(&handle)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Check if a live vertex exists
    #[must_use]
    pub fn contains(&self, handle: EntityHandle) -> bool {
        self.vertex(handle).is_some_and(|vertex| !vertex.is_defunct())
    }

    /// Number of live vertices
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.inner
            .vertices
            .iter()
            .filter(|entry| !entry.value().is_defunct())
            .count()
    }

    /// Ownership shares held on a vertex still in the map
    #[must_use]
    pub fn refcount(&self, handle: EntityHandle) -> Option<i64> {
        self.vertex(handle).map(|vertex| vertex.refcount())
    }

    /// Current deadlines of a live vertex
    #[must_use]
    pub fn expiration(&self, handle: EntityHandle) -> Option<Expiration> {
        let vertex = self.vertex(handle).filter(|vertex| !vertex.is_defunct())?;
        let component_ts = vertex
            .arcs()
            .iter()
            .map(|edge| edge.tmx)
            .min()
            .unwrap_or(TIMESTAMP_NEVER);
        Some(Expiration {
            entity_ts: vertex.tmx(),
            component_ts,
        })
    }

    /// Current write mode
    #[must_use]
    pub fn mode(&self) -> GraphMode {
        GraphMode::from_u8(self.inner.mode.load(Ordering::SeqCst))
    }

    /// Change the write mode
    pub fn set_mode(&self, mode: GraphMode) {
        let previous = GraphMode::from_u8(self.inner.mode.swap(mode as u8, Ordering::SeqCst));
        if previous != mode {
            info!(component = "graph", ?previous, ?mode, "Graph mode changed");
        }
    }

    /// Make the next `count` write lock attempts on `handle` fail with `reason`
    pub fn inject_fault(&self, handle: EntityHandle, reason: AccessReason, count: u32) {
        if count == 0 {
            self.inner.faults.remove(&handle);
            return;
        }
        self.inner.faults.insert(
            handle,
            Fault {
                reason,
                remaining: count,
            },
        );
    }

    /// Ownership share counters
    #[must_use]
    pub fn share_stats(&self) -> ShareStats {
        let shares = &self.inner.shares;
        ShareStats {
            increfs: shares.increfs.load(Ordering::SeqCst),
            decrefs: shares.decrefs.load(Ordering::SeqCst),
            underflows: shares.underflows.load(Ordering::SeqCst),
            freed: shares.freed.load(Ordering::SeqCst),
        }
    }

    /// Run `f` with the vertex write-locked
    pub fn with_vertex<R>(
        &self,
        handle: EntityHandle,
        f: impl FnOnce(&mut VertexWriteGuard<'_>) -> R,
    ) -> Result<R> {
        let vertex = self.vertex(handle).ok_or(GraphError::NotFound(handle))?;
        let mut guard = vertex
            .try_write()
            .map_err(|reason| GraphError::Access { handle, reason })?;
        Ok(f(&mut guard))
    }

    /// Set the vertex deadline and keep the scheduler informed
    pub fn set_vertex_expiration(
        &self,
        processor: &EventProcessor,
        handle: EntityHandle,
        tmx: Timestamp,
    ) -> Result<()> {
        self.with_vertex(handle, |guard| {
            guard.set_tmx(tmx);
            notify_deadline(processor, guard);
        })
    }

    /// Give the vertex a deadline `ttl_secs` from now
    pub fn set_vertex_ttl(
        &self,
        processor: &EventProcessor,
        handle: EntityHandle,
        ttl_secs: u32,
    ) -> Result<Timestamp> {
        let tmx = self.inner.clock.now_seconds().saturating_add(ttl_secs);
        self.set_vertex_expiration(processor, handle, tmx)?;
        Ok(tmx)
    }

    /// Add an arc from `from` to `to`, expiring at `tmx`
    pub fn add_arc(
        &self,
        processor: &EventProcessor,
        from: EntityHandle,
        to: EntityHandle,
        tmx: Timestamp,
    ) -> Result<()> {
        if !self.contains(to) {
            return Err(GraphError::NotFound(to));
        }
        self.with_vertex(from, |guard| {
            guard.push_arc(Edge { target: to, tmx });
            if tmx != TIMESTAMP_NEVER {
                notify_deadline(processor, guard);
            }
        })
    }

    /// Remove every deadline from the vertex and its arcs
    pub fn clear_expiration(&self, processor: &EventProcessor, handle: EntityHandle) -> Result<()> {
        self.with_vertex(handle, |guard| {
            guard.clear_expiration();
            processor.remove_schedule(guard);
        })
    }

    /// Delete a vertex now, dropping it from the schedule first
    pub async fn delete_vertex(
        &self,
        processor: &EventProcessor,
        ctx: &ExecContext,
        handle: EntityHandle,
        timeout: Duration,
    ) -> Result<()> {
        let vertex = self
            .vertex(handle)
            .filter(|vertex| !vertex.is_defunct())
            .ok_or(GraphError::NotFound(handle))?;
        let held = processor
            .acquire(ctx, timeout)
            .await
            .ok_or(EventError::AcquireTimeout(timeout.as_millis() as u64))?;

        let mut guard = vertex
            .try_write()
            .map_err(|reason| GraphError::Access { handle, reason })?;
        processor.immediate_drop(&held, &mut guard);
        guard
            .delete()
            .map_err(|reason| GraphError::Access { handle, reason })
    }
}

/// Schedule the vertex for its earliest deadline, or release it if none
fn notify_deadline(processor: &EventProcessor, guard: &mut VertexWriteGuard<'_>) {
    let next = guard.expiration().next_deadline();
    if next != TIMESTAMP_NEVER || guard.is_event_scheduled() {
        processor.schedule_expiration(guard, next);
    }
}

impl EntityStore for MemGraph {
    fn resolve(&self, handle: EntityHandle) -> Option<Arc<dyn Entity>> {
        self.vertex(handle).map(|vertex| vertex as Arc<dyn Entity>)
    }

    fn incref(&self, handle: EntityHandle) {
        match self.vertex(handle) {
            Some(vertex) => {
                vertex.incref();
                self.inner.shares.increfs.fetch_add(1, Ordering::SeqCst);
            }
            None => warn!(component = "graph", handle = %handle, "Share requested for unknown vertex"),
        }
    }

    fn decref(&self, handle: EntityHandle) {
        self.inner.shares.decrefs.fetch_add(1, Ordering::SeqCst);
        match self.vertex(handle) {
            Some(vertex) => self.inner.release_share(&vertex),
            None => {
                self.inner.shares.underflows.fetch_add(1, Ordering::SeqCst);
                error!(component = "graph", handle = %handle, "Share released for freed vertex");
            }
        }
    }

    fn now_seconds(&self) -> Timestamp {
        self.inner.clock.now_seconds()
    }

    fn now_millis(&self) -> i64 {
        self.inner.clock.now_millis()
    }
}
