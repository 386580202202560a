//! Vertices, arcs and the per-vertex write guard

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError, Weak};
use tracing::debug;

use graphttl_core::{
    AccessReason, ComponentExpiry, EntityHandle, Entity, Expiration, Timestamp, WriteGuard,
    TIMESTAMP_NEVER,
};

use crate::graph::GraphInner;

/// Outgoing arc
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    /// Head vertex
    pub target: EntityHandle,
    /// Deadline, `TIMESTAMP_NEVER` for none
    pub tmx: Timestamp,
}

#[derive(Debug)]
pub(crate) struct VertexData {
    tmx: Timestamp,
    arcs: Vec<Edge>,
    event_scheduled: bool,
}

/// Graph vertex
#[derive(Debug)]
pub struct Vertex {
    handle: EntityHandle,
    name: String,
    /// Ownership shares; the graph itself holds one until deletion
    refcount: AtomicI64,
    defunct: AtomicBool,
    graph: Weak<GraphInner>,
    data: Mutex<VertexData>,
}

impl Vertex {
    pub(crate) fn new(handle: EntityHandle, name: String, graph: Weak<GraphInner>) -> Self {
        Self {
            handle,
            name,
            refcount: AtomicI64::new(1),
            defunct: AtomicBool::new(false),
            graph,
            data: Mutex::new(VertexData {
                tmx: TIMESTAMP_NEVER,
                arcs: Vec::new(),
                event_scheduled: false,
            }),
        }
    }

    /// Vertex name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ownership shares currently held
    #[must_use]
    pub fn refcount(&self) -> i64 {
        self.refcount.load(Ordering::SeqCst)
    }

    /// Add one share, returning the new count
    pub(crate) fn incref(&self) -> i64 {
        self.refcount.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Drop one share, returning the new count
    pub(crate) fn decref(&self) -> i64 {
        self.refcount.fetch_sub(1, Ordering::SeqCst) - 1
    }

    /// Vertex deadline
    #[must_use]
    pub fn tmx(&self) -> Timestamp {
        self.read().tmx
    }

    /// Snapshot of the outgoing arcs
    #[must_use]
    pub fn arcs(&self) -> Vec<Edge> {
        self.read().arcs.clone()
    }

    /// Scheduler holds a share of this vertex
    #[must_use]
    pub fn is_event_scheduled(&self) -> bool {
        self.read().event_scheduled
    }

    /// Blocking read of the vertex state
    fn read(&self) -> MutexGuard<'_, VertexData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Non-blocking write lock attempt
    pub fn try_write(&self) -> Result<VertexWriteGuard<'_>, AccessReason> {
        let graph = self.graph.upgrade().ok_or(AccessReason::NotFound)?;
        graph.check_access(self.handle)?;
        if self.is_defunct() {
            return Err(AccessReason::NotFound);
        }
        let data = match self.data.try_lock() {
            Ok(data) => data,
            Err(TryLockError::WouldBlock) => return Err(AccessReason::Locked),
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
        };
        Ok(VertexWriteGuard {
            vertex: self,
            graph,
            data,
        })
    }
}

impl Entity for Vertex {
    fn handle(&self) -> EntityHandle {
        self.handle
    }

    fn is_defunct(&self) -> bool {
        self.defunct.load(Ordering::SeqCst)
    }

    fn try_write_lock(&self) -> Result<Box<dyn WriteGuard + '_>, AccessReason> {
        Ok(Box::new(self.try_write()?))
    }

    fn release_scheduled(&self) -> bool {
        let released = std::mem::take(&mut self.read().event_scheduled);
        if released {
            debug!(handle = %self.handle, "Schedule share released at teardown");
        }
        released
    }
}

/// Exclusive access to one vertex
pub struct VertexWriteGuard<'a> {
    vertex: &'a Vertex,
    graph: Arc<GraphInner>,
    data: MutexGuard<'a, VertexData>,
}

impl VertexWriteGuard<'_> {
    /// Set the vertex deadline
    pub fn set_tmx(&mut self, tmx: Timestamp) {
        self.data.tmx = tmx;
    }

    /// Add an outgoing arc
    pub fn push_arc(&mut self, edge: Edge) {
        self.data.arcs.push(edge);
    }

    /// Number of outgoing arcs
    #[must_use]
    pub fn arc_count(&self) -> usize {
        self.data.arcs.len()
    }

    fn earliest_arc(&self) -> Timestamp {
        self.data
            .arcs
            .iter()
            .map(|edge| edge.tmx)
            .min()
            .unwrap_or(TIMESTAMP_NEVER)
    }
}

impl WriteGuard for VertexWriteGuard<'_> {
    fn handle(&self) -> EntityHandle {
        self.vertex.handle
    }

    fn is_event_scheduled(&self) -> bool {
        self.data.event_scheduled
    }

    fn set_event_scheduled(&mut self, scheduled: bool) {
        self.data.event_scheduled = scheduled;
    }

    fn expiration(&self) -> Expiration {
        Expiration {
            entity_ts: self.data.tmx,
            component_ts: self.earliest_arc(),
        }
    }

    fn clear_expiration(&mut self) {
        self.data.tmx = TIMESTAMP_NEVER;
        for edge in &mut self.data.arcs {
            edge.tmx = TIMESTAMP_NEVER;
        }
    }

    fn delete(&mut self) -> Result<(), AccessReason> {
        if self.vertex.defunct.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.data.arcs.clear();
        self.data.tmx = TIMESTAMP_NEVER;
        self.graph.release_share(self.vertex);
        debug!(component = "graph", handle = %self.vertex.handle, name = %self.vertex.name, "Vertex deleted");
        Ok(())
    }

    fn expire_components(&mut self, now: Timestamp) -> Result<ComponentExpiry, AccessReason> {
        let before = self.data.arcs.len();
        self.data
            .arcs
            .retain(|edge| edge.tmx == TIMESTAMP_NEVER || edge.tmx > now);
        let removed = before - self.data.arcs.len();
        if removed > 0 {
            debug!(component = "graph", handle = %self.vertex.handle, removed, "Arcs expired");
        }
        Ok(ComponentExpiry {
            removed,
            next_component_ts: self.earliest_arc(),
        })
    }
}

#[cfg(test)]
mod tests;
