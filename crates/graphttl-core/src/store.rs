//! Storage capability interface
//!
//! The scheduler never owns entities. It reaches them through an injected
//! [`EntityStore`] that resolves handles, transfers ownership shares and
//! provides the graph clock, and through the per-entity [`WriteGuard`]
//! returned by a non-blocking lock attempt.

use std::sync::Arc;

use crate::error::AccessReason;
use crate::event::{EntityHandle, Timestamp, TIMESTAMP_NEVER};

/// Handle resolution, reference counting and clock
#[cfg_attr(test, mockall::automock)]
pub trait EntityStore: Send + Sync {
    /// Translate a handle to a live entity, `None` if stale or freed
    fn resolve(&self, handle: EntityHandle) -> Option<Arc<dyn Entity>>;

    /// Grant one ownership share to the caller
    fn incref(&self, handle: EntityHandle);

    /// Release one ownership share held by the caller
    fn decref(&self, handle: EntityHandle);

    /// Graph-relative clock in seconds
    fn now_seconds(&self) -> Timestamp;

    /// Graph-relative clock in milliseconds
    fn now_millis(&self) -> i64;
}

/// A resolved entity
pub trait Entity: Send + Sync {
    /// Stable handle of this entity
    fn handle(&self) -> EntityHandle;

    /// Entity has reached a terminal state and must not be touched
    fn is_defunct(&self) -> bool;

    /// Non-blocking write lock attempt
    fn try_write_lock(&self) -> Result<Box<dyn WriteGuard + '_>, AccessReason>;

    /// Clear the scheduled flag regardless of graph mode or write gate.
    ///
    /// Returns whether the flag was set, in which case the caller owes
    /// exactly one `decref`. Only used at teardown.
    fn release_scheduled(&self) -> bool;
}

/// Expiration deadlines read from a locked entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiration {
    /// Deadline of the entity itself
    pub entity_ts: Timestamp,
    /// Earliest deadline among the entity's time-bound components
    pub component_ts: Timestamp,
}

impl Expiration {
    /// No deadline on the entity or any component
    pub const NEVER: Self = Self {
        entity_ts: TIMESTAMP_NEVER,
        component_ts: TIMESTAMP_NEVER,
    };

    /// Earliest deadline of either kind
    #[must_use]
    pub fn next_deadline(&self) -> Timestamp {
        self.entity_ts.min(self.component_ts)
    }

    /// Entity itself is expired at `now`
    #[must_use]
    pub fn is_entity_expired(&self, now: Timestamp) -> bool {
        self.entity_ts != TIMESTAMP_NEVER && self.entity_ts <= now
    }

    /// Some component is expired at `now`
    #[must_use]
    pub fn are_components_expired(&self, now: Timestamp) -> bool {
        self.component_ts != TIMESTAMP_NEVER && self.component_ts <= now
    }
}

/// Result of expiring an entity's components
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentExpiry {
    /// Components removed
    pub removed: usize,
    /// Earliest deadline among the remaining components
    pub next_component_ts: Timestamp,
}

/// Exclusive access to one entity, released on drop
#[cfg_attr(test, mockall::automock)]
pub trait WriteGuard {
    /// Handle of the locked entity
    fn handle(&self) -> EntityHandle;

    /// Scheduler currently holds an ownership share of this entity
    fn is_event_scheduled(&self) -> bool;

    /// Mark whether the scheduler holds an ownership share
    fn set_event_scheduled(&mut self, scheduled: bool);

    /// Current deadlines
    fn expiration(&self) -> Expiration;

    /// Remove every deadline from the entity and its components
    fn clear_expiration(&mut self);

    /// Delete the entity from the graph
    fn delete(&mut self) -> Result<(), AccessReason>;

    /// Remove components whose deadline is at or before `now`
    fn expire_components(&mut self, now: Timestamp) -> Result<ComponentExpiry, AccessReason>;
}
