//! Schedulable events
//!
//! An [`Event`] pairs an entity handle with a deadline and the kind of work
//! to perform once the deadline passes. Events are plain values; the same
//! handle may appear in several places at once and every execution is
//! re-validated against the entity's live state.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Deadline in graph-relative seconds
pub type Timestamp = u32;

/// Sentinel for "no deadline"
pub const TIMESTAMP_NEVER: Timestamp = u32::MAX;

/// Earliest representable deadline
pub const TIMESTAMP_MIN: Timestamp = 0;

/// Opaque, stable reference to an entity owned by the storage layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityHandle(pub u64);

impl EntityHandle {
    /// Raw handle value
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:016x}", self.0)
    }
}

/// What to do when an event comes due
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Expire the entity or its time-bound components
    Expiration,
    /// Remove every scheduled entry for the entity
    RemoveSchedule,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expiration => write!(f, "expiration"),
            Self::RemoveSchedule => write!(f, "remove_schedule"),
        }
    }
}

/// Value stored against a handle in a schedule tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventValue {
    /// Execution deadline
    pub exec_ts: Timestamp,
    /// Event kind
    pub kind: EventKind,
    /// Small auxiliary payload carried through unchanged
    pub metadata: u16,
}

/// The atomic schedulable unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// Target entity
    pub handle: EntityHandle,
    /// Execution deadline
    pub exec_ts: Timestamp,
    /// Event kind
    pub kind: EventKind,
    /// Small auxiliary payload carried through unchanged
    pub metadata: u16,
}

impl Event {
    /// Expiration event for `handle` due at `exec_ts`
    #[must_use]
    pub fn expiration(handle: EntityHandle, exec_ts: Timestamp) -> Self {
        Self {
            handle,
            exec_ts,
            kind: EventKind::Expiration,
            metadata: 0,
        }
    }

    /// Removal event for `handle`
    #[must_use]
    pub fn remove_schedule(handle: EntityHandle) -> Self {
        Self {
            handle,
            exec_ts: TIMESTAMP_NEVER,
            kind: EventKind::RemoveSchedule,
            metadata: 0,
        }
    }

    /// Rebuild an event from a tier entry
    #[must_use]
    pub fn from_entry(handle: EntityHandle, value: EventValue) -> Self {
        Self {
            handle,
            exec_ts: value.exec_ts,
            kind: value.kind,
            metadata: value.metadata,
        }
    }

    /// Tier entry for this event
    #[must_use]
    pub fn value(&self) -> EventValue {
        EventValue {
            exec_ts: self.exec_ts,
            kind: self.kind,
            metadata: self.metadata,
        }
    }

    /// Whether the deadline has passed at `now`
    #[must_use]
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.exec_ts <= now
    }
}

// Heap order is by deadline only; ties fall back to the handle so the
// ordering stays total.
impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.exec_ts
            .cmp(&other.exec_ts)
            .then_with(|| self.handle.cmp(&other.handle))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Convert a millisecond instant to whole seconds, saturating at the
/// representable range.
#[must_use]
pub fn millis_to_timestamp(ms: i64) -> Timestamp {
    if ms <= 0 {
        return TIMESTAMP_MIN;
    }
    u32::try_from(ms / 1000).unwrap_or(TIMESTAMP_NEVER - 1)
}
