//! Error types for the expiration scheduler

use serde::Serialize;
use std::fmt;

/// Scheduler error type
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// Processor has not been initialized or is being torn down
    #[error("event processor not ready")]
    NotReady,

    /// Processor was marked defunct
    #[error("event processor is defunct")]
    Defunct,

    /// Processor could not be acquired within the timing budget
    #[error("could not acquire event processor within {0}ms")]
    AcquireTimeout(u64),

    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Background task could not be started
    #[error("task start failed: {0}")]
    TaskStart(String),
}

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, EventError>;

/// Reason the storage layer refused access to an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AccessReason {
    /// Entity is write-locked by another context
    Locked,
    /// Lock acquisition timed out
    Timeout,
    /// A component (arc) of the entity could not be accessed
    ArcError,
    /// Writes are temporarily disallowed for this context
    ReadonlyDisallowed,
    /// The whole graph is readonly
    ReadonlyGraph,
    /// The graph is transitioning to readonly
    ReadonlyPending,
    /// Entity does not exist
    NotFound,
    /// Unclassified failure
    Error,
}

/// How the executor treats a failed execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retry one second later
    Transient,
    /// Park the event and stop the executor
    ReadonlyShutdown,
    /// Park the event and keep going
    Permanent,
}

impl AccessReason {
    /// Failure class used to route a failed execution
    #[must_use]
    pub fn classify(self) -> FailureClass {
        match self {
            Self::Locked | Self::Timeout | Self::ArcError | Self::ReadonlyDisallowed => {
                FailureClass::Transient
            }
            Self::ReadonlyGraph | Self::ReadonlyPending => FailureClass::ReadonlyShutdown,
            Self::NotFound | Self::Error => FailureClass::Permanent,
        }
    }

    /// Check if the failure is worth retrying
    #[must_use]
    pub fn is_transient(self) -> bool {
        self.classify() == FailureClass::Transient
    }
}

impl fmt::Display for AccessReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Locked => "locked",
            Self::Timeout => "timeout",
            Self::ArcError => "arc error",
            Self::ReadonlyDisallowed => "readonly disallowed",
            Self::ReadonlyGraph => "readonly graph",
            Self::ReadonlyPending => "readonly pending",
            Self::NotFound => "not found",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

impl std::error::Error for AccessReason {}
