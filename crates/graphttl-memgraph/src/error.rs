//! Error types for graphttl-memgraph

use graphttl_core::{AccessReason, EntityHandle};
use thiserror::Error;

/// Graph error type
#[derive(Debug, Error)]
pub enum GraphError {
    /// No live vertex with this handle
    #[error("vertex not found: {0}")]
    NotFound(EntityHandle),

    /// Vertex could not be locked or modified
    #[error("access to {handle} denied: {reason}")]
    Access {
        /// Vertex handle
        handle: EntityHandle,
        /// Failure reported by the store
        reason: AccessReason,
    },

    /// Scheduler could not be acquired in time
    #[error("scheduler error: {0}")]
    Scheduler(#[from] graphttl_core::EventError),
}

impl GraphError {
    /// Failure is worth retrying
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Access { reason, .. } => reason.is_transient(),
            Self::Scheduler(graphttl_core::EventError::AcquireTimeout(_)) => true,
            _ => false,
        }
    }
}

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;
