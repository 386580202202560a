//! Execution contexts
//!
//! Every task that touches the processor owns one [`ExecContext`]. Its id is
//! the owner identity used by the reentrant acquisition lock, so two calls
//! made with the same context nest while calls from different contexts
//! exclude each other.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one logical caller
#[derive(Debug)]
pub struct ExecContext {
    id: u64,
    label: String,
}

impl ExecContext {
    /// Create a context with a fresh owner id
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            label: label.into(),
        }
    }

    /// Owner id, never zero
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Human-readable label
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}
