//! Graph clock

use chrono::Utc;
use graphttl_core::{millis_to_timestamp, Timestamp};
use std::sync::atomic::{AtomicI64, Ordering};

/// Wall clock with an adjustable offset, or a manual clock for tests
#[derive(Debug)]
pub enum Clock {
    /// UTC wall time plus an offset
    System {
        /// Milliseconds added to the wall time
        offset_ms: AtomicI64,
    },
    /// Time moves only through [`Clock::advance`]
    Manual {
        /// Current time in milliseconds
        now_ms: AtomicI64,
    },
}

impl Clock {
    /// Wall clock
    #[must_use]
    pub fn system() -> Self {
        Self::System {
            offset_ms: AtomicI64::new(0),
        }
    }

    /// Manual clock starting at `start_ms`
    #[must_use]
    pub fn manual(start_ms: i64) -> Self {
        Self::Manual {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    /// Current time in milliseconds
    pub fn now_millis(&self) -> i64 {
        match self {
            Self::System { offset_ms } => {
                Utc::now().timestamp_millis() + offset_ms.load(Ordering::SeqCst)
            }
            Self::Manual { now_ms } => now_ms.load(Ordering::SeqCst),
        }
    }

    /// Current time in seconds
    pub fn now_seconds(&self) -> Timestamp {
        millis_to_timestamp(self.now_millis())
    }

    /// Move the clock forward by `ms`
    pub fn advance(&self, ms: i64) {
        match self {
            Self::System { offset_ms } => offset_ms.fetch_add(ms, Ordering::SeqCst),
            Self::Manual { now_ms } => now_ms.fetch_add(ms, Ordering::SeqCst),
        };
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}
