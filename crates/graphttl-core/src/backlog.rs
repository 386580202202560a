//! Backlog snapshot

use serde::Serialize;
use std::fmt;

/// Event counts at each stage, best effort
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacklogInfo {
    /// Processor name
    pub name: String,
    /// Events waiting in the public and monitor queues
    pub n_api: usize,
    /// Long tier entries
    pub n_long: usize,
    /// Medium tier entries
    pub n_medium: usize,
    /// Short tier entries
    pub n_short: usize,
    /// Events waiting for hand-off to the executor
    pub n_imminent: usize,
    /// Events held by the executor
    pub n_executor_current: usize,
    /// Events executed since start
    pub n_executor_done: u64,
    /// Fraction of executions that were on time
    pub on_time_rate: f64,
    /// Monitor task is alive
    pub running: bool,
    /// Monitor is suspended
    pub paused: bool,
    /// Tier counts were captured; false if the processor was busy
    pub filled: bool,
}

impl BacklogInfo {
    /// Events scheduled in the tiers
    #[must_use]
    pub fn n_scheduled(&self) -> usize {
        self.n_long + self.n_medium + self.n_short
    }

    fn status(&self) -> &'static str {
        match (self.running, self.paused) {
            (true, false) => "RUNNING",
            (true, true) => "PAUSED",
            (false, _) => "HALTED",
        }
    }
}

impl fmt::Display for BacklogInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event Processor Backlog({}): IN[ {} ] -> ", self.name, self.n_api)?;
        if self.filled {
            write!(
                f,
                "SCH[ {{L:{} M:{} S:{}}} -> X:{} ]",
                self.n_long, self.n_medium, self.n_short, self.n_imminent
            )?;
        } else {
            write!(f, "SCH[ *BUSY* ]")?;
        }
        let late_pct = (1.0 - self.on_time_rate) * 100.0;
        write!(
            f,
            " -> EXEC[ {} ({:.1}% late) ] <{}>",
            self.n_executor_current,
            late_pct,
            self.status()
        )
    }
}
