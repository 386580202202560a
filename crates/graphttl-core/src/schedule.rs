//! Processor-owned schedule state
//!
//! Three tiers plus the monitor's private queues and the executor handle.
//! Everything here is mutated only while the processor is acquired.

use std::collections::VecDeque;

use crate::config::SchedulerConfig;
use crate::event::{millis_to_timestamp, EntityHandle, Event, EventKind, Timestamp};
use crate::executor::ExecutorJob;
use crate::queue::InputQueue;
use crate::tier::{ScheduleTier, TierKind};

/// Deadlines separating the stages at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cutoffs {
    /// Below this, events go to the executor
    pub executor: Timestamp,
    /// Below this, events go to the short tier
    pub short: Timestamp,
    /// Below this, events go to the medium tier
    pub medium: Timestamp,
}

impl Cutoffs {
    pub(crate) fn at(now_ms: i64, config: &SchedulerConfig) -> Self {
        let offset = |ms: u64| millis_to_timestamp(now_ms.saturating_add(i64::try_from(ms).unwrap_or(i64::MAX)));
        Self {
            executor: offset(config.executor.insertion_threshold_ms),
            short: offset(config.short_horizon_ms()),
            medium: offset(config.medium_horizon_ms()),
        }
    }
}

/// Counts from one drain of the monitor queue
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScheduleReport {
    pub imminent: usize,
    pub short: usize,
    pub medium: usize,
    pub long: usize,
    pub removed: usize,
}

impl ScheduleReport {
    pub(crate) fn total(&self) -> usize {
        self.imminent + self.short + self.medium + self.long + self.removed
    }
}

#[derive(Debug)]
pub(crate) struct Schedule {
    pub long: ScheduleTier,
    pub medium: ScheduleTier,
    pub short: ScheduleTier,
    /// Private copy of the public input, swapped in each schedule pass
    pub monitor_queue: VecDeque<Event>,
    /// Events due within the executor horizon, waiting for hand-off
    pub exec_queue: VecDeque<Event>,
    pub executor: Option<ExecutorJob>,
}

impl Schedule {
    pub(crate) fn new(config: &SchedulerConfig) -> Self {
        Self {
            long: ScheduleTier::new(TierKind::Long, config.long.map_order),
            medium: ScheduleTier::new(TierKind::Medium, config.medium.map_order),
            short: ScheduleTier::new(TierKind::Short, config.short.map_order),
            monitor_queue: VecDeque::new(),
            exec_queue: VecDeque::new(),
            executor: None,
        }
    }

    pub(crate) fn tier(&self, kind: TierKind) -> &ScheduleTier {
        match kind {
            TierKind::Long => &self.long,
            TierKind::Medium => &self.medium,
            TierKind::Short => &self.short,
        }
    }

    fn tier_mut(&mut self, kind: TierKind) -> &mut ScheduleTier {
        match kind {
            TierKind::Long => &mut self.long,
            TierKind::Medium => &mut self.medium,
            TierKind::Short => &mut self.short,
        }
    }

    /// Swap the public input into the monitor queue
    pub(crate) fn absorb_input(&mut self, input: &InputQueue) -> usize {
        input.transfer_into(&mut self.monitor_queue)
    }

    /// Place one expiration event by deadline
    pub(crate) fn route(&mut self, event: Event, cutoffs: &Cutoffs, report: &mut ScheduleReport) {
        if event.exec_ts < cutoffs.executor {
            self.exec_queue.push_back(event);
            report.imminent += 1;
        } else if event.exec_ts < cutoffs.short {
            self.short.set(event);
            report.short += 1;
        } else if event.exec_ts < cutoffs.medium {
            self.medium.set(event);
            report.medium += 1;
        } else {
            self.long.set(event);
            report.long += 1;
        }
    }

    /// Drain the monitor queue into the tiers and the executor queue
    pub(crate) fn schedule_events(&mut self, cutoffs: &Cutoffs) -> ScheduleReport {
        let mut report = ScheduleReport::default();
        while let Some(event) = self.monitor_queue.pop_front() {
            match event.kind {
                EventKind::RemoveSchedule => {
                    report.removed += self.remove_everywhere(event.handle);
                }
                EventKind::Expiration => self.route(event, cutoffs, &mut report),
            }
        }
        report
    }

    /// Delete `handle` from every tier
    pub(crate) fn remove_everywhere(&mut self, handle: EntityHandle) -> usize {
        [TierKind::Long, TierKind::Medium, TierKind::Short]
            .into_iter()
            .filter(|kind| self.tier_mut(*kind).remove(handle).is_some())
            .count()
    }

    /// Tiers holding an entry for `handle`
    pub(crate) fn occurrences(&self, handle: EntityHandle) -> usize {
        [&self.long, &self.medium, &self.short]
            .into_iter()
            .filter(|tier| tier.contains(handle))
            .count()
    }

    /// Move entries of one partition that fall below `cutoff` into the next
    /// tier, keeping any entry already present there.
    pub(crate) fn migrate_partition(&mut self, from: TierKind, partition: usize, cutoff: Timestamp) -> usize {
        let to = match from {
            TierKind::Long => TierKind::Medium,
            TierKind::Medium => TierKind::Short,
            TierKind::Short => return 0,
        };
        let due = self.tier_mut(from).extract_due(partition, cutoff);
        let moved = due.len();
        let dest = self.tier_mut(to);
        for event in due {
            dest.ensure(event);
        }
        moved
    }

    /// Migrate every partition, long tier first
    pub(crate) fn full_migration(&mut self, cutoffs: &Cutoffs) -> usize {
        let mut moved = 0;
        for partition in 0..self.long.partition_count() {
            moved += self.migrate_partition(TierKind::Long, partition, cutoffs.medium);
        }
        for partition in 0..self.medium.partition_count() {
            moved += self.migrate_partition(TierKind::Medium, partition, cutoffs.short);
        }
        moved
    }

    /// Move due entries of one short-tier partition to the executor queue
    pub(crate) fn collect_due(&mut self, partition: usize, cutoff: Timestamp) -> usize {
        let due = self.short.extract_due(partition, cutoff);
        let n = due.len();
        self.exec_queue.extend(due);
        n
    }

    /// Hand the executor queue to the executor, spawning one if needed.
    ///
    /// Events stay queued if the current executor has stopped accepting
    /// input; the monitor reaps it on this tick.
    pub(crate) fn dispatch(&mut self, spawn: impl FnOnce() -> ExecutorJob) -> usize {
        if self.exec_queue.is_empty() {
            return 0;
        }
        let n = self.exec_queue.len();
        let job = self.executor.get_or_insert_with(spawn);
        if job.transfer(&mut self.exec_queue) {
            n
        } else {
            0
        }
    }

    /// Return executor-bound events to the short tier
    pub(crate) fn reschedule_imminent(&mut self) -> usize {
        let n = self.exec_queue.len();
        for event in self.exec_queue.drain(..) {
            self.short.set_earliest(event);
        }
        n
    }

    /// Recover events returned by a cancelled executor
    pub(crate) fn recover(&mut self, residue: VecDeque<Event>) -> usize {
        self.exec_queue.extend(residue);
        self.reschedule_imminent()
    }

    /// Remove every event held anywhere in the schedule
    pub(crate) fn drain_all(&mut self) -> Vec<Event> {
        let mut events = self.long.drain_all();
        events.extend(self.medium.drain_all());
        events.extend(self.short.drain_all());
        events.extend(self.monitor_queue.drain(..));
        events.extend(self.exec_queue.drain(..));
        events
    }
}
