//! Partitioned schedule tiers
//!
//! A tier maps entity handles to their pending event and splits the map into
//! `2^order` partitions so that maintenance can visit one partition at a
//! time.

use std::collections::HashMap;
use std::fmt;

use crate::event::{EntityHandle, Event, EventValue, Timestamp};

/// Tier identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TierKind {
    /// Farthest deadlines, unbounded horizon
    Long,
    /// Intermediate deadlines
    Medium,
    /// Nearest deadlines, feeds the executor
    Short,
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Medium => write!(f, "medium"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// Partitioned map from handle to scheduled event
#[derive(Debug)]
pub struct ScheduleTier {
    kind: TierKind,
    order: u8,
    partitions: Vec<HashMap<EntityHandle, EventValue>>,
}

impl ScheduleTier {
    /// Create an empty tier with `2^order` partitions
    #[must_use]
    pub fn new(kind: TierKind, order: u8) -> Self {
        let count = 1usize << order;
        Self {
            kind,
            order,
            partitions: (0..count).map(|_| HashMap::new()).collect(),
        }
    }

    /// Tier identity
    #[must_use]
    pub fn kind(&self) -> TierKind {
        self.kind
    }

    /// Number of partitions
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    fn partition_of(&self, handle: EntityHandle) -> usize {
        if self.order == 0 {
            return 0;
        }
        // Fibonacci hashing; the high bits are the best mixed.
        let mixed = handle.as_u64().wrapping_mul(0x9E37_79B9_7F4A_7C15);
        (mixed >> (64 - u32::from(self.order))) as usize
    }

    /// Insert or overwrite the entry for `event.handle`
    pub fn set(&mut self, event: Event) {
        let p = self.partition_of(event.handle);
        self.partitions[p].insert(event.handle, event.value());
    }

    /// Insert only if `event.handle` is absent. Returns whether it was inserted.
    pub fn ensure(&mut self, event: Event) -> bool {
        let p = self.partition_of(event.handle);
        match self.partitions[p].entry(event.handle) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(event.value());
                true
            }
        }
    }

    /// Insert if absent, or replace an entry with a later deadline
    pub fn set_earliest(&mut self, event: Event) {
        let p = self.partition_of(event.handle);
        self.partitions[p]
            .entry(event.handle)
            .and_modify(|value| {
                if event.exec_ts < value.exec_ts {
                    *value = event.value();
                }
            })
            .or_insert_with(|| event.value());
    }

    /// Remove the entry for `handle`
    pub fn remove(&mut self, handle: EntityHandle) -> Option<Event> {
        let p = self.partition_of(handle);
        self.partitions[p]
            .remove(&handle)
            .map(|value| Event::from_entry(handle, value))
    }

    /// Look up the entry for `handle`
    #[must_use]
    pub fn get(&self, handle: EntityHandle) -> Option<Event> {
        let p = self.partition_of(handle);
        self.partitions[p]
            .get(&handle)
            .map(|value| Event::from_entry(handle, *value))
    }

    /// Check if `handle` has an entry
    #[must_use]
    pub fn contains(&self, handle: EntityHandle) -> bool {
        let p = self.partition_of(handle);
        self.partitions[p].contains_key(&handle)
    }

    /// Total entries across partitions
    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions.iter().map(HashMap::len).sum()
    }

    /// Check if the tier is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partitions.iter().all(HashMap::is_empty)
    }

    /// Entries in one partition
    #[must_use]
    pub fn partition_len(&self, partition: usize) -> usize {
        self.partitions
            .get(partition % self.partitions.len())
            .map_or(0, HashMap::len)
    }

    /// Remove every entry in `partition` with a deadline before `cutoff`,
    /// then compact the partition.
    pub fn extract_due(&mut self, partition: usize, cutoff: Timestamp) -> Vec<Event> {
        let index = partition % self.partitions.len();
        let map = &mut self.partitions[index];

        let due: Vec<Event> = map
            .iter()
            .filter(|(_, value)| value.exec_ts < cutoff)
            .map(|(handle, value)| Event::from_entry(*handle, *value))
            .collect();
        for event in &due {
            map.remove(&event.handle);
        }

        if !due.is_empty() {
            compact(map);
        }
        due
    }

    /// Remove and return every entry
    pub fn drain_all(&mut self) -> Vec<Event> {
        let mut events = Vec::with_capacity(self.len());
        for map in &mut self.partitions {
            events.extend(
                map.drain()
                    .map(|(handle, value)| Event::from_entry(handle, value)),
            );
            map.shrink_to_fit();
        }
        events
    }

    /// Iterate over every entry
    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.partitions.iter().flat_map(|map| {
            map.iter()
                .map(|(handle, value)| Event::from_entry(*handle, *value))
        })
    }
}

/// Release excess capacity once a partition has shrunk well below it
fn compact(map: &mut HashMap<EntityHandle, EventValue>) {
    if map.capacity() > 64 && map.len() < map.capacity() / 4 {
        map.shrink_to_fit();
    }
}
