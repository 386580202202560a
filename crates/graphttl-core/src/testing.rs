//! In-crate fake store for unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use crate::error::AccessReason;
use crate::event::{EntityHandle, Timestamp, TIMESTAMP_NEVER};
use crate::queue::lock;
use crate::store::{ComponentExpiry, Entity, EntityStore, Expiration, WriteGuard};

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeState {
    pub scheduled: bool,
    pub entity_ts: Timestamp,
    pub components: Vec<Timestamp>,
    pub deleted: bool,
}

#[derive(Debug)]
pub(crate) struct FakeEntity {
    handle: EntityHandle,
    defunct: AtomicBool,
    fail_with: Mutex<Option<AccessReason>>,
    state: Mutex<FakeState>,
}

impl FakeEntity {
    pub fn state(&self) -> FakeState {
        lock(&self.state).clone()
    }

    pub fn fail_with(&self, reason: Option<AccessReason>) {
        *lock(&self.fail_with) = reason;
    }

    pub fn hold_lock(&self) -> MutexGuard<'_, FakeState> {
        lock(&self.state)
    }
}

impl Entity for FakeEntity {
    fn handle(&self) -> EntityHandle {
        self.handle
    }

    fn is_defunct(&self) -> bool {
        self.defunct.load(Ordering::SeqCst)
    }

    fn try_write_lock(&self) -> Result<Box<dyn WriteGuard + '_>, AccessReason> {
        if let Some(reason) = *lock(&self.fail_with) {
            return Err(reason);
        }
        let state = match self.state.try_lock() {
            Ok(state) => state,
            Err(TryLockError::WouldBlock) => return Err(AccessReason::Locked),
            Err(TryLockError::Poisoned(_)) => return Err(AccessReason::Error),
        };
        Ok(Box::new(FakeGuard {
            handle: self.handle,
            defunct: &self.defunct,
            state,
        }))
    }

    fn release_scheduled(&self) -> bool {
        std::mem::take(&mut lock(&self.state).scheduled)
    }
}

pub(crate) struct FakeGuard<'a> {
    handle: EntityHandle,
    defunct: &'a AtomicBool,
    state: MutexGuard<'a, FakeState>,
}

impl WriteGuard for FakeGuard<'_> {
    fn handle(&self) -> EntityHandle {
        self.handle
    }

    fn is_event_scheduled(&self) -> bool {
        self.state.scheduled
    }

    fn set_event_scheduled(&mut self, scheduled: bool) {
        self.state.scheduled = scheduled;
    }

    fn expiration(&self) -> Expiration {
        Expiration {
            entity_ts: self.state.entity_ts,
            component_ts: self
                .state
                .components
                .iter()
                .copied()
                .min()
                .unwrap_or(TIMESTAMP_NEVER),
        }
    }

    fn clear_expiration(&mut self) {
        self.state.entity_ts = TIMESTAMP_NEVER;
        self.state.components.clear();
    }

    fn delete(&mut self) -> Result<(), AccessReason> {
        self.state.deleted = true;
        self.defunct.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn expire_components(&mut self, now: Timestamp) -> Result<ComponentExpiry, AccessReason> {
        let before = self.state.components.len();
        self.state.components.retain(|ts| *ts > now);
        Ok(ComponentExpiry {
            removed: before - self.state.components.len(),
            next_component_ts: self
                .state
                .components
                .iter()
                .copied()
                .min()
                .unwrap_or(TIMESTAMP_NEVER),
        })
    }
}

#[derive(Debug)]
pub(crate) struct FakeStore {
    entities: Mutex<HashMap<EntityHandle, Arc<FakeEntity>>>,
    shares: Mutex<HashMap<EntityHandle, i64>>,
    now_ms: AtomicI64,
}

impl FakeStore {
    pub fn new(now_secs: Timestamp) -> Arc<Self> {
        Arc::new(Self {
            entities: Mutex::new(HashMap::new()),
            shares: Mutex::new(HashMap::new()),
            now_ms: AtomicI64::new(i64::from(now_secs) * 1000),
        })
    }

    pub fn add(&self, id: u64, entity_ts: Timestamp, components: Vec<Timestamp>) -> Arc<FakeEntity> {
        let handle = EntityHandle(id);
        let entity = Arc::new(FakeEntity {
            handle,
            defunct: AtomicBool::new(false),
            fail_with: Mutex::new(None),
            state: Mutex::new(FakeState {
                scheduled: false,
                entity_ts,
                components,
                deleted: false,
            }),
        });
        lock(&self.entities).insert(handle, Arc::clone(&entity));
        entity
    }

    /// Add an entity the scheduler already holds a share of
    pub fn add_scheduled(&self, id: u64, entity_ts: Timestamp, components: Vec<Timestamp>) -> Arc<FakeEntity> {
        let entity = self.add(id, entity_ts, components);
        lock(&entity.state).scheduled = true;
        self.incref(EntityHandle(id));
        entity
    }

    pub fn forget(&self, id: u64) {
        lock(&self.entities).remove(&EntityHandle(id));
    }

    pub fn shares(&self, id: u64) -> i64 {
        lock(&self.shares).get(&EntityHandle(id)).copied().unwrap_or(0)
    }

    pub fn set_now(&self, secs: Timestamp) {
        self.now_ms.store(i64::from(secs) * 1000, Ordering::SeqCst);
    }
}

impl EntityStore for FakeStore {
    fn resolve(&self, handle: EntityHandle) -> Option<Arc<dyn Entity>> {
        lock(&self.entities)
            .get(&handle)
            .map(|entity| Arc::clone(entity) as Arc<dyn Entity>)
    }

    fn incref(&self, handle: EntityHandle) {
        *lock(&self.shares).entry(handle).or_insert(0) += 1;
    }

    fn decref(&self, handle: EntityHandle) {
        *lock(&self.shares).entry(handle).or_insert(0) -= 1;
    }

    fn now_seconds(&self) -> Timestamp {
        (self.now_ms.load(Ordering::SeqCst) / 1000) as Timestamp
    }

    fn now_millis(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

pub(crate) fn processor(
    store: &Arc<FakeStore>,
    config: crate::config::SchedulerConfig,
    run_daemon: bool,
) -> Arc<crate::processor::EventProcessor> {
    crate::processor::EventProcessor::initialize(Arc::clone(store) as Arc<dyn EntityStore>, config, run_daemon)
        .unwrap()
}

/// Lock `entity` and schedule it
pub(crate) fn schedule(processor: &crate::processor::EventProcessor, entity: &FakeEntity, at_ts: Timestamp) {
    let mut guard = entity.try_write_lock().unwrap();
    processor.schedule_expiration(guard.as_mut(), at_ts);
}
