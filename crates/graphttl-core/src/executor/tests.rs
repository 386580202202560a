use super::*;
use crate::event::EntityHandle;
use crate::store::Entity;
use crate::testing::FakeStore;

fn ev(id: u64, ts: Timestamp) -> Event {
    Event::expiration(EntityHandle(id), ts)
}

#[test]
fn test_stale_handle_is_success() {
    let store = FakeStore::new(100);
    let input = InputQueue::new();

    let result = execute_event(store.as_ref(), &input, &ev(1, 90), 100);
    assert_eq!(result, Ok(Execution::Stale));
    assert_eq!(store.shares(1), 0);
}

#[test]
fn test_defunct_entity_is_success() {
    let store = FakeStore::new(100);
    let input = InputQueue::new();
    let entity = store.add_scheduled(1, 90, vec![]);
    {
        let mut guard = entity.try_write_lock().unwrap();
        guard.delete().unwrap();
    }

    let result = execute_event(store.as_ref(), &input, &ev(1, 90), 100);
    assert_eq!(result, Ok(Execution::Stale));
}

#[test]
fn test_expired_entity_is_deleted() {
    let store = FakeStore::new(100);
    let input = InputQueue::new();
    let entity = store.add_scheduled(1, 95, vec![]);

    let result = execute_event(store.as_ref(), &input, &ev(1, 95), 100);
    assert_eq!(result, Ok(Execution::Deleted));

    let state = entity.state();
    assert!(state.deleted);
    assert!(!state.scheduled);
    assert_eq!(store.shares(1), 0);
    assert!(input.is_empty());
}

#[test]
fn test_premature_event_is_rescheduled() {
    let store = FakeStore::new(100);
    let input = InputQueue::new();
    let entity = store.add_scheduled(1, 150, vec![]);

    // Event claims an earlier deadline than the entity carries
    let result = execute_event(store.as_ref(), &input, &ev(1, 99), 100);
    assert_eq!(result, Ok(Execution::Rescheduled(150)));

    assert!(!entity.state().deleted);
    assert!(entity.state().scheduled);
    assert_eq!(store.shares(1), 1);
    assert_eq!(input.drain().pop_front(), Some(ev(1, 150)));
}

#[test]
fn test_expired_components_are_removed() {
    let store = FakeStore::new(100);
    let input = InputQueue::new();
    let entity = store.add_scheduled(1, 500, vec![90, 100, 200]);

    let result = execute_event(store.as_ref(), &input, &ev(1, 90), 100);
    assert_eq!(
        result,
        Ok(Execution::ComponentsExpired {
            removed: 2,
            next: 200
        })
    );
    assert_eq!(entity.state().components, vec![200]);
    assert_eq!(input.drain().pop_front(), Some(ev(1, 200)));
    assert_eq!(store.shares(1), 1);
}

#[test]
fn test_last_component_expiry_releases_share() {
    let store = FakeStore::new(100);
    let input = InputQueue::new();
    let entity = store.add_scheduled(1, TIMESTAMP_NEVER, vec![100]);

    let result = execute_event(store.as_ref(), &input, &ev(1, 100), 100);
    assert_eq!(result, Ok(Execution::Released));
    assert!(!entity.state().scheduled);
    assert!(entity.state().components.is_empty());
    assert_eq!(store.shares(1), 0);
    assert!(input.is_empty());
}

#[test]
fn test_entity_without_deadline_releases_share() {
    let store = FakeStore::new(100);
    let input = InputQueue::new();
    store.add_scheduled(1, TIMESTAMP_NEVER, vec![]);

    let result = execute_event(store.as_ref(), &input, &ev(1, 0), 100);
    assert_eq!(result, Ok(Execution::Released));
    assert_eq!(store.shares(1), 0);
}

#[test]
fn test_unscheduled_entity_is_left_alone() {
    let store = FakeStore::new(100);
    let input = InputQueue::new();
    let entity = store.add(1, 50, vec![]);

    let result = execute_event(store.as_ref(), &input, &ev(1, 50), 100);
    assert_eq!(result, Ok(Execution::Unscheduled));
    assert!(!entity.state().deleted);
}

#[test]
fn test_locked_entity_reports_reason() {
    let store = FakeStore::new(100);
    let input = InputQueue::new();
    let entity = store.add_scheduled(1, 50, vec![]);

    let _held = entity.hold_lock();
    let result = execute_event(store.as_ref(), &input, &ev(1, 50), 100);
    assert_eq!(result, Err(AccessReason::Locked));
}

#[test]
fn test_removal_event_is_rejected() {
    let store = FakeStore::new(100);
    let input = InputQueue::new();
    store.add_scheduled(1, 50, vec![]);

    let result = execute_event(store.as_ref(), &input, &Event::remove_schedule(EntityHandle(1)), 100);
    assert_eq!(result, Ok(Execution::Rejected));
    assert_eq!(store.shares(1), 0);
}

#[test]
fn test_batch_routes_failures() {
    let store = FakeStore::new(100);
    let input = InputQueue::new();
    store.add_scheduled(1, 90, vec![]);
    store
        .add_scheduled(2, 90, vec![])
        .fail_with(Some(AccessReason::Timeout));
    store
        .add_scheduled(3, 90, vec![])
        .fail_with(Some(AccessReason::Error));

    let report = execute_batch(store.as_ref(), &input, &[ev(1, 90), ev(2, 90), ev(3, 90)], 100, 30);

    assert_eq!(report.executed, 1);
    assert_eq!(report.on_time, 1);
    assert_eq!(report.transient, vec![ev(2, 91)]);
    assert_eq!(report.failed, vec![ev(3, 90)]);
    assert!(!report.readonly);
}

#[test]
fn test_batch_counts_late_executions() {
    let store = FakeStore::new(200);
    let input = InputQueue::new();
    store.add_scheduled(1, 100, vec![]);

    let report = execute_batch(store.as_ref(), &input, &[ev(1, 100)], 200, 30);
    assert_eq!(report.executed, 1);
    assert_eq!(report.on_time, 0);
}

#[test]
fn test_readonly_graph_flags_report() {
    let store = FakeStore::new(100);
    let input = InputQueue::new();
    store
        .add_scheduled(1, 90, vec![])
        .fail_with(Some(AccessReason::ReadonlyGraph));

    let report = execute_batch(store.as_ref(), &input, &[ev(1, 90)], 100, 30);
    assert!(report.readonly);
    assert_eq!(report.failed.len(), 1);
}

#[test]
fn test_next_delay() {
    assert_eq!(next_delay(false, 5, false, false), Duration::from_millis(5));
    assert_eq!(next_delay(false, 0, true, true), SHORT_DELAY);
    assert_eq!(next_delay(false, 0, false, true), IDLE_DELAY);
    assert_eq!(next_delay(false, 0, false, false), SHORT_DELAY);
    assert_eq!(next_delay(true, 3, false, false), SHORT_DELAY);
    assert_eq!(next_delay(true, 0, false, false), Duration::ZERO);
}

fn spawn_job(store: &Arc<FakeStore>, input: &Arc<InputQueue>, config: ExecutorConfig) -> (ExecutorJob, Arc<ExecutorStats>) {
    let stats = Arc::new(ExecutorStats::default());
    let job = ExecutorJob::spawn(
        Arc::clone(store) as Arc<dyn EntityStore>,
        Arc::clone(input),
        Arc::clone(&stats),
        config,
    );
    (job, stats)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_job_executes_due_events_and_returns_the_rest() {
    let store = FakeStore::new(100);
    let input = Arc::new(InputQueue::new());
    for id in 0..10 {
        store.add_scheduled(id, 100, vec![]);
    }
    store.add_scheduled(99, 5_000, vec![]);

    let (job, stats) = spawn_job(&store, &input, ExecutorConfig::default());
    let mut events: VecDeque<Event> = (0..10).map(|id| ev(id, 100)).collect();
    events.push_back(ev(99, 5_000));
    assert!(job.transfer(&mut events));
    assert!(events.is_empty());

    for _ in 0..100 {
        if stats.executed() == 10 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(stats.executed(), 10);
    assert_eq!(stats.on_time_rate(), 1.0);

    let residue = job.cancel(Duration::from_secs(2)).await;
    assert_eq!(residue, VecDeque::from([ev(99, 5_000)]));
    for id in 0..10 {
        assert_eq!(store.shares(id), 0);
    }
    assert_eq!(store.shares(99), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_job_retries_transient_failures() {
    let store = FakeStore::new(100);
    let input = Arc::new(InputQueue::new());
    let entity = store.add_scheduled(1, 90, vec![]);
    entity.fail_with(Some(AccessReason::Locked));

    let (job, stats) = spawn_job(&store, &input, ExecutorConfig::default());
    assert!(job.transfer(&mut VecDeque::from([ev(1, 90)])));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(stats.executed(), 0);
    assert!(job.backlog() >= 1);

    entity.fail_with(None);
    for _ in 0..100 {
        if stats.executed() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(stats.executed(), 1);
    assert!(entity.state().deleted);

    let residue = job.cancel(Duration::from_secs(2)).await;
    assert!(residue.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_job_stops_on_readonly_graph() {
    let store = FakeStore::new(100);
    let input = Arc::new(InputQueue::new());
    store
        .add_scheduled(1, 90, vec![])
        .fail_with(Some(AccessReason::ReadonlyPending));

    let (job, _stats) = spawn_job(&store, &input, ExecutorConfig::default());
    assert!(job.transfer(&mut VecDeque::from([ev(1, 90)])));

    for _ in 0..100 {
        if job.is_dead() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(job.is_dead());

    // A stopped executor refuses new input
    let mut late = VecDeque::from([ev(2, 95)]);
    assert!(!job.transfer(&mut late));
    assert_eq!(late.len(), 1);

    let residue = job.cancel(Duration::from_secs(1)).await;
    assert_eq!(residue, VecDeque::from([ev(1, 90)]));
    assert_eq!(store.shares(1), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_job_exits_when_idle() {
    let store = FakeStore::new(100);
    let input = Arc::new(InputQueue::new());
    let config = ExecutorConfig {
        idle_timeout_ms: 50,
        ..ExecutorConfig::default()
    };

    let (job, _stats) = spawn_job(&store, &input, config);
    for _ in 0..100 {
        if job.is_dead() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(job.is_dead());
    assert!(job.cancel(Duration::from_millis(100)).await.is_empty());
}
