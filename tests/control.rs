//! Flush, suspend, resume and teardown against a live monitor

mod common;

use std::time::Duration;

use common::{start, wait_until, BUDGET};
use graphttl_core::{AccessReason, ExecContext, FlushOutcome, ToggleOutcome};
use graphttl_memgraph::GraphMode;
use tokio_test::assert_ok;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_flush_drains_public_queue() {
    let (graph, processor) = start();
    let ctx = ExecContext::new("test");
    for i in 0..100 {
        let v = graph.create_vertex(format!("v{i}"));
        graph.set_vertex_ttl(&processor, v, 60 + i).unwrap();
    }

    assert_eq!(processor.flush(&ctx, BUDGET).await, FlushOutcome::Flushed);

    let info = processor.backlog_info(&ctx).await;
    assert!(info.filled);
    assert_eq!(info.n_api, 0);
    assert_eq!(info.n_long, 100);
    assert_eq!(info.n_scheduled(), 100);
    assert!(info.to_string().ends_with("<RUNNING>"));

    assert_eq!(processor.destroy().await.unwrap(), 100);
    assert_eq!(graph.share_stats().decrefs, 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_disable_enable_keeps_schedule() {
    let (graph, processor) = start();
    let ctx = ExecContext::new("test");
    for i in 0..50 {
        let v = graph.create_vertex(format!("v{i}"));
        graph.set_vertex_ttl(&processor, v, 30 + i).unwrap();
    }

    assert_eq!(processor.disable(&ctx, BUDGET).await, ToggleOutcome::Disabled);
    assert!(!processor.is_enabled());
    let paused = processor.backlog_info(&ctx).await;
    assert!(paused.paused);
    assert_eq!(paused.n_api, 0);
    assert_eq!(paused.n_scheduled(), 50);
    assert!(paused.to_string().ends_with("<PAUSED>"));

    // Disabling twice is a no-op
    assert_eq!(processor.disable(&ctx, BUDGET).await, ToggleOutcome::Disabled);

    assert_eq!(processor.enable(&ctx, BUDGET).await, ToggleOutcome::Enabled);
    assert!(processor.is_enabled());
    let resumed = processor.backlog_info(&ctx).await;
    assert!(!resumed.paused);
    assert_eq!(resumed.n_scheduled() + resumed.n_imminent, 50);
    processor.destroy().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_suspended_monitor_executes_nothing() {
    let (graph, processor) = start();
    let ctx = ExecContext::new("test");
    let v = graph.create_vertex("v");
    graph.set_vertex_ttl(&processor, v, 2).unwrap();

    assert_eq!(processor.disable(&ctx, BUDGET).await, ToggleOutcome::Disabled);
    tokio::time::sleep(Duration::from_millis(3_500)).await;
    assert!(graph.contains(v));

    assert_eq!(processor.enable(&ctx, BUDGET).await, ToggleOutcome::Enabled);
    assert!(wait_until(Duration::from_secs(3), || !graph.contains(v)).await);
    processor.destroy().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelled_executor_returns_events() {
    let (graph, processor) = start();
    let ctx = ExecContext::new("test");
    let v = graph.create_vertex("v");
    graph.set_vertex_ttl(&processor, v, 2).unwrap();
    graph.inject_fault(v, AccessReason::Locked, u32::MAX);

    // The executor keeps retrying the locked vertex
    tokio::time::sleep(Duration::from_millis(3_500)).await;
    assert!(graph.contains(v));

    assert_eq!(processor.disable(&ctx, BUDGET).await, ToggleOutcome::Disabled);
    assert!(processor.exists_in_schedule(&ctx, v, BUDGET).await.unwrap());
    assert_eq!(processor.backlog_info(&ctx).await.n_executor_current, 0);

    graph.inject_fault(v, AccessReason::Locked, 0);
    assert_eq!(processor.enable(&ctx, BUDGET).await, ToggleOutcome::Enabled);
    assert!(wait_until(Duration::from_secs(3), || !graph.contains(v)).await);
    assert_eq!(graph.share_stats().underflows, 0);
    processor.destroy().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readonly_graph_pauses_expiration() {
    let (graph, processor) = start();
    let v = graph.create_vertex("v");
    graph.set_vertex_ttl(&processor, v, 2).unwrap();
    graph.set_mode(GraphMode::Readonly);

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    assert!(graph.contains(v));

    graph.set_mode(GraphMode::Writable);
    assert!(wait_until(Duration::from_secs(4), || !graph.contains(v)).await);
    processor.destroy().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_destroy_releases_every_share() {
    let (graph, processor) = start();
    let handles: Vec<_> = (0..20)
        .map(|i| {
            let v = graph.create_vertex(format!("v{i}"));
            graph.set_vertex_ttl(&processor, v, 120).unwrap();
            v
        })
        .collect();

    assert_eq!(assert_ok!(processor.destroy().await), 20);
    assert!(processor.is_defunct());
    for v in handles {
        assert_eq!(graph.refcount(v), Some(1));
        assert!(!graph.vertex(v).unwrap().is_event_scheduled());
    }
    let shares = graph.share_stats();
    assert_eq!(shares.increfs, 20);
    assert_eq!(shares.decrefs, 20);

    // Teardown is idempotent and later calls are no-ops
    assert_eq!(assert_ok!(processor.destroy().await), 0);
    let ctx = ExecContext::new("test");
    assert_eq!(processor.flush(&ctx, BUDGET).await, FlushOutcome::NotRunning);
    assert_eq!(processor.enable(&ctx, BUDGET).await, ToggleOutcome::NotRunning);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_destroy_on_readonly_graph_releases_every_share() {
    let (graph, processor) = start();
    let handles: Vec<_> = (0..5)
        .map(|i| {
            let v = graph.create_vertex(format!("v{i}"));
            graph.set_vertex_ttl(&processor, v, 120).unwrap();
            v
        })
        .collect();
    let locked = graph.create_vertex("locked");
    graph.set_vertex_ttl(&processor, locked, 120).unwrap();
    graph.inject_fault(locked, AccessReason::Locked, u32::MAX);

    graph.set_mode(GraphMode::Readonly);
    assert_eq!(assert_ok!(processor.destroy().await), 6);

    for v in handles.into_iter().chain([locked]) {
        assert_eq!(graph.refcount(v), Some(1));
        assert!(!graph.vertex(v).unwrap().is_event_scheduled());
    }
    let shares = graph.share_stats();
    assert_eq!(shares.increfs, 6);
    assert_eq!(shares.decrefs, 6);
    assert_eq!(shares.underflows, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_set_defunct_stops_accepting_work() {
    let (graph, processor) = start();
    let ctx = ExecContext::new("test");
    processor.set_defunct(&ctx, BUDGET).await.unwrap();

    let v = graph.create_vertex("v");
    graph.set_vertex_ttl(&processor, v, 1).unwrap();
    assert_eq!(graph.refcount(v), Some(1));
    assert!(!processor.is_ready());
    processor.destroy().await.unwrap();
}
