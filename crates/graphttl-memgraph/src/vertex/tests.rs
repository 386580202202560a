use super::*;
use crate::clock::Clock;
use crate::graph::{GraphMode, MemGraph};

fn graph_with_vertex() -> (MemGraph, Arc<Vertex>) {
    let graph = MemGraph::with_clock(Clock::manual(100_000));
    let handle = graph.create_vertex("v");
    let vertex = graph.vertex(handle).unwrap();
    (graph, vertex)
}

#[test]
fn test_second_writer_is_refused() {
    let (_graph, vertex) = graph_with_vertex();
    let _held = vertex.try_write().unwrap();
    assert!(matches!(vertex.try_write(), Err(AccessReason::Locked)));
}

#[test]
fn test_expiration_reports_earliest_arc() {
    let (graph, vertex) = graph_with_vertex();
    let target = graph.create_vertex("t");
    let mut guard = vertex.try_write().unwrap();
    guard.set_tmx(500);
    guard.push_arc(Edge { target, tmx: 300 });
    guard.push_arc(Edge { target, tmx: TIMESTAMP_NEVER });
    guard.push_arc(Edge { target, tmx: 200 });

    let expiration = guard.expiration();
    assert_eq!(expiration.entity_ts, 500);
    assert_eq!(expiration.component_ts, 200);
    assert_eq!(expiration.next_deadline(), 200);
}

#[test]
fn test_expire_components_keeps_future_arcs() {
    let (graph, vertex) = graph_with_vertex();
    let target = graph.create_vertex("t");
    let mut guard = vertex.try_write().unwrap();
    for tmx in [100, 150, 300, TIMESTAMP_NEVER] {
        guard.push_arc(Edge { target, tmx });
    }

    let expiry = guard.expire_components(150).unwrap();
    assert_eq!(expiry.removed, 2);
    assert_eq!(expiry.next_component_ts, 300);
    assert_eq!(guard.arc_count(), 2);
}

#[test]
fn test_clear_expiration_drops_every_deadline() {
    let (graph, vertex) = graph_with_vertex();
    let target = graph.create_vertex("t");
    let mut guard = vertex.try_write().unwrap();
    guard.set_tmx(500);
    guard.push_arc(Edge { target, tmx: 300 });

    guard.clear_expiration();
    assert_eq!(guard.expiration(), Expiration::NEVER);
    assert_eq!(guard.arc_count(), 1);
}

#[test]
fn test_delete_releases_graph_share_once() {
    let (graph, vertex) = graph_with_vertex();
    let handle = vertex.handle();
    {
        let mut guard = vertex.try_write().unwrap();
        guard.delete().unwrap();
        guard.delete().unwrap();
    }

    assert!(vertex.is_defunct());
    assert_eq!(vertex.refcount(), 0);
    assert!(graph.vertex(handle).is_none());
    assert_eq!(graph.share_stats().freed, 1);
    assert_eq!(graph.share_stats().underflows, 0);
    assert!(matches!(vertex.try_write(), Err(AccessReason::NotFound)));
}

#[test]
fn test_readonly_modes_refuse_writes() {
    let (graph, vertex) = graph_with_vertex();

    graph.set_mode(GraphMode::ReadonlyPending);
    assert!(matches!(vertex.try_write(), Err(AccessReason::ReadonlyPending)));
    graph.set_mode(GraphMode::Readonly);
    assert!(matches!(vertex.try_write(), Err(AccessReason::ReadonlyGraph)));
    graph.set_mode(GraphMode::Writable);
    assert!(vertex.try_write().is_ok());
}

#[test]
fn test_injected_fault_expires_after_count() {
    let (graph, vertex) = graph_with_vertex();
    graph.inject_fault(vertex.handle(), AccessReason::Timeout, 2);

    assert!(matches!(vertex.try_write(), Err(AccessReason::Timeout)));
    assert!(matches!(vertex.try_write(), Err(AccessReason::Timeout)));
    assert!(vertex.try_write().is_ok());
}

#[test]
fn test_release_scheduled_bypasses_write_gate() {
    let (graph, vertex) = graph_with_vertex();
    vertex.try_write().unwrap().set_event_scheduled(true);

    graph.set_mode(GraphMode::Readonly);
    graph.inject_fault(vertex.handle(), AccessReason::Locked, 1);

    assert!(vertex.release_scheduled());
    assert!(!vertex.is_event_scheduled());
    assert!(!vertex.release_scheduled());
}
