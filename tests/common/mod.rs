//! Shared helpers for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use graphttl_core::{EventProcessor, SchedulerConfig};
use graphttl_memgraph::MemGraph;

pub const BUDGET: Duration = Duration::from_secs(5);

/// Graph on the wall clock with a running, enabled processor
pub fn start() -> (MemGraph, Arc<EventProcessor>) {
    start_with(SchedulerConfig::fast())
}

pub fn start_with(config: SchedulerConfig) -> (MemGraph, Arc<EventProcessor>) {
    let graph = MemGraph::new();
    let processor = EventProcessor::initialize(Arc::new(graph.clone()), config, true)
        .expect("initialize processor");
    processor.start(true).expect("start monitor");
    (graph, processor)
}

/// Poll `done` every 50ms until it holds or `limit` passes
pub async fn wait_until(limit: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    done()
}
