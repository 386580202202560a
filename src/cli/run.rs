//! `graphttl run`
//!
//! Builds an in-memory graph, gives every vertex a deadline spread over the
//! requested window, and reports the scheduler backlog until every vertex
//! has expired or the window plus grace period has passed.

use anyhow::{Context, Result};
use clap::Args;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use graphttl_core::{EntityStore, EventProcessor, ExecContext, SchedulerConfig};
use graphttl_memgraph::MemGraph;

use crate::settings::{Settings, WorkloadSettings};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Vertices to create
    #[arg(long)]
    pub vertices: Option<usize>,

    /// Spread deadlines over this many seconds
    #[arg(long)]
    pub ttl_secs: Option<u32>,

    /// Expiring arcs per vertex
    #[arg(long)]
    pub arcs: Option<usize>,

    /// Use the sub-second test preset instead of the configured scheduler
    #[arg(long)]
    pub fast: bool,
}

impl RunArgs {
    fn workload(&self, base: WorkloadSettings) -> WorkloadSettings {
        WorkloadSettings {
            vertices: self.vertices.unwrap_or(base.vertices),
            ttl_secs: self.ttl_secs.unwrap_or(base.ttl_secs).max(1),
            arcs: self.arcs.unwrap_or(base.arcs),
            ..base
        }
    }
}

pub async fn run(args: RunArgs, settings: Settings, json: bool) -> Result<()> {
    let workload = args.workload(settings.workload);
    let config = if args.fast {
        SchedulerConfig::fast().with_name(settings.scheduler.name.clone())
    } else {
        settings.scheduler
    };

    let graph = MemGraph::new();
    let processor = EventProcessor::initialize(Arc::new(graph.clone()), config, true)
        .context("Failed to initialize event processor")?;
    processor.start(true).context("Failed to start event monitor")?;

    populate(&graph, &processor, workload)?;
    info!(
        vertices = workload.vertices,
        arcs = workload.arcs,
        ttl_secs = workload.ttl_secs,
        "Workload scheduled"
    );

    let ctx = ExecContext::new("cli");
    let deadline = Instant::now() + Duration::from_secs(u64::from(workload.ttl_secs) + workload.grace_secs);
    let mut report = tokio::time::interval(Duration::from_millis(workload.report_interval_ms.max(1)));

    loop {
        tokio::select! {
            _ = report.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted");
                break;
            }
        }

        let backlog = processor.backlog_info(&ctx).await;
        if json {
            println!("{}", serde_json::to_string(&backlog)?);
        } else {
            println!("{backlog}");
        }

        // The hub vertex carries no deadline
        if graph.vertex_count() <= usize::from(workload.arcs > 0) {
            info!("All vertices expired");
            break;
        }
        if Instant::now() >= deadline {
            warn!(remaining = graph.vertex_count(), "Window elapsed with vertices remaining");
            break;
        }
    }

    let last = processor.backlog_info(&ctx).await;
    let released = processor.destroy().await?;
    let shares = graph.share_stats();
    info!(
        executed = last.n_executor_done,
        on_time_rate = last.on_time_rate,
        released,
        increfs = shares.increfs,
        decrefs = shares.decrefs,
        underflows = shares.underflows,
        remaining = graph.vertex_count(),
        "Run complete"
    );
    Ok(())
}

/// Create the vertices and arcs and schedule them
fn populate(graph: &MemGraph, processor: &EventProcessor, workload: WorkloadSettings) -> Result<()> {
    let n = workload.vertices.max(1) as u64;
    let now = graph.now_seconds();
    let hub = (workload.arcs > 0).then(|| graph.create_vertex("hub"));

    for i in 0..workload.vertices {
        let ttl = 1 + (i as u64 * u64::from(workload.ttl_secs) / n) as u32;
        let vertex = graph.create_vertex(format!("v{i}"));
        if let Some(hub) = hub {
            for k in 0..workload.arcs {
                let arc_ttl = (ttl * (k as u32 + 1) / (workload.arcs as u32 + 1)).max(1);
                graph.add_arc(processor, vertex, hub, now + arc_ttl)?;
            }
        }
        graph.set_vertex_ttl(processor, vertex, ttl)?;
    }
    Ok(())
}
