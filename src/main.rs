//! GraphTTL - Tiered Expiration Scheduler
//!
//! CLI entry point for the GraphTTL workload driver.

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod settings;

const DEFAULT_FILTER: &str = "graphttl=info,graphttl_core=info,graphttl_memgraph=info";

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cli = cli::Cli::parse();
    let _log_guard = init_tracing(cli.json, cli.log_dir.as_deref());

    cli::run(cli).await
}

/// Install the global subscriber. Logs go to stderr unless a log directory
/// is given; the returned guard flushes the file writer on drop.
fn init_tracing(json: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let (writer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "graphttl.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(writer), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let registry = tracing_subscriber::registry().with(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| DEFAULT_FILTER.into()),
    );
    let layer = tracing_subscriber::fmt::layer().with_writer(writer);
    if json {
        registry.with(layer.json()).init();
    } else {
        registry.with(layer).init();
    }
    guard
}
