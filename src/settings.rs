//! Configuration loading
//!
//! Embedded defaults, then optional files, then the environment.

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use graphttl_core::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Binary settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Scheduler parameters
    pub scheduler: SchedulerConfig,
    /// Synthetic workload for `graphttl run`
    pub workload: WorkloadSettings,
}

/// Synthetic workload parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkloadSettings {
    /// Vertices to create
    pub vertices: usize,
    /// Deadlines are spread over this many seconds
    pub ttl_secs: u32,
    /// Expiring arcs per vertex
    pub arcs: usize,
    /// Interval between backlog reports
    pub report_interval_ms: u64,
    /// Extra time allowed past the last deadline
    pub grace_secs: u64,
}

/// Load settings from the embedded defaults, files and environment
pub fn load_settings(extra: Option<&Path>) -> Result<Settings> {
    let mut builder = Config::builder()
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        .add_source(File::with_name("config/local").required(false));
    if let Some(path) = extra {
        builder = builder.add_source(File::from(path));
    }

    // GRAPHTTL_SCHEDULER__EXECUTOR__BATCH_SIZE: single "_" after the prefix,
    // "__" between nesting levels
    let config = builder
        .add_source(
            Environment::with_prefix("GRAPHTTL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let settings: Settings = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;
    settings
        .scheduler
        .validate()
        .context("Invalid scheduler configuration")?;
    Ok(settings)
}
