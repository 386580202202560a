//! CLI module for GraphTTL
//!
//! Provides commands:
//! - `run`: Drive a synthetic expiration workload against an in-memory graph
//! - `config`: Print the effective configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::settings::load_settings;

pub mod config;
pub mod run;

/// GraphTTL expiration scheduler
#[derive(Parser, Debug)]
#[command(name = "graphttl")]
#[command(about = "Tiered time-to-live scheduler for graph entities")]
#[command(version)]
pub struct Cli {
    /// Emit logs and reports as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Write logs to daily rolling files in this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Extra configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a synthetic expiration workload
    Run(run::RunArgs),
    /// Print the effective configuration as TOML
    Config,
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Run(args)) => {
            let settings = load_settings(cli.config.as_deref())?;
            run::run(args, settings, cli.json).await
        }
        Some(Commands::Config) => {
            let settings = load_settings(cli.config.as_deref())?;
            config::run(&settings)
        }
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}
