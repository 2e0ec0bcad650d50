// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # gluster-sync
//!
//! Docker volume plugin agent for GlusterFS. One agent runs on every Docker
//! host; volume creation and removal are broadcast through etcd so every
//! host sees the same set of named volumes.
//!
//! ## Commands
//!
//! - `gluster-sync --server gfs1:gfs2 --etcd http://10.0.0.1:2379` - run the agent
//! - `gluster-sync config show|validate|generate` - configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use gluster_sync::commands::{self, ConfigCommand};
use gluster_sync::daemon;
use gluster_sync::settings::{resolve_config, AgentOverrides};

/// GlusterFS volume plugin with cluster-wide create/remove sync
#[derive(Parser)]
#[command(name = "gluster-sync")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "GLUSTER_SYNC_CONFIG",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: AgentOverrides,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "GLUSTER_SYNC_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli.log_level)?;

    match cli.command {
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config, &cli.overrides).await
        }
        None => {
            let config = resolve_config(cli.config.as_deref(), &cli.overrides)?;
            info!("Starting gluster-sync agent");
            daemon::run_agent(config).await
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
