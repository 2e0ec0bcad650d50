// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use gluster_sync_core::domain::agent_config::{AgentConfig, SYSTEM_CONFIG_PATH};

use crate::settings::{resolve_config, AgentOverrides};

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate the effective configuration
    Validate,

    /// Generate sample configuration
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./gluster-sync.yaml")]
        output: PathBuf,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
    overrides: &AgentOverrides,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override.as_deref(), overrides, paths),
        ConfigCommand::Validate => validate(config_override.as_deref(), overrides),
        ConfigCommand::Generate { output } => generate(&output),
    }
}

fn show(config_override: Option<&Path>, overrides: &AgentOverrides, show_paths: bool) -> Result<()> {
    let config = resolve_config(config_override, overrides)?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        println!("  2. {}", SYSTEM_CONFIG_PATH);
        println!("  3. GLUSTER_SYNC_SERVERS / GLUSTER_SYNC_ETCD / GLUSTER_SYNC_BASEDIR");
        println!("  4. --server / --etcd / --basedir flags");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "GlusterFS:".bold());
    for (i, server) in config.servers.iter().enumerate() {
        let role = if i == 0 { "primary" } else { "backup" };
        println!("  {} ({})", server, role);
    }
    println!("  Mount base: {}", config.base_dir.display());
    println!();

    println!("{}", "Coordination:".bold());
    for endpoint in &config.etcd_endpoints {
        println!("  {}", endpoint);
    }
    println!("  Event key: {}", config.event_key);
    println!("  Request timeout: {:?}", config.request_timeout);
    println!("  Watch reconnect attempts: {}", config.watch_reconnect_attempts);
    println!();

    println!("{}", "Plugin:".bold());
    println!("  Name: {}", config.plugin_id);
    println!("  Socket: {}", config.socket_path().display());
    println!("  State file: {}", config.state_file.display());
    println!("  Unmount failure policy: {:?}", config.unmount_failure_policy);
    println!();

    Ok(())
}

fn validate(config_override: Option<&Path>, overrides: &AgentOverrides) -> Result<()> {
    println!("Validating configuration...");

    let config = resolve_config(config_override, overrides)?;
    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

fn generate(output: &Path) -> Result<()> {
    let sample = AgentConfig {
        servers: vec!["gfs1".to_string(), "gfs2".to_string()],
        etcd_endpoints: vec!["http://127.0.0.1:2379".to_string()],
        ..AgentConfig::default()
    };
    let yaml = serde_yaml::to_string(&sample).context("Failed to serialize sample config")?;

    std::fs::write(output, yaml)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
