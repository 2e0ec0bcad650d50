// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command-line overrides for the agent configuration
//!
//! Flags win over the `GLUSTER_SYNC_*` environment, which wins over the YAML
//! file, which wins over built-in defaults.

use anyhow::{Context, Result};
use clap::Args;
use gluster_sync_core::domain::agent_config::{
    parse_endpoint_list, parse_server_list, AgentConfig,
};
use std::path::{Path, PathBuf};

#[derive(Args, Debug, Clone, Default)]
pub struct AgentOverrides {
    /// GlusterFS servers, colon separated (e.g. gfs1:gfs2:gfs3)
    #[arg(long = "server", global = true, value_name = "SERVERS")]
    pub servers: Option<String>,

    /// Base directory for volume mount points
    #[arg(long = "basedir", global = true, value_name = "DIR")]
    pub base_dir: Option<PathBuf>,

    /// etcd endpoints, comma separated (e.g. http://10.0.0.1:2379,http://10.0.0.2:2379)
    #[arg(long = "etcd", global = true, value_name = "ENDPOINTS")]
    pub etcd: Option<String>,

    /// Registry snapshot file
    #[arg(long, global = true, value_name = "FILE")]
    pub state_file: Option<PathBuf>,

    /// Directory for the plugin socket
    #[arg(long, global = true, value_name = "DIR")]
    pub socket_dir: Option<PathBuf>,
}

impl AgentOverrides {
    pub fn apply(&self, config: &mut AgentConfig) {
        if let Some(servers) = &self.servers {
            config.servers = parse_server_list(servers);
        }
        if let Some(base_dir) = &self.base_dir {
            config.base_dir = base_dir.clone();
        }
        if let Some(etcd) = &self.etcd {
            config.etcd_endpoints = parse_endpoint_list(etcd);
        }
        if let Some(state_file) = &self.state_file {
            config.state_file = state_file.clone();
        }
        if let Some(socket_dir) = &self.socket_dir {
            config.socket_dir = socket_dir.clone();
        }
    }
}

/// Load the file and environment layers, then apply flags
pub fn resolve_config(config_path: Option<&Path>, overrides: &AgentOverrides) -> Result<AgentConfig> {
    let mut config =
        AgentConfig::load_or_default(config_path).context("Failed to load configuration")?;
    overrides.apply(&mut config);
    Ok(config)
}
