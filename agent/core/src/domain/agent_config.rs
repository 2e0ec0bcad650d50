// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Agent Configuration
//
// Settings for one gluster-sync agent:
// - GlusterFS servers used as mount sources
// - Local base directory for mount points
// - etcd endpoints and the shared event key
// - Snapshot file and plugin socket locations
// - Watch loop reconnection behaviour
//
// Resolution order: YAML file -> GLUSTER_SYNC_* environment -> CLI flags.

use crate::domain::volume::UnmountFailurePolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PLUGIN_ID: &str = "glusterfs";
pub const DEFAULT_EVENT_KEY: &str = "/docker/gluster/volume/plugin/event";
pub const DEFAULT_STATE_FILE: &str = "/etc/docker-gluster-volume-plugin-persistence.json";
pub const DEFAULT_BASE_DIR: &str = "/var/lib/docker/volumes/glusterfs";
pub const DEFAULT_SOCKET_DIR: &str = "/run/docker/plugins";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/gluster-sync/config.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// GlusterFS servers; the first is the mount source, the rest are backups
    #[serde(default)]
    pub servers: Vec<String>,

    /// Root directory for volume mount points
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// etcd client URLs (e.g. "http://10.0.0.1:2379")
    #[serde(default)]
    pub etcd_endpoints: Vec<String>,

    /// Key every agent publishes to and watches
    #[serde(default = "default_event_key")]
    pub event_key: String,

    /// Registry snapshot file
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Docker plugin name; also the socket file name and `--driver` value
    #[serde(default = "default_plugin_id")]
    pub plugin_id: String,

    /// Directory Docker scans for plugin sockets
    #[serde(default = "default_socket_dir")]
    pub socket_dir: PathBuf,

    /// Timeout for each coordination store request
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Watch re-establishment attempts after a failure (0 = stop on first failure)
    #[serde(default)]
    pub watch_reconnect_attempts: u32,

    /// First reconnect delay; doubles on each attempt
    #[serde(default = "default_watch_backoff", with = "humantime_serde")]
    pub watch_backoff_initial: Duration,

    #[serde(default)]
    pub unmount_failure_policy: UnmountFailurePolicy,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(DEFAULT_BASE_DIR)
}

fn default_event_key() -> String {
    DEFAULT_EVENT_KEY.to_string()
}

fn default_state_file() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_FILE)
}

fn default_plugin_id() -> String {
    DEFAULT_PLUGIN_ID.to_string()
}

fn default_socket_dir() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_DIR)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_watch_backoff() -> Duration {
    Duration::from_secs(1)
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            base_dir: default_base_dir(),
            etcd_endpoints: Vec::new(),
            event_key: default_event_key(),
            state_file: default_state_file(),
            plugin_id: default_plugin_id(),
            socket_dir: default_socket_dir(),
            request_timeout: default_request_timeout(),
            watch_reconnect_attempts: 0,
            watch_backoff_initial: default_watch_backoff(),
            unmount_failure_policy: UnmountFailurePolicy::default(),
        }
    }
}

/// Split a colon-separated server list ("gfs1:gfs2:gfs3")
pub fn parse_server_list(value: &str) -> Vec<String> {
    value
        .split(':')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split a comma-separated endpoint list
pub fn parse_endpoint_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl AgentConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    /// Load configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load configuration: explicit path, then the system path, then defaults
    pub fn load_or_default(cli_path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            Self::from_yaml_file(path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?
        } else if Path::new(SYSTEM_CONFIG_PATH).exists() {
            tracing::info!("Loading configuration from {}", SYSTEM_CONFIG_PATH);
            Self::from_yaml_file(SYSTEM_CONFIG_PATH)?
        } else {
            tracing::debug!("No configuration file found, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply GLUSTER_SYNC_* environment overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("GLUSTER_SYNC_SERVERS") {
            tracing::info!("Environment override: GLUSTER_SYNC_SERVERS={}", val);
            self.servers = parse_server_list(&val);
        }
        if let Ok(val) = std::env::var("GLUSTER_SYNC_ETCD") {
            tracing::info!("Environment override: GLUSTER_SYNC_ETCD={}", val);
            self.etcd_endpoints = parse_endpoint_list(&val);
        }
        if let Ok(val) = std::env::var("GLUSTER_SYNC_BASEDIR") {
            tracing::info!("Environment override: GLUSTER_SYNC_BASEDIR={}", val);
            self.base_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("GLUSTER_SYNC_WATCH_RECONNECT_ATTEMPTS") {
            match val.parse() {
                Ok(attempts) => self.watch_reconnect_attempts = attempts,
                Err(_) => tracing::warn!(
                    "Invalid value for GLUSTER_SYNC_WATCH_RECONNECT_ATTEMPTS: '{}'. Ignoring.",
                    val
                ),
            }
        }
    }

    /// Path of the Unix socket Docker connects to
    pub fn socket_path(&self) -> PathBuf {
        self.socket_dir.join(format!("{}.sock", self.plugin_id))
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.servers.is_empty() {
            anyhow::bail!("At least one GlusterFS server is required (--server gfs1:gfs2)");
        }

        if self.etcd_endpoints.is_empty() {
            anyhow::bail!("At least one etcd endpoint is required (--etcd http://host:2379)");
        }

        for endpoint in &self.etcd_endpoints {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                anyhow::bail!(
                    "Invalid etcd endpoint '{}': must start with http:// or https://",
                    endpoint
                );
            }
        }

        if !self.base_dir.is_absolute() {
            anyhow::bail!("base_dir must be an absolute path: {:?}", self.base_dir);
        }

        if self.plugin_id.is_empty() || self.plugin_id.contains('/') {
            anyhow::bail!("Invalid plugin_id: '{}'", self.plugin_id);
        }

        if !self.event_key.starts_with('/') {
            anyhow::bail!("event_key must start with '/': '{}'", self.event_key);
        }

        if self.request_timeout.is_zero() {
            anyhow::bail!("request_timeout must be greater than zero");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AgentConfig {
        AgentConfig {
            servers: vec!["gfs1".to_string()],
            etcd_endpoints: vec!["http://127.0.0.1:2379".to_string()],
            ..AgentConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.plugin_id, "glusterfs");
        assert_eq!(config.event_key, DEFAULT_EVENT_KEY);
        assert_eq!(config.request_timeout, Duration::from_secs(1));
        assert_eq!(config.watch_reconnect_attempts, 0);
        assert_eq!(config.socket_path(), PathBuf::from("/run/docker/plugins/glusterfs.sock"));
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
servers: [gfs1, gfs2]
base_dir: /mnt/gluster
etcd_endpoints: ["http://etcd1:2379", "http://etcd2:2379"]
request_timeout: 2s
watch_reconnect_attempts: 5
watch_backoff_initial: 500ms
unmount_failure_policy: keep-counter
"#;
        let config = AgentConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.servers, vec!["gfs1", "gfs2"]);
        assert_eq!(config.base_dir, PathBuf::from("/mnt/gluster"));
        assert_eq!(config.etcd_endpoints.len(), 2);
        assert_eq!(config.request_timeout, Duration::from_secs(2));
        assert_eq!(config.watch_backoff_initial, Duration::from_millis(500));
        assert_eq!(config.unmount_failure_policy, UnmountFailurePolicy::KeepCounter);
        assert_eq!(config.state_file, PathBuf::from(DEFAULT_STATE_FILE));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_list_parsing() {
        assert_eq!(parse_server_list("gfs1:gfs2::gfs3"), vec!["gfs1", "gfs2", "gfs3"]);
        assert_eq!(
            parse_endpoint_list("http://a:2379, http://b:2379"),
            vec!["http://a:2379", "http://b:2379"]
        );
        assert!(parse_server_list("").is_empty());
    }

    #[test]
    fn test_validation() {
        assert!(valid_config().validate().is_ok());

        let mut config = valid_config();
        config.servers.clear();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.etcd_endpoints.clear();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.etcd_endpoints = vec!["etcd1:2379".to_string()];
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.base_dir = PathBuf::from("relative/dir");
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.event_key = "no-leading-slash".to_string();
        assert!(config.validate().is_err());
    }
}
