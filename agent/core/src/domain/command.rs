// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Host Commands
//!
//! The driver's only side effects on the host are four external commands:
//! mounting and unmounting a GlusterFS export, and asking the container
//! runtime to materialize or destroy its own volume object after a remote
//! event. [`CommandExecutor`] treats each as a black box that either succeeds
//! or fails.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MOUNT_BIN: &str = "/usr/bin/mount";
pub const UMOUNT_BIN: &str = "/usr/bin/umount";
pub const DOCKER_BIN: &str = "docker";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Mount,
    Unmount,
    MaterializeVolume,
    DestroyVolume,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    /// `mount -t glusterfs [-o backup-volfile-servers=..] <server>:<export> <target>`
    Mount {
        server: String,
        backup_servers: Vec<String>,
        backing_name: String,
        target: PathBuf,
    },
    /// `umount <target>`
    Unmount { target: PathBuf },
    /// `docker volume create --driver <driver> --opt vname=<export> --name <volume>`
    MaterializeVolume {
        driver: String,
        backing_name: String,
        mount_name: String,
    },
    /// `docker volume rm <volume>`
    DestroyVolume { mount_name: String },
}

impl HostCommand {
    /// Mount an export using the first server, others as volfile backups
    pub fn mount(servers: &[String], backing_name: &str, target: &Path) -> Self {
        let (server, backup_servers) = match servers.split_first() {
            Some((first, rest)) => (first.clone(), rest.to_vec()),
            None => (String::new(), Vec::new()),
        };
        Self::Mount {
            server,
            backup_servers,
            backing_name: backing_name.to_string(),
            target: target.to_path_buf(),
        }
    }

    pub fn unmount(target: &Path) -> Self {
        Self::Unmount {
            target: target.to_path_buf(),
        }
    }

    pub fn materialize(driver: &str, backing_name: &str, mount_name: &str) -> Self {
        Self::MaterializeVolume {
            driver: driver.to_string(),
            backing_name: backing_name.to_string(),
            mount_name: mount_name.to_string(),
        }
    }

    pub fn destroy(mount_name: &str) -> Self {
        Self::DestroyVolume {
            mount_name: mount_name.to_string(),
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Mount { .. } => CommandKind::Mount,
            Self::Unmount { .. } => CommandKind::Unmount,
            Self::MaterializeVolume { .. } => CommandKind::MaterializeVolume,
            Self::DestroyVolume { .. } => CommandKind::DestroyVolume,
        }
    }

    pub fn program(&self) -> &'static str {
        match self {
            Self::Mount { .. } => MOUNT_BIN,
            Self::Unmount { .. } => UMOUNT_BIN,
            Self::MaterializeVolume { .. } | Self::DestroyVolume { .. } => DOCKER_BIN,
        }
    }

    /// Arguments passed to [`program`](Self::program), one per argv slot
    pub fn args(&self) -> Vec<String> {
        match self {
            Self::Mount {
                server,
                backup_servers,
                backing_name,
                target,
            } => {
                let mut args = vec!["-t".to_string(), "glusterfs".to_string()];
                if !backup_servers.is_empty() {
                    args.push("-o".to_string());
                    args.push(format!("backup-volfile-servers={}", backup_servers.join(":")));
                }
                args.push(format!("{}:{}", server, backing_name));
                args.push(target.to_string_lossy().into_owned());
                args
            }
            Self::Unmount { target } => vec![target.to_string_lossy().into_owned()],
            Self::MaterializeVolume {
                driver,
                backing_name,
                mount_name,
            } => vec![
                "volume".to_string(),
                "create".to_string(),
                "--driver".to_string(),
                driver.clone(),
                "--opt".to_string(),
                format!("vname={}", backing_name),
                "--name".to_string(),
                mount_name.clone(),
            ],
            Self::DestroyVolume { mount_name } => {
                vec!["volume".to_string(), "rm".to_string(), mount_name.clone()]
            }
        }
    }
}

impl std::fmt::Display for HostCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program())?;
        for arg in self.args() {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed with {status}: {stderr}")]
    NonZeroExit {
        command: String,
        status: String,
        stderr: String,
    },
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `command` to completion
    ///
    /// # Returns
    /// * `Ok(())` if the command exited successfully
    /// * `Err(CommandError)` if it could not be started or exited non-zero
    async fn execute(&self, command: &HostCommand) -> Result<(), CommandError>;
}
