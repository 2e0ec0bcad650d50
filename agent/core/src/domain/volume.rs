// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Volume Record - the unit of registry state
//!
//! A [`VolumeRecord`] binds a locally visible volume name (the mount name) to
//! a GlusterFS export (the backing name). The mount point is always derived
//! from the mount name and the agent's base directory; it is never chosen
//! independently.
//!
//! The serialized field names (`name`, `mount_name`, `mount_path`,
//! `connections`) are the on-disk snapshot format and must not change.

use crate::domain::command::CommandError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Docker create option carrying the GlusterFS export name
pub const BACKING_NAME_OPTION: &str = "vname";

// ============================================================================
// Value Objects
// ============================================================================

/// Derive the mount point for a volume name under `base_dir`
pub fn mount_point_for(base_dir: &Path, mount_name: &str) -> PathBuf {
    base_dir.join(mount_name)
}

/// Reject names that would escape the base directory or are empty
pub fn validate_mount_name(mount_name: &str) -> Result<(), VolumeError> {
    if mount_name.trim().is_empty() {
        return Err(VolumeError::InvalidArgument(
            "volume name cannot be empty".to_string(),
        ));
    }
    if mount_name.contains('/') || mount_name.contains('\0') {
        return Err(VolumeError::InvalidArgument(format!(
            "volume name '{}' must not contain path separators",
            mount_name
        )));
    }
    if mount_name == "." || mount_name == ".." {
        return Err(VolumeError::InvalidArgument(format!(
            "volume name '{}' is reserved",
            mount_name
        )));
    }
    Ok(())
}

/// What `unmount` does to the connection count when the unmount command fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnmountFailurePolicy {
    /// Zero the count anyway; a later unmount will not retry the command
    #[default]
    ResetCounter,
    /// Leave the last claim in place so the next unmount retries the command
    KeepCounter,
}

// ============================================================================
// Entity: VolumeRecord
// ============================================================================

/// One logical volume bound to a GlusterFS export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRecord {
    /// GlusterFS export name, immutable once created
    #[serde(rename = "name")]
    pub backing_name: String,

    /// Locally visible volume name; the registry key
    pub mount_name: String,

    /// Absolute local path where the export is mounted
    #[serde(rename = "mount_path")]
    pub mount_point: PathBuf,

    /// Number of outstanding local "in use" claims
    pub connections: u32,
}

impl VolumeRecord {
    pub fn new(base_dir: &Path, mount_name: &str, backing_name: &str) -> Self {
        Self {
            backing_name: backing_name.to_string(),
            mount_name: mount_name.to_string(),
            mount_point: mount_point_for(base_dir, mount_name),
            connections: 0,
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.connections > 0
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors surfaced by registry and driver operations
#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found volume {0}")]
    NotFound(String),

    #[error("volume {0} already exists")]
    AlreadyExists(String),

    #[error("failed to create mount point {path}: {source}")]
    DirectoryError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to mount volume {name}: {source}")]
    MountFailed {
        name: String,
        #[source]
        source: CommandError,
    },

    #[error("failed to unmount volume {name}: {source}")]
    UnmountFailed {
        name: String,
        #[source]
        source: CommandError,
    },

    #[error("persisted volume state is unreadable: {0}")]
    CorruptState(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_point_is_derived_from_base_dir() {
        let record = VolumeRecord::new(Path::new("/var/lib/gluster"), "data1", "export1");
        assert_eq!(record.mount_point, PathBuf::from("/var/lib/gluster/data1"));
        assert!(!record.is_mounted());
    }

    #[test]
    fn test_mounted_follows_connection_count() {
        let mut record = VolumeRecord::new(Path::new("/mnt"), "v", "e");
        record.connections = 3;
        assert!(record.is_mounted());
    }

    #[test]
    fn test_validate_mount_name() {
        assert!(validate_mount_name("data1").is_ok());
        assert!(validate_mount_name("my-vol_2.x").is_ok());
        assert!(matches!(validate_mount_name(""), Err(VolumeError::InvalidArgument(_))));
        assert!(matches!(validate_mount_name("../etc"), Err(VolumeError::InvalidArgument(_))));
        assert!(matches!(validate_mount_name(".."), Err(VolumeError::InvalidArgument(_))));
    }

    #[test]
    fn test_snapshot_field_names() {
        let record = VolumeRecord::new(Path::new("/mnt/gluster"), "data1", "export1");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["name"], "export1");
        assert_eq!(json["mount_name"], "data1");
        assert_eq!(json["mount_path"], "/mnt/gluster/data1");
        assert_eq!(json["connections"], 0);
    }
}
