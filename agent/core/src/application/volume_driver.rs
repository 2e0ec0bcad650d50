// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Volume Driver
//!
//! The container runtime's view of the agent. Each volume moves through
//! `Absent -> Created -> Mounted(n)`, where `Mounted(0)` is `Created`:
//!
//! | Operation | Transition | Side effect |
//! |-----------|------------|-------------|
//! | `create`  | Absent -> Created | announce `create` |
//! | `remove`  | Created -> Absent | announce `remove` |
//! | `mount`   | 0 -> 1 | `mount -t glusterfs` |
//! | `mount`   | n -> n+1 | none |
//! | `unmount` | n -> n-1 (n > 1) | none |
//! | `unmount` | 1 -> 0 | `umount` |
//!
//! All registry access happens under the shared registry lock, which is also
//! held across the mount and unmount commands.

use crate::application::event_propagator::EventPropagator;
use crate::application::volume_registry::SharedRegistry;
use crate::domain::command::{CommandExecutor, HostCommand};
use crate::domain::events::PropagationEvent;
use crate::domain::volume::{
    mount_point_for, validate_mount_name, UnmountFailurePolicy, VolumeError, VolumeRecord,
    BACKING_NAME_OPTION,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Plugin interfaces reported on activation
pub const IMPLEMENTS: &[&str] = &["VolumeDriver"];

/// Visibility of volumes created by this driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeScope {
    /// Each host keeps its own record, kept in sync by propagation
    Local,
}

impl VolumeScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DriverSettings {
    /// GlusterFS servers; the first is the mount source
    pub servers: Vec<String>,
    pub unmount_failure_policy: UnmountFailurePolicy,
}

pub struct VolumeDriver {
    registry: SharedRegistry,
    executor: Arc<dyn CommandExecutor>,
    propagator: Arc<EventPropagator>,
    settings: DriverSettings,
}

impl VolumeDriver {
    pub fn new(
        registry: SharedRegistry,
        executor: Arc<dyn CommandExecutor>,
        propagator: Arc<EventPropagator>,
        settings: DriverSettings,
    ) -> Self {
        Self {
            registry,
            executor,
            propagator,
            settings,
        }
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// Plugin handshake
    pub fn activate(&self) -> &'static [&'static str] {
        IMPLEMENTS
    }

    pub fn capabilities(&self) -> VolumeScope {
        VolumeScope::Local
    }

    /// Register a volume and announce it to the cluster
    ///
    /// `options` must carry the backing export under `vname`.
    pub async fn create(
        &self,
        name: &str,
        options: &HashMap<String, String>,
    ) -> Result<(), VolumeError> {
        let backing_name = options
            .get(BACKING_NAME_OPTION)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                VolumeError::InvalidArgument(format!(
                    "missing required option '{}'",
                    BACKING_NAME_OPTION
                ))
            })?;

        {
            let mut registry = self.registry.lock().await;
            match registry.create(name, backing_name).await {
                Ok(committed) => {
                    committed.into_value();
                }
                Err(VolumeError::AlreadyExists(_))
                    if registry.is_pending_materialize(name, backing_name) =>
                {
                    info!(volume = %name, "Acknowledged runtime callback for replayed create");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }

        info!(volume = %name, backing = %backing_name, "Volume created");
        self.propagator
            .announce(&PropagationEvent::create(name, backing_name))
            .await;
        Ok(())
    }

    /// Unregister a volume and announce it to the cluster
    pub async fn remove(&self, name: &str) -> Result<(), VolumeError> {
        {
            let mut registry = self.registry.lock().await;
            match registry.remove(name).await {
                Ok(committed) => {
                    let record = committed.into_value();
                    if record.is_mounted() {
                        warn!(
                            volume = %name,
                            connections = record.connections,
                            "Removed a volume that is still mounted"
                        );
                    }
                }
                Err(VolumeError::NotFound(_)) if registry.is_pending_destroy(name) => {
                    info!(volume = %name, "Acknowledged runtime callback for replayed remove");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }

        info!(volume = %name, "Volume removed");
        self.propagator
            .announce(&PropagationEvent::remove(name))
            .await;
        Ok(())
    }

    /// Claim a volume, mounting the export on the first claim
    pub async fn mount(&self, name: &str, id: &str) -> Result<PathBuf, VolumeError> {
        let mut registry = self.registry.lock().await;
        let record = registry.get(name)?;

        if !record.is_mounted() {
            let command = HostCommand::mount(
                &self.settings.servers,
                &record.backing_name,
                &record.mount_point,
            );
            self.executor
                .execute(&command)
                .await
                .map_err(|source| VolumeError::MountFailed {
                    name: name.to_string(),
                    source,
                })?;
            info!(volume = %name, id = %id, mount_point = ?record.mount_point, "Volume mounted");
        }

        let connections = registry.increment_connections(name).await?.into_value();
        debug!(volume = %name, id = %id, connections, "Mount claim added");
        Ok(record.mount_point)
    }

    /// Release a claim, unmounting the export on the last one
    pub async fn unmount(&self, name: &str, id: &str) -> Result<(), VolumeError> {
        let mut registry = self.registry.lock().await;
        let record = registry.get(name)?;

        if record.connections > 1 {
            let connections = registry.decrement_connections(name).await?.into_value();
            debug!(volume = %name, id = %id, connections, "Mount claim released");
            return Ok(());
        }

        let command = HostCommand::unmount(&record.mount_point);
        match self.executor.execute(&command).await {
            Ok(()) => {
                registry.reset_connections(name).await?.into_value();
                info!(volume = %name, id = %id, "Volume unmounted");
                Ok(())
            }
            Err(source) => {
                match self.settings.unmount_failure_policy {
                    UnmountFailurePolicy::ResetCounter => {
                        registry.reset_connections(name).await?.into_value();
                    }
                    UnmountFailurePolicy::KeepCounter => {}
                }
                warn!(
                    volume = %name,
                    policy = ?self.settings.unmount_failure_policy,
                    error = %source,
                    "Unmount failed"
                );
                Err(VolumeError::UnmountFailed {
                    name: name.to_string(),
                    source,
                })
            }
        }
    }

    /// Mount point for `name` under the registry's base directory
    ///
    /// Derived, so the volume does not have to be registered.
    pub async fn path(&self, name: &str) -> Result<PathBuf, VolumeError> {
        validate_mount_name(name)?;
        Ok(mount_point_for(self.registry.lock().await.base_dir(), name))
    }

    pub async fn get(&self, name: &str) -> Result<VolumeRecord, VolumeError> {
        self.registry.lock().await.get(name)
    }

    pub async fn list(&self) -> Vec<VolumeRecord> {
        self.registry.lock().await.list()
    }
}
