// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Snapshot Store Trait
//!
//! Durability contract for the volume registry: the whole mapping is written
//! and read as one unit. Implementations live in
//! `crate::infrastructure::snapshot`.

use crate::domain::volume::VolumeRecord;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// Full mapping of mount name to record, the unit of durability
pub type RegistrySnapshot = BTreeMap<String, VolumeRecord>;

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Read the durable snapshot
    ///
    /// # Returns
    /// * `Ok(None)` - nothing persisted yet, start empty
    /// * `Ok(Some(_))` - the last snapshot written
    /// * `Err(SnapshotError::Corrupt)` - data exists but cannot be decoded
    async fn load(&self) -> Result<Option<RegistrySnapshot>, SnapshotError>;

    /// Replace the durable snapshot with `snapshot`
    ///
    /// Must never leave a truncated or partially written snapshot behind.
    async fn save(&self, snapshot: &RegistrySnapshot) -> Result<(), SnapshotError>;
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("snapshot {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}
