// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! JSON File Snapshot Store
//!
//! Persists the registry as one JSON object keyed by mount name:
//!
//! ```json
//! {"data1": {"name": "export1", "mount_name": "data1",
//!            "mount_path": "/var/lib/docker/volumes/glusterfs/data1",
//!            "connections": 0}}
//! ```
//!
//! Writes go to `<file>.tmp` (mode 0600), are fsynced, then renamed over the
//! target so a crash never leaves a truncated snapshot.

use crate::domain::snapshot::{RegistrySnapshot, SnapshotError, SnapshotStore};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub struct JsonFileSnapshotStore {
    path: PathBuf,
}

impl JsonFileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn io_error(&self, source: std::io::Error) -> SnapshotError {
        SnapshotError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl SnapshotStore for JsonFileSnapshotStore {
    async fn load(&self) -> Result<Option<RegistrySnapshot>, SnapshotError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "No snapshot file, starting empty");
                return Ok(None);
            }
            Err(e) => return Err(self.io_error(e)),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        // `null` is what an empty map serialized by older agents looks like
        let snapshot: Option<RegistrySnapshot> =
            serde_json::from_slice(&bytes).map_err(|e| SnapshotError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        Ok(Some(snapshot.unwrap_or_default()))
    }

    async fn save(&self, snapshot: &RegistrySnapshot) -> Result<(), SnapshotError> {
        let encoded = serde_json::to_vec(snapshot)?;
        let temp_path = self.temp_path();

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&temp_path)
            .await
            .map_err(|e| self.io_error(e))?;
        file.write_all(&encoded).await.map_err(|e| self.io_error(e))?;
        file.sync_all().await.map_err(|e| self.io_error(e))?;
        drop(file);

        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        debug!(path = ?self.path, volumes = snapshot.len(), "Snapshot written");
        Ok(())
    }
}
