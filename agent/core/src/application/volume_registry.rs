// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Volume Registry
//!
//! Authoritative per-host map of mount name to [`VolumeRecord`]. Every
//! mutation is written through to the [`SnapshotStore`] before it returns.
//! A failed write does not undo the mutation; it is reported alongside the
//! committed value as a [`Committed::persistence_warning`].
//!
//! The registry is not synchronised on its own. The driver and the watch
//! loop share one [`SharedRegistry`] and hold its lock for the whole of
//! each operation, snapshot write included.

use crate::domain::snapshot::{SnapshotError, SnapshotStore};
use crate::domain::volume::{mount_point_for, validate_mount_name, VolumeError, VolumeRecord};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The single mutual-exclusion domain shared by the driver and the watch loop
pub type SharedRegistry = Arc<tokio::sync::Mutex<VolumeRegistry>>;

/// A committed mutation and the outcome of persisting it
#[must_use]
#[derive(Debug)]
pub struct Committed<T> {
    pub value: T,
    pub persistence_warning: Option<SnapshotError>,
}

impl<T> Committed<T> {
    /// Unwrap the value, logging a failed snapshot write
    pub fn into_value(self) -> T {
        if let Some(error) = &self.persistence_warning {
            warn!(error = %error, "Registry change committed but snapshot write failed");
        }
        self.value
    }
}

pub struct VolumeRegistry {
    base_dir: PathBuf,
    volumes: BTreeMap<String, VolumeRecord>,
    store: Arc<dyn SnapshotStore>,
    /// Replayed creates awaiting the runtime's callback: mount name -> backing name
    pending_materialize: HashMap<String, String>,
    /// Replayed removes awaiting the runtime's callback
    pending_destroy: HashSet<String>,
}

impl VolumeRegistry {
    /// Empty registry; nothing is read from `store`
    pub fn new(base_dir: impl Into<PathBuf>, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            base_dir: base_dir.into(),
            volumes: BTreeMap::new(),
            store,
            pending_materialize: HashMap::new(),
            pending_destroy: HashSet::new(),
        }
    }

    /// Restore the registry from the last snapshot
    ///
    /// Mount points are re-derived from `base_dir`; persisted paths that
    /// disagree are logged and replaced.
    pub async fn open(
        base_dir: impl Into<PathBuf>,
        store: Arc<dyn SnapshotStore>,
    ) -> Result<Self, VolumeError> {
        let mut registry = Self::new(base_dir, store);

        let snapshot = match registry.store.load().await {
            Ok(snapshot) => snapshot,
            Err(SnapshotError::Corrupt { path, reason }) => {
                return Err(VolumeError::CorruptState(format!(
                    "{}: {}",
                    path.display(),
                    reason
                )));
            }
            Err(e) => return Err(VolumeError::CorruptState(e.to_string())),
        };

        let Some(snapshot) = snapshot else {
            info!(base_dir = ?registry.base_dir, "No persisted volumes, starting empty");
            return Ok(registry);
        };

        for (mount_name, mut record) in snapshot {
            if record.mount_name != mount_name {
                warn!(
                    key = %mount_name,
                    record = %record.mount_name,
                    "Persisted record name disagrees with its key, using the key"
                );
                record.mount_name = mount_name.clone();
            }
            let derived = mount_point_for(&registry.base_dir, &mount_name);
            if record.mount_point != derived {
                warn!(
                    volume = %mount_name,
                    persisted = ?record.mount_point,
                    derived = ?derived,
                    "Persisted mount path ignored"
                );
                record.mount_point = derived;
            }
            registry.volumes.insert(mount_name, record);
        }

        info!(volumes = registry.volumes.len(), "Volume registry restored");
        Ok(registry)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    pub fn contains(&self, mount_name: &str) -> bool {
        self.volumes.contains_key(mount_name)
    }

    /// Register a new volume and make sure its mount point exists
    pub async fn create(
        &mut self,
        mount_name: &str,
        backing_name: &str,
    ) -> Result<Committed<VolumeRecord>, VolumeError> {
        validate_mount_name(mount_name)?;
        if backing_name.trim().is_empty() {
            return Err(VolumeError::InvalidArgument(
                "backing volume name cannot be empty".to_string(),
            ));
        }
        if self.volumes.contains_key(mount_name) {
            return Err(VolumeError::AlreadyExists(mount_name.to_string()));
        }

        let record = VolumeRecord::new(&self.base_dir, mount_name, backing_name);
        ensure_directory(&record.mount_point).await?;

        self.volumes.insert(mount_name.to_string(), record.clone());
        debug!(volume = %mount_name, backing = %backing_name, "Volume registered");
        Ok(self.commit(record).await)
    }

    /// Forget a volume; the mount point directory is left in place
    pub async fn remove(&mut self, mount_name: &str) -> Result<Committed<VolumeRecord>, VolumeError> {
        let record = self
            .volumes
            .remove(mount_name)
            .ok_or_else(|| VolumeError::NotFound(mount_name.to_string()))?;
        debug!(volume = %mount_name, "Volume unregistered");
        Ok(self.commit(record).await)
    }

    pub fn get(&self, mount_name: &str) -> Result<VolumeRecord, VolumeError> {
        self.volumes
            .get(mount_name)
            .cloned()
            .ok_or_else(|| VolumeError::NotFound(mount_name.to_string()))
    }

    /// All records, ordered by mount name
    pub fn list(&self) -> Vec<VolumeRecord> {
        self.volumes.values().cloned().collect()
    }

    pub async fn increment_connections(
        &mut self,
        mount_name: &str,
    ) -> Result<Committed<u32>, VolumeError> {
        let count = {
            let record = self.record_mut(mount_name)?;
            record.connections = record.connections.saturating_add(1);
            record.connections
        };
        Ok(self.commit(count).await)
    }

    /// Decrement, saturating at zero
    pub async fn decrement_connections(
        &mut self,
        mount_name: &str,
    ) -> Result<Committed<u32>, VolumeError> {
        let count = {
            let record = self.record_mut(mount_name)?;
            record.connections = record.connections.saturating_sub(1);
            record.connections
        };
        Ok(self.commit(count).await)
    }

    pub async fn reset_connections(
        &mut self,
        mount_name: &str,
    ) -> Result<Committed<u32>, VolumeError> {
        self.record_mut(mount_name)?.connections = 0;
        Ok(self.commit(0).await)
    }

    // ------------------------------------------------------------------
    // In-flight replay bookkeeping
    // ------------------------------------------------------------------

    pub fn mark_pending_materialize(&mut self, mount_name: &str, backing_name: &str) {
        self.pending_materialize
            .insert(mount_name.to_string(), backing_name.to_string());
    }

    pub fn clear_pending_materialize(&mut self, mount_name: &str) {
        self.pending_materialize.remove(mount_name);
    }

    /// True if the watch loop is materializing `mount_name` backed by `backing_name`
    pub fn is_pending_materialize(&self, mount_name: &str, backing_name: &str) -> bool {
        self.pending_materialize
            .get(mount_name)
            .is_some_and(|pending| pending == backing_name)
    }

    pub fn mark_pending_destroy(&mut self, mount_name: &str) {
        self.pending_destroy.insert(mount_name.to_string());
    }

    pub fn clear_pending_destroy(&mut self, mount_name: &str) {
        self.pending_destroy.remove(mount_name);
    }

    pub fn is_pending_destroy(&self, mount_name: &str) -> bool {
        self.pending_destroy.contains(mount_name)
    }

    fn record_mut(&mut self, mount_name: &str) -> Result<&mut VolumeRecord, VolumeError> {
        self.volumes
            .get_mut(mount_name)
            .ok_or_else(|| VolumeError::NotFound(mount_name.to_string()))
    }

    async fn commit<T>(&self, value: T) -> Committed<T> {
        let persistence_warning = self.store.save(&self.volumes).await.err();
        Committed {
            value,
            persistence_warning,
        }
    }
}

async fn ensure_directory(path: &Path) -> Result<(), VolumeError> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true).mode(0o700);
    builder
        .create(path)
        .await
        .map_err(|source| VolumeError::DirectoryError {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::snapshot::{InMemorySnapshotStore, JsonFileSnapshotStore};
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> (VolumeRegistry, Arc<InMemorySnapshotStore>) {
        let store = Arc::new(InMemorySnapshotStore::new());
        (VolumeRegistry::new(dir.path(), store.clone()), store)
    }

    #[tokio::test]
    async fn test_create_registers_and_makes_directory() {
        let dir = TempDir::new().unwrap();
        let (mut registry, store) = registry(&dir);

        let record = registry.create("data1", "export1").await.unwrap().into_value();
        assert_eq!(record.mount_point, dir.path().join("data1"));
        assert_eq!(record.connections, 0);

        let mode = std::fs::metadata(&record.mount_point).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
        assert_eq!(store.current().unwrap()["data1"], record);
    }

    #[tokio::test]
    async fn test_create_existing_is_rejected_without_change() {
        let dir = TempDir::new().unwrap();
        let (mut registry, store) = registry(&dir);
        registry.create("data1", "export1").await.unwrap().into_value();

        let err = registry.create("data1", "export2").await.unwrap_err();
        assert!(matches!(err, VolumeError::AlreadyExists(_)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("data1").unwrap().backing_name, "export1");
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_path_names() {
        let dir = TempDir::new().unwrap();
        let (mut registry, _) = registry(&dir);
        for name in ["", "a/b", ".."] {
            assert!(matches!(
                registry.create(name, "export1").await,
                Err(VolumeError::InvalidArgument(_))
            ));
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_directory_failure_commits_nothing() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let store = Arc::new(InMemorySnapshotStore::new());
        let mut registry = VolumeRegistry::new(&blocker, store.clone());

        let err = registry.create("data1", "export1").await.unwrap_err();
        assert!(matches!(err, VolumeError::DirectoryError { .. }));
        assert!(registry.is_empty());
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_remove_keeps_directory() {
        let dir = TempDir::new().unwrap();
        let (mut registry, _) = registry(&dir);
        registry.create("data1", "export1").await.unwrap().into_value();

        registry.remove("data1").await.unwrap().into_value();
        assert!(!registry.contains("data1"));
        assert!(dir.path().join("data1").is_dir());
        assert!(matches!(
            registry.remove("data1").await,
            Err(VolumeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_connection_counter_saturates_at_zero() {
        let dir = TempDir::new().unwrap();
        let (mut registry, _) = registry(&dir);
        registry.create("data1", "export1").await.unwrap().into_value();

        assert_eq!(registry.increment_connections("data1").await.unwrap().into_value(), 1);
        assert_eq!(registry.increment_connections("data1").await.unwrap().into_value(), 2);
        assert_eq!(registry.decrement_connections("data1").await.unwrap().into_value(), 1);
        assert_eq!(registry.reset_connections("data1").await.unwrap().into_value(), 0);
        assert_eq!(registry.decrement_connections("data1").await.unwrap().into_value(), 0);
        assert!(matches!(
            registry.increment_connections("ghost").await,
            Err(VolumeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_persistence_failure_is_a_warning() {
        let dir = TempDir::new().unwrap();
        let (mut registry, store) = registry(&dir);
        store.fail_saves(true);

        let committed = registry.create("data1", "export1").await.unwrap();
        assert!(committed.persistence_warning.is_some());
        assert!(registry.contains("data1"));
    }

    #[tokio::test]
    async fn test_reopen_restores_state_and_rederives_paths() {
        let dir = TempDir::new().unwrap();
        let state_file = dir.path().join("state.json");
        let store: Arc<dyn SnapshotStore> = Arc::new(JsonFileSnapshotStore::new(&state_file));

        let mut registry = VolumeRegistry::new(dir.path().join("old"), store.clone());
        registry.create("data1", "export1").await.unwrap().into_value();
        registry.increment_connections("data1").await.unwrap().into_value();
        registry.create("data2", "export2").await.unwrap().into_value();

        let reopened = VolumeRegistry::open(dir.path().join("new"), store).await.unwrap();
        assert_eq!(reopened.len(), 2);
        let record = reopened.get("data1").unwrap();
        assert_eq!(record.backing_name, "export1");
        assert_eq!(record.connections, 1);
        assert_eq!(record.mount_point, dir.path().join("new").join("data1"));
    }

    #[tokio::test]
    async fn test_open_corrupt_snapshot_fails() {
        let dir = TempDir::new().unwrap();
        let state_file = dir.path().join("state.json");
        std::fs::write(&state_file, "[[[").unwrap();

        let result =
            VolumeRegistry::open(dir.path(), Arc::new(JsonFileSnapshotStore::new(&state_file)))
                .await;
        assert!(matches!(result, Err(VolumeError::CorruptState(_))));
    }

    #[tokio::test]
    async fn test_pending_markers() {
        let dir = TempDir::new().unwrap();
        let (mut registry, _) = registry(&dir);

        registry.mark_pending_materialize("data1", "export1");
        assert!(registry.is_pending_materialize("data1", "export1"));
        assert!(!registry.is_pending_materialize("data1", "export2"));
        registry.clear_pending_materialize("data1");
        assert!(!registry.is_pending_materialize("data1", "export1"));

        registry.mark_pending_destroy("data1");
        assert!(registry.is_pending_destroy("data1"));
        registry.clear_pending_destroy("data1");
        assert!(!registry.is_pending_destroy("data1"));
    }
}
