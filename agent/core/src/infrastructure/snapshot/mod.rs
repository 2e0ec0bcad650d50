// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Snapshot Infrastructure Module
//!
//! Concrete [`SnapshotStore`] implementations for the volume registry.

pub mod json_file;

pub use json_file::JsonFileSnapshotStore;

use crate::domain::snapshot::SnapshotStore;
use std::path::PathBuf;
use std::sync::Arc;

/// Snapshot backend configuration
#[derive(Debug, Clone)]
pub enum SnapshotBackend {
    /// JSON file on local disk (production)
    JsonFile { path: PathBuf },

    /// In-memory store for testing
    Memory,
}

/// Factory function to create a snapshot store from configuration
pub fn create_snapshot_store(backend: SnapshotBackend) -> Arc<dyn SnapshotStore> {
    match backend {
        SnapshotBackend::JsonFile { path } => Arc::new(JsonFileSnapshotStore::new(path)),
        SnapshotBackend::Memory => Arc::new(mock::InMemorySnapshotStore::new()),
    }
}

// Re-export InMemorySnapshotStore for testing
pub use mock::InMemorySnapshotStore;

mod mock {
    use crate::domain::snapshot::{RegistrySnapshot, SnapshotError, SnapshotStore};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Snapshot store kept in memory, with switchable write failures
    #[derive(Default)]
    pub struct InMemorySnapshotStore {
        snapshot: Mutex<Option<RegistrySnapshot>>,
        fail_saves: AtomicBool,
        saves: AtomicUsize,
    }

    impl InMemorySnapshotStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make subsequent `save` calls fail
        pub fn fail_saves(&self, fail: bool) {
            self.fail_saves.store(fail, Ordering::SeqCst);
        }

        /// Number of successful saves
        pub fn save_count(&self) -> usize {
            self.saves.load(Ordering::SeqCst)
        }

        /// Last successfully saved snapshot
        pub fn current(&self) -> Option<RegistrySnapshot> {
            self.snapshot.lock().clone()
        }
    }

    #[async_trait]
    impl SnapshotStore for InMemorySnapshotStore {
        async fn load(&self) -> Result<Option<RegistrySnapshot>, SnapshotError> {
            Ok(self.snapshot.lock().clone())
        }

        async fn save(&self, snapshot: &RegistrySnapshot) -> Result<(), SnapshotError> {
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(SnapshotError::Io {
                    path: PathBuf::from("memory"),
                    source: std::io::Error::other("simulated write failure"),
                });
            }
            *self.snapshot.lock() = Some(snapshot.clone());
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
