// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod event_propagator;
pub mod volume_driver;
pub mod volume_registry;

// Re-export services for convenience
pub use event_propagator::{
    EventPropagator, ReplayOutcome, WatchHealth, WatchLoop, WatchSettings, WatchStatus,
};
pub use volume_driver::{DriverSettings, VolumeDriver, VolumeScope};
pub use volume_registry::{Committed, SharedRegistry, VolumeRegistry};
