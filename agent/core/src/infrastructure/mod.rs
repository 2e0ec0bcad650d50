// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod command;
pub mod coordination;
pub mod snapshot;

pub use command::{RecordingCommandExecutor, ShellCommandExecutor};
pub use coordination::{EtcdCoordinationClient, InMemoryCoordinationStore};
pub use snapshot::{InMemorySnapshotStore, JsonFileSnapshotStore};
