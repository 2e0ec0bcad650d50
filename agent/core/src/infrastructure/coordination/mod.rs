// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Coordination Infrastructure Module
//!
//! [`CoordinationClient`](crate::domain::coordination::CoordinationClient)
//! implementations: etcd for production, an in-process store shared by
//! several agents for tests.

pub mod etcd;
pub mod memory;

pub use etcd::EtcdCoordinationClient;
pub use memory::InMemoryCoordinationStore;
