// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent daemon
//!
//! Handles:
//! - Service wiring (registry, etcd client, driver, watch loop)
//! - Plugin socket lifecycle
//! - Graceful shutdown

pub mod server;

pub use server::run_agent;
