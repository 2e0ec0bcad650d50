// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain Layer
//!
//! Volume records, propagation events, configuration, and the traits the
//! application layer depends on (snapshot store, coordination client,
//! command executor).
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Types and contracts with no I/O of their own

pub mod agent_config;
pub mod command;
pub mod coordination;
pub mod events;
pub mod snapshot;
pub mod volume;
