// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! gluster-sync core
//!
//! Keeps a per-host registry of GlusterFS-backed Docker volumes in sync
//! across a cluster by broadcasting create/remove events through etcd.
//!
//! # Architecture
//!
//! - **`domain`**: records, events, configuration and collaborator traits
//! - **`application`**: volume registry, event propagation, driver facade
//! - **`infrastructure`**: snapshot file, etcd client, shell executor
//! - **`presentation`**: Docker volume plugin HTTP protocol

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
