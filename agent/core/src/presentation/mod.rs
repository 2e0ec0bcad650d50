// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`gluster-sync-core`)
//!
//! HTTP surface that translates Docker plugin calls into driver calls.
//! **No business logic lives here**; all real work is delegated to
//! `crate::application::volume_driver`.
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`plugin_api`] | HTTP (Axum) over a Unix socket | Docker volume plugin protocol + `/health` |

pub mod plugin_api;
