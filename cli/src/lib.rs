// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! gluster-sync CLI library - exposes testable components
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Agent bootstrap, plugin socket serving and config commands

pub mod commands;
pub mod daemon;
pub mod settings;
