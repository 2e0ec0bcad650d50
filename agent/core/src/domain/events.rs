// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Propagation Events
//!
//! A [`PropagationEvent`] is one registry mutation broadcast to every agent
//! through the shared coordination key. It carries no sequence number and no
//! originator, so every agent (the publisher included) replays every event;
//! replay relies on the registry's `AlreadyExists` / `NotFound` checks to
//! stay idempotent.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    Create,
    Remove,
}

impl std::fmt::Display for EventAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Remove => write!(f, "remove"),
        }
    }
}

/// Wire format stored under the coordination key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationEvent {
    pub action: EventAction,

    /// Present for `create`; older agents publish it as `gluster_volume_name`
    #[serde(
        default,
        alias = "gluster_volume_name",
        skip_serializing_if = "Option::is_none"
    )]
    pub backing_name: Option<String>,

    pub mount_name: String,
}

impl PropagationEvent {
    pub fn create(mount_name: impl Into<String>, backing_name: impl Into<String>) -> Self {
        Self {
            action: EventAction::Create,
            backing_name: Some(backing_name.into()),
            mount_name: mount_name.into(),
        }
    }

    pub fn remove(mount_name: impl Into<String>) -> Self {
        Self {
            action: EventAction::Remove,
            backing_name: None,
            mount_name: mount_name.into(),
        }
    }

    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// Backing name of a create event, `None` if missing or blank
    pub fn backing_name(&self) -> Option<&str> {
        self.backing_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}
