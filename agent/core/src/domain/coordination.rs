// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Coordination Client Trait - Anti-Corruption Layer for the shared KV store
//!
//! Agents only need two primitives from the cluster store: set a key, and
//! watch a key for changes. All propagation events share one well-known
//! key, so every agent (including the publisher) sees every event.

use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// One observed change of the watched key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchNotification {
    /// Store revision at which the value was written
    pub revision: i64,
    /// The new value
    pub value: String,
}

/// Infinite stream of notifications
///
/// Blocks between notifications. A transport failure yields exactly one
/// `Err(CoordinationError::WatchFailed)` and then the stream ends.
pub type WatchStream =
    Pin<Box<dyn Stream<Item = Result<WatchNotification, CoordinationError>> + Send>>;

/// An open watch and the point it starts from
pub struct EstablishedWatch {
    /// Store revision when the watch was established
    ///
    /// A watch opened without a start revision delivers every change after
    /// this one, so it is the resume point until a notification arrives.
    pub revision: i64,
    pub stream: WatchStream,
}

#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Set `key` to `payload`; bounded by the client's request timeout
    async fn publish(&self, key: &str, payload: &str) -> Result<(), CoordinationError>;

    /// Watch `key` for changes
    ///
    /// With `start_revision` set, changes at or after that revision are
    /// delivered first (used to resume after a reconnect). Without it, only
    /// changes made after the watch is established are delivered.
    async fn watch(
        &self,
        key: &str,
        start_revision: Option<i64>,
    ) -> Result<EstablishedWatch, CoordinationError>;
}

#[derive(Debug, Clone, Error)]
pub enum CoordinationError {
    #[error("failed to publish to {key}: {reason}")]
    Publish { key: String, reason: String },

    #[error("coordination request timed out after {0:?}")]
    Timeout(Duration),

    #[error("watch on {key} failed: {reason}")]
    WatchFailed { key: String, reason: String },

    #[error("invalid response from coordination store: {0}")]
    InvalidResponse(String),

    #[error("no coordination store endpoints configured")]
    NoEndpoints,
}
