// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// In-Memory Coordination Store
//
// Stands in for etcd when several agents run in one process: every clone
// shares the same revision counter, history and broadcast channel, so a
// publish from one agent reaches every watcher (its own included).
//
// History is kept so watches started with a revision can replay what they
// missed, matching etcd's start_revision semantics.

use crate::domain::coordination::{
    CoordinationClient, CoordinationError, EstablishedWatch, WatchNotification,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
enum StoreMessage {
    Put { key: String, notification: WatchNotification },
    Fail { reason: String },
}

struct StoreState {
    revision: i64,
    history: Vec<(String, WatchNotification)>,
}

#[derive(Clone)]
pub struct InMemoryCoordinationStore {
    sender: Arc<broadcast::Sender<StoreMessage>>,
    state: Arc<Mutex<StoreState>>,
    fail_publish: Arc<AtomicBool>,
}

impl InMemoryCoordinationStore {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
            state: Arc::new(Mutex::new(StoreState {
                revision: 0,
                history: Vec::new(),
            })),
            fail_publish: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a store with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Make subsequent publishes fail
    pub fn set_publish_failure(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Break every open watch, as if the store connection dropped
    pub fn fail_watchers(&self, reason: &str) {
        let _ = self.sender.send(StoreMessage::Fail {
            reason: reason.to_string(),
        });
    }

    /// Latest revision written
    pub fn revision(&self) -> i64 {
        self.state.lock().revision
    }
}

impl Default for InMemoryCoordinationStore {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[async_trait]
impl CoordinationClient for InMemoryCoordinationStore {
    async fn publish(&self, key: &str, payload: &str) -> Result<(), CoordinationError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(CoordinationError::Publish {
                key: key.to_string(),
                reason: "simulated store outage".to_string(),
            });
        }

        // Sending under the lock keeps history and live delivery in one order
        let mut state = self.state.lock();
        state.revision += 1;
        let notification = WatchNotification {
            revision: state.revision,
            value: payload.to_string(),
        };
        state.history.push((key.to_string(), notification.clone()));
        let receivers = self
            .sender
            .send(StoreMessage::Put {
                key: key.to_string(),
                notification,
            })
            .unwrap_or(0);
        debug!(key = %key, revision = state.revision, receivers, "Published to in-memory store");
        Ok(())
    }

    async fn watch(
        &self,
        key: &str,
        start_revision: Option<i64>,
    ) -> Result<EstablishedWatch, CoordinationError> {
        // Subscribing under the lock means nothing after `revision` is missed
        let (mut receiver, backlog, revision) = {
            let state = self.state.lock();
            let receiver = self.sender.subscribe();
            let backlog: Vec<WatchNotification> = match start_revision {
                Some(start) => state
                    .history
                    .iter()
                    .filter(|(k, n)| k == key && n.revision >= start)
                    .map(|(_, n)| n.clone())
                    .collect(),
                None => Vec::new(),
            };
            (receiver, backlog, state.revision)
        };

        let key = key.to_string();
        let stream = async_stream::stream! {
            let mut last_revision = 0;
            for notification in backlog {
                last_revision = notification.revision;
                yield Ok(notification);
            }
            loop {
                match receiver.recv().await {
                    Ok(StoreMessage::Put { key: k, notification }) => {
                        if k == key && notification.revision > last_revision {
                            last_revision = notification.revision;
                            yield Ok(notification);
                        }
                    }
                    Ok(StoreMessage::Fail { reason }) => {
                        yield Err(CoordinationError::WatchFailed { key: key.clone(), reason });
                        return;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Watch receiver lagged by {} events", n);
                        yield Err(CoordinationError::WatchFailed {
                            key: key.clone(),
                            reason: format!("lagged by {} events", n),
                        });
                        return;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        yield Err(CoordinationError::WatchFailed {
                            key: key.clone(),
                            reason: "store closed".to_string(),
                        });
                        return;
                    }
                }
            }
        };

        Ok(EstablishedWatch {
            revision,
            stream: Box::pin(stream),
        })
    }
}
