// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Event Propagation
//!
//! Outbound: [`EventPropagator::announce`] publishes one [`PropagationEvent`]
//! to the shared coordination key. Failures are logged and swallowed; the
//! local mutation that triggered the announcement has already committed.
//!
//! Inbound: [`WatchLoop`] watches the same key and replays every event into
//! the local registry, then asks the container runtime to materialize or
//! destroy its own volume object. The publisher sees its own events too;
//! those replays hit `AlreadyExists` / `NotFound` and are no-ops.
//!
//! # Runtime callback
//!
//! `docker volume create` and `docker volume rm` call back into this agent's
//! plugin endpoint. The loop therefore releases the registry lock before
//! running them and leaves a pending marker so the driver acknowledges the
//! callback instead of rejecting it.

use crate::application::volume_registry::SharedRegistry;
use crate::domain::command::{CommandExecutor, HostCommand};
use crate::domain::coordination::{CoordinationClient, CoordinationError};
use crate::domain::events::{EventAction, PropagationEvent};
use crate::domain::volume::VolumeError;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound on the reconnect delay
pub const MAX_WATCH_BACKOFF: Duration = Duration::from_secs(30);

// ============================================================================
// Outbound
// ============================================================================

pub struct EventPropagator {
    client: Arc<dyn CoordinationClient>,
    key: String,
}

impl EventPropagator {
    pub fn new(client: Arc<dyn CoordinationClient>, key: impl Into<String>) -> Self {
        Self {
            client,
            key: key.into(),
        }
    }

    /// Publish `event`; returns whether the store accepted it
    pub async fn announce(&self, event: &PropagationEvent) -> bool {
        let payload = match event.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to encode propagation event");
                return false;
            }
        };

        match self.client.publish(&self.key, &payload).await {
            Ok(()) => {
                debug!(action = %event.action, volume = %event.mount_name, "Event announced");
                true
            }
            Err(e) => {
                warn!(
                    action = %event.action,
                    volume = %event.mount_name,
                    error = %e,
                    "Failed to announce event, other hosts will not see this change"
                );
                false
            }
        }
    }
}

// ============================================================================
// Health
// ============================================================================

/// Watch loop status, as reported on `/health`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WatchStatus {
    Starting,
    Running,
    Reconnecting { attempt: u32 },
    Stopped { reason: String },
    Failed { reason: String },
}

impl WatchStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Shared, observable watch loop status
#[derive(Clone)]
pub struct WatchHealth {
    sender: Arc<watch::Sender<WatchStatus>>,
}

impl WatchHealth {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(WatchStatus::Starting);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn set(&self, status: WatchStatus) {
        self.sender.send_replace(status);
    }

    pub fn current(&self) -> WatchStatus {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WatchStatus> {
        self.sender.subscribe()
    }
}

impl Default for WatchHealth {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Inbound
// ============================================================================

#[derive(Debug, Clone)]
pub struct WatchSettings {
    /// Coordination key to watch
    pub key: String,
    /// Driver name passed to `docker volume create --driver`
    pub driver_name: String,
    /// Re-establishment attempts after a failure; 0 stops on the first failure
    pub reconnect_attempts: u32,
    pub backoff_initial: Duration,
}

impl WatchSettings {
    /// Delay before reconnect `attempt` (1-based), doubling up to the cap
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff_initial
            .saturating_mul(1u32 << exponent)
            .min(MAX_WATCH_BACKOFF)
    }
}

/// What replaying one event did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// The registry changed; the runtime command ran with this result
    Applied { command_succeeded: bool },
    /// Already in the requested state (own event or duplicate delivery)
    NoOp,
    /// Undecodable or invalid event, nothing changed
    Rejected,
}

pub struct WatchLoop {
    client: Arc<dyn CoordinationClient>,
    registry: SharedRegistry,
    executor: Arc<dyn CommandExecutor>,
    settings: WatchSettings,
    health: WatchHealth,
    shutdown_token: CancellationToken,
}

impl WatchLoop {
    pub fn new(
        client: Arc<dyn CoordinationClient>,
        registry: SharedRegistry,
        executor: Arc<dyn CommandExecutor>,
        settings: WatchSettings,
    ) -> Self {
        Self {
            client,
            registry,
            executor,
            settings,
            health: WatchHealth::new(),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn health(&self) -> WatchHealth {
        self.health.clone()
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Start the watch loop background task
    ///
    /// The handle resolves to `Ok(())` after shutdown, or to the watch
    /// failure that stopped the loop.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<Result<(), CoordinationError>> {
        tokio::spawn(async move { self.run().await })
    }

    pub async fn run(&self) -> Result<(), CoordinationError> {
        info!(
            key = %self.settings.key,
            reconnect_attempts = self.settings.reconnect_attempts,
            "Starting watch loop"
        );
        self.health.set(WatchStatus::Starting);

        // Last revision this host has caught up to; the next watch resumes after it
        let mut last_revision: Option<i64> = None;
        let mut attempt: u32 = 0;

        loop {
            let start_revision = last_revision.map(|r| r + 1);
            let opened = tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    self.stopped();
                    return Ok(());
                }
                opened = self.client.watch(&self.settings.key, start_revision) => opened,
            };

            let failure = match opened {
                Ok(watch) => {
                    if last_revision.is_none() {
                        last_revision = Some(watch.revision);
                    }
                    let mut stream = watch.stream;
                    self.health.set(WatchStatus::Running);
                    attempt = 0;
                    loop {
                        let next = tokio::select! {
                            _ = self.shutdown_token.cancelled() => {
                                self.stopped();
                                return Ok(());
                            }
                            next = stream.next() => next,
                        };
                        match next {
                            Some(Ok(notification)) => {
                                last_revision = Some(notification.revision);
                                self.replay_payload(&notification.value).await;
                            }
                            Some(Err(e)) => break e,
                            None => {
                                break CoordinationError::WatchFailed {
                                    key: self.settings.key.clone(),
                                    reason: "watch stream ended".to_string(),
                                }
                            }
                        }
                    }
                }
                Err(e) => e,
            };

            if attempt >= self.settings.reconnect_attempts {
                error!(error = %failure, "Watch failed, remote changes will no longer be applied");
                self.health.set(WatchStatus::Failed {
                    reason: failure.to_string(),
                });
                return Err(failure);
            }

            attempt += 1;
            let delay = self.settings.backoff(attempt);
            warn!(
                error = %failure,
                attempt,
                delay_ms = delay.as_millis() as u64,
                ?last_revision,
                "Watch failed, reconnecting"
            );
            self.health.set(WatchStatus::Reconnecting { attempt });

            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    self.stopped();
                    return Ok(());
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn stopped(&self) {
        info!("Shutdown signal received, stopping watch loop");
        self.health.set(WatchStatus::Stopped {
            reason: "shutdown requested".to_string(),
        });
    }

    /// Decode and replay one raw notification value
    pub async fn replay_payload(&self, payload: &str) -> ReplayOutcome {
        match PropagationEvent::from_payload(payload) {
            Ok(event) => self.replay(&event).await,
            Err(e) => {
                warn!(error = %e, payload = %payload, "Skipping undecodable event");
                ReplayOutcome::Rejected
            }
        }
    }

    /// Apply one event to the local registry and the container runtime
    pub async fn replay(&self, event: &PropagationEvent) -> ReplayOutcome {
        match event.action {
            EventAction::Create => self.replay_create(event).await,
            EventAction::Remove => self.replay_remove(event).await,
        }
    }

    async fn replay_create(&self, event: &PropagationEvent) -> ReplayOutcome {
        let mount_name = event.mount_name.as_str();
        let Some(backing_name) = event.backing_name() else {
            warn!(volume = %mount_name, "Create event without a backing volume name, skipping");
            return ReplayOutcome::Rejected;
        };

        {
            let mut registry = self.registry.lock().await;
            match registry.create(mount_name, backing_name).await {
                Ok(committed) => {
                    committed.into_value();
                    registry.mark_pending_materialize(mount_name, backing_name);
                }
                Err(VolumeError::AlreadyExists(_)) => {
                    debug!(volume = %mount_name, "Volume already registered, ignoring create event");
                    return ReplayOutcome::NoOp;
                }
                Err(e) => {
                    warn!(volume = %mount_name, error = %e, "Failed to replay create event");
                    return ReplayOutcome::Rejected;
                }
            }
        }

        info!(volume = %mount_name, backing = %backing_name, "Replayed remote volume create");
        let command =
            HostCommand::materialize(&self.settings.driver_name, backing_name, mount_name);
        let command_succeeded = self.run_command(&command).await;

        self.registry.lock().await.clear_pending_materialize(mount_name);
        ReplayOutcome::Applied { command_succeeded }
    }

    async fn replay_remove(&self, event: &PropagationEvent) -> ReplayOutcome {
        let mount_name = event.mount_name.as_str();

        {
            let mut registry = self.registry.lock().await;
            match registry.remove(mount_name).await {
                Ok(committed) => {
                    let record = committed.into_value();
                    if record.is_mounted() {
                        warn!(
                            volume = %mount_name,
                            connections = record.connections,
                            "Remote remove of a volume still mounted on this host"
                        );
                    }
                    registry.mark_pending_destroy(mount_name);
                }
                Err(VolumeError::NotFound(_)) => {
                    debug!(volume = %mount_name, "Volume not registered, ignoring remove event");
                    return ReplayOutcome::NoOp;
                }
                Err(e) => {
                    warn!(volume = %mount_name, error = %e, "Failed to replay remove event");
                    return ReplayOutcome::Rejected;
                }
            }
        }

        info!(volume = %mount_name, "Replayed remote volume remove");
        let command = HostCommand::destroy(mount_name);
        let command_succeeded = self.run_command(&command).await;

        self.registry.lock().await.clear_pending_destroy(mount_name);
        ReplayOutcome::Applied { command_succeeded }
    }

    async fn run_command(&self, command: &HostCommand) -> bool {
        match self.executor.execute(command).await {
            Ok(()) => true,
            Err(e) => {
                warn!(command = %command, error = %e, "Runtime command failed, not retried");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::volume_registry::VolumeRegistry;
    use crate::domain::command::CommandKind;
    use crate::infrastructure::command::RecordingCommandExecutor;
    use crate::infrastructure::coordination::InMemoryCoordinationStore;
    use crate::infrastructure::snapshot::InMemorySnapshotStore;
    use tempfile::TempDir;

    const KEY: &str = "/docker/gluster/volume/plugin/event";

    struct Fixture {
        _dir: TempDir,
        store: InMemoryCoordinationStore,
        registry: SharedRegistry,
        executor: Arc<RecordingCommandExecutor>,
        watch_loop: Arc<WatchLoop>,
    }

    fn fixture(reconnect_attempts: u32) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = InMemoryCoordinationStore::with_default_capacity();
        let registry: SharedRegistry = Arc::new(tokio::sync::Mutex::new(VolumeRegistry::new(
            dir.path(),
            Arc::new(InMemorySnapshotStore::new()),
        )));
        let executor = Arc::new(RecordingCommandExecutor::new());
        let watch_loop = Arc::new(WatchLoop::new(
            Arc::new(store.clone()),
            registry.clone(),
            executor.clone(),
            WatchSettings {
                key: KEY.to_string(),
                driver_name: "glusterfs".to_string(),
                reconnect_attempts,
                backoff_initial: Duration::from_millis(10),
            },
        ));
        Fixture {
            _dir: dir,
            store,
            registry,
            executor,
            watch_loop,
        }
    }

    async fn wait_for(health: &WatchHealth, predicate: impl Fn(&WatchStatus) -> bool) {
        let mut receiver = health.subscribe();
        tokio::time::timeout(Duration::from_secs(5), receiver.wait_for(|s| predicate(s)))
            .await
            .expect("timed out waiting for watch status")
            .expect("health channel closed");
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let settings = WatchSettings {
            key: KEY.to_string(),
            driver_name: "glusterfs".to_string(),
            reconnect_attempts: 10,
            backoff_initial: Duration::from_secs(1),
        };
        assert_eq!(settings.backoff(1), Duration::from_secs(1));
        assert_eq!(settings.backoff(2), Duration::from_secs(2));
        assert_eq!(settings.backoff(4), Duration::from_secs(8));
        assert_eq!(settings.backoff(10), MAX_WATCH_BACKOFF);
    }

    #[tokio::test]
    async fn test_replay_create_registers_and_materializes() {
        let f = fixture(0);
        let outcome = f
            .watch_loop
            .replay(&PropagationEvent::create("data1", "export1"))
            .await;

        assert_eq!(outcome, ReplayOutcome::Applied { command_succeeded: true });
        let record = f.registry.lock().await.get("data1").unwrap();
        assert_eq!(record.backing_name, "export1");
        assert_eq!(record.connections, 0);
        assert_eq!(
            f.executor.executed(),
            vec![HostCommand::materialize("glusterfs", "export1", "data1")]
        );
        assert!(!f.registry.lock().await.is_pending_materialize("data1", "export1"));
    }

    #[tokio::test]
    async fn test_replay_create_of_existing_volume_is_noop() {
        let f = fixture(0);
        f.registry
            .lock()
            .await
            .create("data1", "export1")
            .await
            .unwrap()
            .into_value();

        let outcome = f
            .watch_loop
            .replay(&PropagationEvent::create("data1", "export1"))
            .await;
        assert_eq!(outcome, ReplayOutcome::NoOp);
        assert!(f.executor.executed().is_empty());
    }

    #[tokio::test]
    async fn test_replay_remove() {
        let f = fixture(0);
        f.watch_loop
            .replay(&PropagationEvent::create("data1", "export1"))
            .await;

        let outcome = f.watch_loop.replay(&PropagationEvent::remove("data1")).await;
        assert_eq!(outcome, ReplayOutcome::Applied { command_succeeded: true });
        assert!(!f.registry.lock().await.contains("data1"));
        assert_eq!(f.executor.count(CommandKind::DestroyVolume), 1);

        let outcome = f.watch_loop.replay(&PropagationEvent::remove("data1")).await;
        assert_eq!(outcome, ReplayOutcome::NoOp);
        assert_eq!(f.executor.count(CommandKind::DestroyVolume), 1);
    }

    #[tokio::test]
    async fn test_failed_runtime_command_is_not_rolled_back() {
        let f = fixture(0);
        f.executor.set_failing(CommandKind::MaterializeVolume, true);

        let outcome = f
            .watch_loop
            .replay(&PropagationEvent::create("data1", "export1"))
            .await;
        assert_eq!(outcome, ReplayOutcome::Applied { command_succeeded: false });
        assert!(f.registry.lock().await.contains("data1"));
    }

    #[tokio::test]
    async fn test_bad_payloads_are_rejected() {
        let f = fixture(0);
        assert_eq!(f.watch_loop.replay_payload("not json").await, ReplayOutcome::Rejected);
        assert_eq!(
            f.watch_loop
                .replay_payload(r#"{"action":"create","mount_name":"data1"}"#)
                .await,
            ReplayOutcome::Rejected
        );
        assert!(f.registry.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_announce_reports_store_failure() {
        let store = InMemoryCoordinationStore::with_default_capacity();
        let propagator = EventPropagator::new(Arc::new(store.clone()), KEY);

        assert!(propagator.announce(&PropagationEvent::remove("data1")).await);
        store.set_publish_failure(true);
        assert!(!propagator.announce(&PropagationEvent::remove("data1")).await);
    }

    #[tokio::test]
    async fn test_loop_applies_published_events() {
        let f = fixture(0);
        let health = f.watch_loop.health();
        let handle = f.watch_loop.clone().start();
        wait_for(&health, |s| *s == WatchStatus::Running).await;

        let propagator = EventPropagator::new(Arc::new(f.store.clone()), KEY);
        propagator
            .announce(&PropagationEvent::create("data1", "export1"))
            .await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while f.executor.count(CommandKind::MaterializeVolume) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(f.registry.lock().await.contains("data1"));

        f.watch_loop.shutdown_token().cancel();
        assert!(handle.await.unwrap().is_ok());
        assert!(matches!(health.current(), WatchStatus::Stopped { .. }));
    }

    #[tokio::test]
    async fn test_watch_failure_without_reconnect_marks_health_failed() {
        let f = fixture(0);
        let health = f.watch_loop.health();
        let handle = f.watch_loop.clone().start();
        wait_for(&health, |s| *s == WatchStatus::Running).await;

        f.store.fail_watchers("connection reset");
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(CoordinationError::WatchFailed { .. })));
        assert!(health.current().is_failed());
    }

    #[tokio::test]
    async fn test_reconnect_resumes_after_last_revision() {
        let f = fixture(3);
        let health = f.watch_loop.health();
        let handle = f.watch_loop.clone().start();
        wait_for(&health, |s| *s == WatchStatus::Running).await;

        f.store
            .publish(KEY, &PropagationEvent::create("data1", "export1").to_payload().unwrap())
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while f.executor.count(CommandKind::MaterializeVolume) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        f.store.fail_watchers("connection reset");
        f.store
            .publish(KEY, &PropagationEvent::create("data2", "export2").to_payload().unwrap())
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while !f.registry.lock().await.contains("data2") {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        // data1 was not replayed a second time after the reconnect
        assert_eq!(f.executor.count(CommandKind::MaterializeVolume), 2);

        f.watch_loop.shutdown_token().cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_reconnect_before_first_event_keeps_outage_events() {
        let f = fixture(3);
        f.store
            .publish(KEY, &PropagationEvent::create("old", "export0").to_payload().unwrap())
            .await
            .unwrap();

        let health = f.watch_loop.health();
        let handle = f.watch_loop.clone().start();
        wait_for(&health, |s| *s == WatchStatus::Running).await;

        f.store.fail_watchers("connection reset");
        f.store
            .publish(KEY, &PropagationEvent::create("outage", "export1").to_payload().unwrap())
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while !f.registry.lock().await.contains("outage") {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        // Changes from before the first watch are not replayed
        assert!(!f.registry.lock().await.contains("old"));
        assert_eq!(f.executor.count(CommandKind::MaterializeVolume), 1);

        f.watch_loop.shutdown_token().cancel();
        assert!(handle.await.unwrap().is_ok());
    }
}
