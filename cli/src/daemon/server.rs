// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent server: wires the services together and serves the plugin socket

use anyhow::{Context, Result};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use gluster_sync_core::{
    application::{
        DriverSettings, EventPropagator, SharedRegistry, VolumeDriver, VolumeRegistry,
        WatchLoop, WatchSettings,
    },
    domain::agent_config::AgentConfig,
    infrastructure::{
        snapshot::{create_snapshot_store, SnapshotBackend},
        EtcdCoordinationClient, ShellCommandExecutor,
    },
    presentation::plugin_api,
};

pub async fn run_agent(config: AgentConfig) -> Result<()> {
    config
        .validate()
        .context("Configuration validation failed")?;

    info!(
        plugin = %config.plugin_id,
        servers = ?config.servers,
        etcd = ?config.etcd_endpoints,
        base_dir = ?config.base_dir,
        "gluster-sync agent starting"
    );

    // Initialize services
    let snapshot_store = create_snapshot_store(SnapshotBackend::JsonFile {
        path: config.state_file.clone(),
    });
    let registry = VolumeRegistry::open(&config.base_dir, snapshot_store)
        .await
        .with_context(|| format!("Failed to restore volume registry from {:?}", config.state_file))?;
    let registry: SharedRegistry = Arc::new(tokio::sync::Mutex::new(registry));

    let coordination = Arc::new(
        EtcdCoordinationClient::new(config.etcd_endpoints.clone(), config.request_timeout)
            .context("Failed to create etcd client")?,
    );
    let executor = Arc::new(ShellCommandExecutor::new());

    let propagator = Arc::new(EventPropagator::new(
        coordination.clone(),
        config.event_key.clone(),
    ));
    let driver = Arc::new(VolumeDriver::new(
        registry.clone(),
        executor.clone(),
        propagator,
        DriverSettings {
            servers: config.servers.clone(),
            unmount_failure_policy: config.unmount_failure_policy,
        },
    ));

    let watch_loop = Arc::new(WatchLoop::new(
        coordination,
        registry,
        executor,
        WatchSettings {
            key: config.event_key.clone(),
            driver_name: config.plugin_id.clone(),
            reconnect_attempts: config.watch_reconnect_attempts,
            backoff_initial: config.watch_backoff_initial,
        },
    ));
    let health = watch_loop.health();
    let watch_shutdown = watch_loop.shutdown_token();

    // The server stops when the watch loop does, whatever the reason
    let server_shutdown = CancellationToken::new();
    let watch_task = {
        let server_shutdown = server_shutdown.clone();
        let handle = watch_loop.start();
        tokio::spawn(async move {
            let result = handle.await;
            server_shutdown.cancel();
            result
        })
    };

    let socket_path = config.socket_path();
    let listener = bind_plugin_socket(&socket_path)?;
    info!("Plugin listening on {}", socket_path.display());

    let app = plugin_api::app(driver, health);
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(server_shutdown))
        .await
        .context("Plugin server failed");

    info!("Agent shutting down");
    watch_shutdown.cancel();
    let watch_result = watch_task
        .await
        .context("Watch supervisor task panicked")?
        .context("Watch loop task panicked")?;

    if let Err(e) = std::fs::remove_file(&socket_path) {
        warn!("Failed to remove plugin socket {}: {}", socket_path.display(), e);
    }

    serve_result?;
    watch_result.context("Watch loop failed, remote changes are no longer applied")?;
    Ok(())
}

/// Bind the plugin socket, replacing a stale one from a previous run
pub fn bind_plugin_socket(path: &Path) -> Result<UnixListener> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create socket directory {}", dir.display()))?;
    }

    match std::fs::remove_file(path) {
        Ok(()) => info!("Removed stale plugin socket {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to remove stale socket {}", path.display()))
        }
    }

    let listener = UnixListener::bind(path)
        .with_context(|| format!("Failed to bind to {}", path.display()))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o660))
        .with_context(|| format!("Failed to set permissions on {}", path.display()))?;

    Ok(listener)
}

async fn shutdown_signal(stop: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
        _ = stop.cancelled() => {
            warn!("Watch loop stopped, shutting down plugin server");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("plugins").join("glusterfs.sock");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"stale").unwrap();

        let _listener = bind_plugin_socket(&path).unwrap();
        let metadata = std::fs::metadata(&path).unwrap();
        assert_eq!(metadata.permissions().mode() & 0o777, 0o660);
    }

    #[tokio::test]
    async fn test_run_agent_rejects_invalid_config() {
        let result = run_agent(AgentConfig::default()).await;
        assert!(result.is_err());
    }
}
