// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Docker Volume Plugin Protocol
//!
//! HTTP surface Docker talks to over the plugin socket. Every endpoint is a
//! `POST` with a JSON body (possibly empty) and answers with
//! `application/vnd.docker.plugins.v1.2+json`. Failures are HTTP 500 with
//! `{"Err": "<message>"}`.
//!
//! | Endpoint | Request | Response |
//! |----------|---------|----------|
//! | `/Plugin.Activate` | - | `{"Implements": ["VolumeDriver"]}` |
//! | `/VolumeDriver.Create` | `{Name, Opts}` | `{"Err": ""}` |
//! | `/VolumeDriver.Remove` | `{Name}` | `{"Err": ""}` |
//! | `/VolumeDriver.Mount` | `{Name, ID}` | `{"Mountpoint", "Err"}` |
//! | `/VolumeDriver.Unmount` | `{Name, ID}` | `{"Err": ""}` |
//! | `/VolumeDriver.Path` | `{Name}` | `{"Mountpoint", "Err"}` |
//! | `/VolumeDriver.Get` | `{Name}` | `{"Volume": {..}, "Err"}` |
//! | `/VolumeDriver.List` | - | `{"Volumes": [..], "Err"}` |
//! | `/VolumeDriver.Capabilities` | - | `{"Capabilities": {"Scope"}}` |
//!
//! `GET /health` reports the watch loop status.

use crate::application::event_propagator::WatchHealth;
use crate::application::volume_driver::VolumeDriver;
use crate::domain::volume::{VolumeError, VolumeRecord};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1.2+json";

#[derive(Clone)]
pub struct PluginState {
    pub driver: Arc<VolumeDriver>,
    pub health: WatchHealth,
}

pub fn app(driver: Arc<VolumeDriver>, health: WatchHealth) -> Router {
    let state = PluginState { driver, health };

    Router::new()
        .route("/Plugin.Activate", post(activate_handler))
        .route("/VolumeDriver.Create", post(create_handler))
        .route("/VolumeDriver.Remove", post(remove_handler))
        .route("/VolumeDriver.Mount", post(mount_handler))
        .route("/VolumeDriver.Unmount", post(unmount_handler))
        .route("/VolumeDriver.Path", post(path_handler))
        .route("/VolumeDriver.Get", post(get_handler))
        .route("/VolumeDriver.List", post(list_handler))
        .route("/VolumeDriver.Capabilities", post(capabilities_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    opts: Option<HashMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NameRequest {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct MountRequest {
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "ID", default)]
    id: String,
}

/// A failed plugin call, rendered as `500 {"Err": ...}`
#[derive(Debug)]
pub struct PluginError(String);

impl From<VolumeError> for PluginError {
    fn from(err: VolumeError) -> Self {
        Self(err.to_string())
    }
}

impl IntoResponse for PluginError {
    fn into_response(self) -> Response {
        warn!(error = %self.0, "Plugin request failed");
        plugin_response(StatusCode::INTERNAL_SERVER_ERROR, json!({ "Err": self.0 }))
    }
}

fn plugin_response(status: StatusCode, body: Value) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)],
        Json(body),
    )
        .into_response()
}

fn ok(body: Value) -> Response {
    plugin_response(StatusCode::OK, body)
}

/// Decode a request body; Docker sends an empty body for argument-less calls
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, PluginError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| PluginError(format!("invalid request body: {}", e)))
}

fn volume_json(record: &VolumeRecord) -> Value {
    json!({
        "Name": record.mount_name,
        "Mountpoint": record.mount_point,
    })
}

// ============================================================================
// Handlers
// ============================================================================

async fn activate_handler(State(state): State<PluginState>) -> Response {
    debug!("Plugin activation requested");
    ok(json!({ "Implements": state.driver.activate() }))
}

async fn create_handler(
    State(state): State<PluginState>,
    body: Bytes,
) -> Result<Response, PluginError> {
    let request: CreateRequest = parse_body(&body)?;
    let options = request.opts.unwrap_or_default();
    state.driver.create(&request.name, &options).await?;
    Ok(ok(json!({ "Err": "" })))
}

async fn remove_handler(
    State(state): State<PluginState>,
    body: Bytes,
) -> Result<Response, PluginError> {
    let request: NameRequest = parse_body(&body)?;
    state.driver.remove(&request.name).await?;
    Ok(ok(json!({ "Err": "" })))
}

async fn mount_handler(
    State(state): State<PluginState>,
    body: Bytes,
) -> Result<Response, PluginError> {
    let request: MountRequest = parse_body(&body)?;
    let mount_point = state.driver.mount(&request.name, &request.id).await?;
    Ok(ok(json!({ "Mountpoint": mount_point, "Err": "" })))
}

async fn unmount_handler(
    State(state): State<PluginState>,
    body: Bytes,
) -> Result<Response, PluginError> {
    let request: MountRequest = parse_body(&body)?;
    state.driver.unmount(&request.name, &request.id).await?;
    Ok(ok(json!({ "Err": "" })))
}

async fn path_handler(
    State(state): State<PluginState>,
    body: Bytes,
) -> Result<Response, PluginError> {
    let request: NameRequest = parse_body(&body)?;
    let mount_point = state.driver.path(&request.name).await?;
    Ok(ok(json!({ "Mountpoint": mount_point, "Err": "" })))
}

async fn get_handler(
    State(state): State<PluginState>,
    body: Bytes,
) -> Result<Response, PluginError> {
    let request: NameRequest = parse_body(&body)?;
    let record = state.driver.get(&request.name).await?;

    let mut volume = volume_json(&record);
    volume["Status"] = json!({
        "backing_volume": record.backing_name,
        "connections": record.connections,
    });
    Ok(ok(json!({ "Volume": volume, "Err": "" })))
}

async fn list_handler(State(state): State<PluginState>) -> Response {
    let volumes: Vec<Value> = state.driver.list().await.iter().map(volume_json).collect();
    ok(json!({ "Volumes": volumes, "Err": "" }))
}

async fn capabilities_handler(State(state): State<PluginState>) -> Response {
    ok(json!({ "Capabilities": { "Scope": state.driver.capabilities().as_str() } }))
}

async fn health_handler(State(state): State<PluginState>) -> Response {
    let status = state.health.current();
    let volumes = state.driver.registry().lock().await.len();
    let code = if status.is_failed() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (
        code,
        Json(json!({
            "watch": status,
            "volumes": volumes,
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::event_propagator::{EventPropagator, WatchStatus};
    use crate::application::volume_driver::DriverSettings;
    use crate::application::volume_registry::{SharedRegistry, VolumeRegistry};
    use crate::domain::command::CommandKind;
    use crate::domain::volume::UnmountFailurePolicy;
    use crate::infrastructure::command::RecordingCommandExecutor;
    use crate::infrastructure::coordination::InMemoryCoordinationStore;
    use crate::infrastructure::snapshot::InMemorySnapshotStore;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Fixture {
        dir: TempDir,
        executor: Arc<RecordingCommandExecutor>,
        health: WatchHealth,
        router: Router,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let registry: SharedRegistry = Arc::new(tokio::sync::Mutex::new(VolumeRegistry::new(
            dir.path(),
            Arc::new(InMemorySnapshotStore::new()),
        )));
        let executor = Arc::new(RecordingCommandExecutor::new());
        let store = InMemoryCoordinationStore::with_default_capacity();
        let driver = Arc::new(VolumeDriver::new(
            registry,
            executor.clone(),
            Arc::new(EventPropagator::new(Arc::new(store), "/k")),
            DriverSettings {
                servers: vec!["gfs1".to_string()],
                unmount_failure_policy: UnmountFailurePolicy::ResetCounter,
            },
        ));
        let health = WatchHealth::new();
        let router = app(driver, health.clone());
        Fixture {
            dir,
            executor,
            health,
            router,
        }
    }

    async fn call(router: &Router, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_activate_with_empty_body() {
        let f = fixture();
        let (status, body) = call(&f.router, "/Plugin.Activate", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "Implements": ["VolumeDriver"] }));
    }

    #[tokio::test]
    async fn test_response_content_type() {
        let f = fixture();
        let request = Request::builder()
            .method("POST")
            .uri("/VolumeDriver.Capabilities")
            .body(Body::empty())
            .unwrap();
        let response = f.router.clone().oneshot(request).await.unwrap();
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            PLUGIN_CONTENT_TYPE
        );
    }

    #[tokio::test]
    async fn test_volume_lifecycle_over_http() {
        let f = fixture();
        let (status, body) = call(
            &f.router,
            "/VolumeDriver.Create",
            r#"{"Name":"data1","Opts":{"vname":"export1"}}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["Err"], "");

        let expected = f.dir.path().join("data1").to_string_lossy().into_owned();
        let (_, body) = call(&f.router, "/VolumeDriver.Mount", r#"{"Name":"data1","ID":"c1"}"#).await;
        assert_eq!(body["Mountpoint"], expected);
        assert_eq!(f.executor.count(CommandKind::Mount), 1);

        let (_, body) = call(&f.router, "/VolumeDriver.Get", r#"{"Name":"data1"}"#).await;
        assert_eq!(body["Volume"]["Name"], "data1");
        assert_eq!(body["Volume"]["Status"]["connections"], 1);

        let (_, body) = call(&f.router, "/VolumeDriver.List", "").await;
        assert_eq!(body["Volumes"].as_array().unwrap().len(), 1);

        let (status, _) =
            call(&f.router, "/VolumeDriver.Unmount", r#"{"Name":"data1","ID":"c1"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(f.executor.count(CommandKind::Unmount), 1);

        let (status, _) = call(&f.router, "/VolumeDriver.Remove", r#"{"Name":"data1"}"#).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(&f.router, "/VolumeDriver.List", "{}").await;
        assert!(body["Volumes"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_errors_map_to_err_field() {
        let f = fixture();
        let (status, body) = call(&f.router, "/VolumeDriver.Create", r#"{"Name":"data1"}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["Err"].as_str().unwrap().contains("vname"));

        let (status, body) = call(&f.router, "/VolumeDriver.Get", r#"{"Name":"ghost"}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["Err"], "not found volume ghost");

        let (status, _) = call(&f.router, "/VolumeDriver.Remove", "{not json").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_path_does_not_require_registration() {
        let f = fixture();
        let (status, body) = call(&f.router, "/VolumeDriver.Path", r#"{"Name":"data9"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["Mountpoint"],
            f.dir.path().join("data9").to_string_lossy().into_owned()
        );
    }

    #[tokio::test]
    async fn test_health_reports_watch_failure() {
        let f = fixture();
        f.health.set(WatchStatus::Running);
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = f.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        f.health.set(WatchStatus::Failed {
            reason: "connection reset".to_string(),
        });
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = f.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["watch"]["status"], "failed");
    }
}
