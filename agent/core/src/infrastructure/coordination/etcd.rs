// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! etcd Coordination Client
//!
//! Talks to etcd through its v3 JSON gateway. Implements the
//! [`CoordinationClient`] trait as an Anti-Corruption Layer.
//!
//! # API Endpoints
//!
//! - `POST /v3/kv/put` - `{"key": b64, "value": b64}`
//! - `POST /v3/watch` - `{"create_request": {"key": b64, "start_revision": n}}`,
//!   answered with a long-lived stream of newline-delimited JSON frames. The
//!   first frame has `created: true` and the store revision in its header.
//!
//! Keys and values travel base64-encoded; revisions are int64 and may arrive
//! as JSON strings.

use crate::domain::coordination::{
    CoordinationClient, CoordinationError, EstablishedWatch, WatchNotification,
};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

/// etcd v3 gateway adapter
pub struct EtcdCoordinationClient {
    /// Client for unary requests, bounded by `request_timeout`
    client: Client,

    /// Client for watch streams; only connection setup is bounded
    watch_client: Client,

    /// Base URLs tried in order (e.g. "http://10.0.0.1:2379")
    endpoints: Vec<String>,

    request_timeout: Duration,
}

impl EtcdCoordinationClient {
    /// Create a new etcd client
    ///
    /// # Arguments
    /// * `endpoints` - etcd client URLs; tried in order on failure
    /// * `request_timeout` - bound on each put and on watch establishment
    pub fn new(
        endpoints: Vec<String>,
        request_timeout: Duration,
    ) -> Result<Self, CoordinationError> {
        let endpoints: Vec<String> = endpoints
            .into_iter()
            .map(|e| e.trim_end_matches('/').to_string())
            .filter(|e| !e.is_empty())
            .collect();
        if endpoints.is_empty() {
            return Err(CoordinationError::NoEndpoints);
        }

        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| CoordinationError::InvalidResponse(format!("HTTP client: {}", e)))?;
        let watch_client = Client::builder()
            .connect_timeout(request_timeout)
            .build()
            .map_err(|e| CoordinationError::InvalidResponse(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            watch_client,
            endpoints,
            request_timeout,
        })
    }

    async fn put_once(
        &self,
        endpoint: &str,
        key: &str,
        payload: &str,
    ) -> Result<(), CoordinationError> {
        let url = format!("{}/v3/kv/put", endpoint);
        let body = json!({
            "key": BASE64.encode(key),
            "value": BASE64.encode(payload),
        });

        let response = self.client.post(&url).json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                CoordinationError::Timeout(self.request_timeout)
            } else {
                CoordinationError::Publish {
                    key: key.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let error_msg = response
            .text()
            .await
            .unwrap_or_else(|_| format!("HTTP {}", status));
        Err(CoordinationError::Publish {
            key: key.to_string(),
            reason: format!("HTTP {}: {}", status, error_msg),
        })
    }

    async fn open_watch(
        &self,
        endpoint: &str,
        key: &str,
        start_revision: Option<i64>,
    ) -> Result<EstablishedWatch, CoordinationError> {
        let url = format!("{}/v3/watch", endpoint);
        let mut create_request = json!({ "key": BASE64.encode(key) });
        if let Some(revision) = start_revision {
            create_request["start_revision"] = json!(revision.to_string());
        }
        let body = json!({ "create_request": create_request });

        let send = self.watch_client.post(&url).json(&body).send();
        let response = tokio::time::timeout(self.request_timeout, send)
            .await
            .map_err(|_| CoordinationError::Timeout(self.request_timeout))?
            .map_err(|e| CoordinationError::WatchFailed {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoordinationError::WatchFailed {
                key: key.to_string(),
                reason: format!("HTTP {}", status),
            });
        }

        let mut body = Box::pin(response.bytes_stream());
        let mut decoder = WatchFrameDecoder::new(key);
        let mut pending = Vec::new();
        let revision = tokio::time::timeout(
            self.request_timeout,
            await_created(key, &mut body, &mut decoder, &mut pending),
        )
        .await
        .map_err(|_| CoordinationError::Timeout(self.request_timeout))??;

        let key = key.to_string();
        let stream = async_stream::stream! {
            for item in pending {
                let failed = item.is_err();
                yield item;
                if failed {
                    return;
                }
            }
            loop {
                match body.next().await {
                    Some(Ok(chunk)) => {
                        for item in decoder.push(&chunk) {
                            let failed = item.is_err();
                            yield item;
                            if failed {
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        yield Err(CoordinationError::WatchFailed {
                            key: key.clone(),
                            reason: e.to_string(),
                        });
                        return;
                    }
                    None => {
                        yield Err(CoordinationError::WatchFailed {
                            key: key.clone(),
                            reason: "watch stream closed by server".to_string(),
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

#[async_trait]
impl CoordinationClient for EtcdCoordinationClient {
    async fn publish(&self, key: &str, payload: &str) -> Result<(), CoordinationError> {
        let mut last_error = CoordinationError::NoEndpoints;
        for endpoint in &self.endpoints {
            match self.put_once(endpoint, key, payload).await {
                Ok(()) => {
                    debug!(endpoint = %endpoint, key = %key, "Published to etcd");
                    return Ok(());
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "etcd put failed");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    async fn watch(
        &self,
        key: &str,
        start_revision: Option<i64>,
    ) -> Result<EstablishedWatch, CoordinationError> {
        let mut last_error = CoordinationError::NoEndpoints;
        for endpoint in &self.endpoints {
            match self.open_watch(endpoint, key, start_revision).await {
                Ok(watch) => {
                    info!(
                        endpoint = %endpoint,
                        key = %key,
                        ?start_revision,
                        revision = watch.revision,
                        "etcd watch established"
                    );
                    return Ok(watch);
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "etcd watch failed to open");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

/// Read frames until the gateway confirms the watch, returning its revision
///
/// Anything decoded after the confirmation is left in `pending`.
async fn await_created<S, B>(
    key: &str,
    body: &mut S,
    decoder: &mut WatchFrameDecoder,
    pending: &mut Vec<Result<WatchNotification, CoordinationError>>,
) -> Result<i64, CoordinationError>
where
    S: Stream<Item = reqwest::Result<B>> + Unpin,
    B: AsRef<[u8]>,
{
    loop {
        if let Some(revision) = decoder.created_revision() {
            return Ok(revision);
        }
        match body.next().await {
            Some(Ok(chunk)) => {
                for item in decoder.push(chunk.as_ref()) {
                    match item {
                        Err(e) if decoder.created_revision().is_none() => return Err(e),
                        item => pending.push(item),
                    }
                }
            }
            Some(Err(e)) => {
                return Err(CoordinationError::WatchFailed {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            }
            None => {
                return Err(CoordinationError::WatchFailed {
                    key: key.to_string(),
                    reason: "watch stream closed before it was created".to_string(),
                })
            }
        }
    }
}

// ============================================================================
// Watch stream framing
// ============================================================================

#[derive(Debug, Deserialize)]
struct WatchFrame {
    #[serde(default)]
    result: Option<WatchResult>,
    #[serde(default)]
    error: Option<GatewayError>,
}

#[derive(Debug, Deserialize)]
struct GatewayError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct WatchResult {
    #[serde(default)]
    header: Option<ResponseHeader>,
    #[serde(default)]
    created: bool,
    #[serde(default)]
    canceled: bool,
    #[serde(default)]
    cancel_reason: String,
    #[serde(default)]
    events: Vec<WatchEvent>,
}

#[derive(Debug, Deserialize)]
struct ResponseHeader {
    #[serde(default, deserialize_with = "lenient_i64")]
    revision: i64,
}

#[derive(Debug, Deserialize)]
struct WatchEvent {
    /// Absent for PUT (proto3 default value), "DELETE" for deletions
    #[serde(rename = "type", default)]
    event_type: Option<String>,
    #[serde(default)]
    kv: Option<KeyValue>,
}

#[derive(Debug, Deserialize)]
struct KeyValue {
    #[serde(default)]
    value: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    mod_revision: i64,
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(i64),
        String(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Incremental decoder for the gateway's newline-delimited watch frames
///
/// Chunks may split or join frames arbitrarily; complete lines are decoded
/// as they arrive and the remainder is buffered.
pub struct WatchFrameDecoder {
    key: String,
    buffer: Vec<u8>,
    created_revision: Option<i64>,
}

impl WatchFrameDecoder {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            buffer: Vec::new(),
            created_revision: None,
        }
    }

    /// Header revision of the `created` frame, once it has been seen
    pub fn created_revision(&self) -> Option<i64> {
        self.created_revision
    }

    /// Feed a chunk, returning the notifications (or the terminal failure) it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<WatchNotification, CoordinationError>> {
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Err(e) = self.decode_line(line, &mut out) {
                out.push(Err(e));
                return out;
            }
        }
        out
    }

    fn decode_line(
        &mut self,
        line: &str,
        out: &mut Vec<Result<WatchNotification, CoordinationError>>,
    ) -> Result<(), CoordinationError> {
        let frame: WatchFrame =
            serde_json::from_str(line).map_err(|e| CoordinationError::WatchFailed {
                key: self.key.clone(),
                reason: format!("undecodable watch frame: {}", e),
            })?;

        if let Some(error) = frame.error {
            return Err(CoordinationError::WatchFailed {
                key: self.key.clone(),
                reason: error.message,
            });
        }

        let result = frame.result.unwrap_or_default();
        if result.canceled {
            return Err(CoordinationError::WatchFailed {
                key: self.key.clone(),
                reason: format!("watch canceled: {}", result.cancel_reason),
            });
        }
        if result.created {
            self.created_revision = Some(result.header.map_or(0, |h| h.revision));
        }

        for event in result.events {
            if event.event_type.as_deref() == Some("DELETE") {
                continue;
            }
            let Some(kv) = event.kv else { continue };
            let raw = kv.value.unwrap_or_default();
            let decoded =
                BASE64
                    .decode(raw.as_bytes())
                    .map_err(|e| CoordinationError::WatchFailed {
                        key: self.key.clone(),
                        reason: format!("value is not base64: {}", e),
                    })?;
            out.push(Ok(WatchNotification {
                revision: kv.mod_revision,
                value: String::from_utf8_lossy(&decoded).into_owned(),
            }));
        }
        Ok(())
    }
}
