// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Harness for end-to-end scenario tests: a webhook sink that records every
//! delivery, and an in-process klaxond instance served on an ephemeral port.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use klaxond::clock::SystemClock;
use klaxond::cluster::{ClusterPeer, MeshNetwork, StandalonePeer};
use klaxond::config::{Config, ServerConfig};
use klaxond::Server;

/// One recorded webhook delivery.
#[derive(Debug, Clone)]
pub struct Received {
    pub at: DateTime<Utc>,
    pub body: serde_json::Value,
}

/// In-process webhook receiver.
#[derive(Clone)]
pub struct WebhookSink {
    pub url: String,
    received: Arc<Mutex<Vec<Received>>>,
}

impl WebhookSink {
    /// Bind a sink on an ephemeral port.
    pub async fn start() -> anyhow::Result<WebhookSink> {
        let received: Arc<Mutex<Vec<Received>>> = Arc::new(Mutex::new(Vec::new()));
        let state = received.clone();
        let app = Router::new()
            .route(
                "/hook",
                post(
                    |State(sink): State<Arc<Mutex<Vec<Received>>>>,
                     Json(body): Json<serde_json::Value>| async move {
                        sink.lock().push(Received { at: Utc::now(), body });
                        StatusCode::OK
                    },
                ),
            )
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(WebhookSink { url: format!("http://{addr}/hook"), received })
    }

    pub fn count(&self) -> usize {
        self.received.lock().len()
    }

    pub fn all(&self) -> Vec<Received> {
        self.received.lock().clone()
    }

    /// Fingerprints in the `alerts` array of delivery `idx`.
    pub fn fingerprints(&self, idx: usize) -> Vec<String> {
        self.all()
            .get(idx)
            .and_then(|r| r.body["alerts"].as_array().cloned())
            .unwrap_or_default()
            .iter()
            .filter_map(|a| a["fingerprint"].as_str().map(str::to_owned))
            .collect()
    }

    /// Wait until `count` deliveries have arrived or `timeout` passes.
    pub async fn wait_for_count(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.count() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

/// A running klaxond instance bound to an ephemeral port.
pub struct SpecServer {
    pub base_url: String,
    pub client: reqwest::Client,
    shutdown: CancellationToken,
    _dir: tempfile::TempDir,
}

fn server_config(dir: &Path, peer_timeout: Duration, settle_timeout: Duration) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        config_file: dir.join("klaxon.json"),
        data_dir: dir.join("data"),
        auth_token: None,
        resolve_timeout_ms: 300_000,
        retention_ms: 432_000_000,
        gc_interval_ms: 1_000,
        maintenance_interval_ms: 60_000,
        peer_timeout_ms: peer_timeout.as_millis() as u64,
        settle_timeout_ms: settle_timeout.as_millis() as u64,
        log_json: false,
    }
}

impl SpecServer {
    /// Start a standalone instance with the given routing document.
    pub async fn start(config: serde_json::Value) -> anyhow::Result<SpecServer> {
        Self::start_peered(config, Arc::new(StandalonePeer), Duration::from_millis(50)).await
    }

    /// Start an instance attached to an explicit cluster peer.
    pub async fn start_peered(
        config: serde_json::Value,
        peer: Arc<dyn ClusterPeer>,
        peer_timeout: Duration,
    ) -> anyhow::Result<SpecServer> {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let dir = tempfile::tempdir()?;
        let config: Config = serde_json::from_value(config)?;
        let shutdown = CancellationToken::new();
        let server = Server::build(
            server_config(dir.path(), peer_timeout, Duration::from_millis(100)),
            config,
            Arc::new(SystemClock),
            peer,
            shutdown.clone(),
        )?;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr: SocketAddr = listener.local_addr()?;
        let router = server.router();
        let token = shutdown.clone();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await;
        });

        Ok(SpecServer {
            base_url: format!("http://{addr}"),
            client: reqwest::Client::new(),
            shutdown,
            _dir: dir,
        })
    }

    /// POST a batch of alerts; labels only, firing, starting now.
    pub async fn put_firing(&self, batches: &[&[(&str, &str)]]) -> anyhow::Result<()> {
        let alerts: Vec<serde_json::Value> = batches
            .iter()
            .map(|pairs| {
                let labels: serde_json::Map<String, serde_json::Value> =
                    pairs.iter().map(|(k, v)| (k.to_string(), serde_json::json!(v))).collect();
                serde_json::json!({"labels": labels, "startsAt": Utc::now().to_rfc3339()})
            })
            .collect();
        self.put_raw(serde_json::Value::Array(alerts)).await
    }

    /// POST one alert marked resolved (ends in the past).
    pub async fn put_resolved(&self, pairs: &[(&str, &str)]) -> anyhow::Result<()> {
        let labels: serde_json::Map<String, serde_json::Value> =
            pairs.iter().map(|(k, v)| (k.to_string(), serde_json::json!(v))).collect();
        let now = Utc::now();
        self.put_raw(serde_json::json!([{
            "labels": labels,
            "startsAt": (now - chrono::Duration::seconds(60)).to_rfc3339(),
            "endsAt": (now - chrono::Duration::seconds(1)).to_rfc3339(),
        }]))
        .await
    }

    pub async fn put_raw(&self, body: serde_json::Value) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(format!("{}/api/v2/alerts", self.base_url))
            .json(&body)
            .send()
            .await?;
        resp.error_for_status()?;
        Ok(())
    }

    pub async fn create_silence(&self, body: serde_json::Value) -> anyhow::Result<String> {
        let resp = self
            .client
            .post(format!("{}/api/v2/silences", self.base_url))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let value: serde_json::Value = resp.json().await?;
        Ok(value["silenceId"].as_str().unwrap_or_default().to_owned())
    }

    pub async fn alerts(&self) -> anyhow::Result<Vec<serde_json::Value>> {
        let resp = self
            .client
            .get(format!("{}/api/v2/alerts", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for SpecServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Routing document with one webhook receiver and the given timings.
pub fn webhook_config(
    sink_url: &str,
    group_wait: &str,
    group_interval: &str,
    repeat_interval: &str,
) -> serde_json::Value {
    serde_json::json!({
        "route": {
            "receiver": "hook",
            "group_by": ["alertname"],
            "group_wait": group_wait,
            "group_interval": group_interval,
            "repeat_interval": repeat_interval,
        },
        "receivers": [
            {"name": "hook", "webhook_configs": [{"url": sink_url}]},
        ],
    })
}

/// Shared mesh for multi-peer scenarios.
pub fn mesh() -> Arc<MeshNetwork> {
    MeshNetwork::new()
}
