// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! klaxond: an alert-handling server.
//!
//! Ingests alerts over HTTP, groups them through a configured route tree,
//! suppresses silenced and inhibited alerts, and delivers notifications to
//! webhook receivers with cluster-aware deduplication backed by two
//! gossip-replicated logs (silences and notification history).

pub mod clock;
pub mod cluster;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod inhibit;
pub mod metrics;
pub mod model;
pub mod nflog;
pub mod notify;
pub mod route;
pub mod silence;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod timeinterval;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::clock::{SharedClock, SystemClock};
use crate::cluster::{ClusterPeer, StandalonePeer, STATE_NFLOG, STATE_SILENCES};
use crate::config::{Config, ServerConfig};
use crate::dispatch::Dispatcher;
use crate::inhibit::Inhibitor;
use crate::metrics::Metrics;
use crate::nflog::NotificationLog;
use crate::notify::{build_pipelines, PipelineDeps};
use crate::route::RouteTree;
use crate::silence::{SilenceStore, Silencer};
use crate::state::AppState;
use crate::store::alerts::AlertStore;
use crate::store::marker::Marker;

/// A fully-assembled server: stores restored, background loops running,
/// router ready to serve.  Used by `run` and by the end-to-end spec tests.
pub struct Server {
    pub state: Arc<AppState>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Server {
    /// Wire every component together.  `peer` and `clock` are injectable so
    /// tests can run clustered instances on one runtime.
    pub fn build(
        server: ServerConfig,
        config: Config,
        clock: SharedClock,
        peer: Arc<dyn ClusterPeer>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Server> {
        config.validate()?;
        std::fs::create_dir_all(&server.data_dir).map_err(|e| {
            anyhow::anyhow!("cannot create data dir {}: {e}", server.data_dir.display())
        })?;

        let metrics = Arc::new(Metrics::new());
        let marker = Arc::new(Marker::new());
        let alerts = AlertStore::new(marker.clone(), clock.clone(), server.retention());

        let silence_snapshot = server.data_dir.join("silences.snap");
        let silences =
            SilenceStore::new(clock.clone(), peer.clone(), server.retention(), silence_snapshot.clone());
        silences.restore(&silence_snapshot)?;
        peer.register(STATE_SILENCES, silences.clone());

        let nflog_snapshot = server.data_dir.join("nflog.snap");
        let nflog =
            NotificationLog::new(clock.clone(), peer.clone(), server.retention(), nflog_snapshot.clone());
        nflog.restore(&nflog_snapshot)?;
        peer.register(STATE_NFLOG, nflog.clone());

        let silencer = Arc::new(Silencer::new(silences.clone(), marker.clone()));
        let inhibitor =
            Inhibitor::new(config.build_inhibit_rules()?, marker.clone(), clock.clone());

        let deps = PipelineDeps {
            clock: clock.clone(),
            peer: peer.clone(),
            nflog: nflog.clone(),
            marker: marker.clone(),
            silencer,
            inhibitor: inhibitor.clone(),
            metrics: metrics.clone(),
        };
        let pipelines = build_pipelines(&config, &server, &deps);
        let tree = RouteTree::build(&config)?;
        let dispatcher = Dispatcher::new(
            tree,
            pipelines,
            clock.clone(),
            metrics.clone(),
            shutdown.child_token(),
        );

        // Background loops: feed the inhibitor and dispatcher, GC the alert
        // store, maintain the replicated logs.
        let tasks = vec![
            inhibitor.spawn(alerts.subscribe(), shutdown.child_token()),
            dispatcher.spawn(alerts.subscribe()),
            alerts.spawn_gc(server.gc_interval(), shutdown.child_token()),
            silences.spawn_maintenance(server.maintenance_interval(), shutdown.child_token()),
            nflog.spawn_maintenance(server.maintenance_interval(), shutdown.child_token()),
        ];

        let config_digest = config.digest();
        let state = Arc::new(AppState {
            started_at: clock.now(),
            server,
            config,
            config_digest,
            clock,
            alerts,
            marker,
            silences,
            nflog,
            inhibitor,
            dispatcher,
            peer,
            metrics,
            shutdown,
        });
        Ok(Server { state, tasks })
    }

    pub fn router(&self) -> axum::Router {
        transport::build_router(self.state.clone())
    }

    /// Cancel everything and wait for the background loops (which write
    /// their final snapshots) to finish.
    pub async fn drain(self) {
        self.state.shutdown.cancel();
        self.state.dispatcher.stop();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Run the server until shutdown.
pub async fn run(server_config: ServerConfig) -> anyhow::Result<()> {
    // The reqwest client is built against rustls with no bundled provider.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = Config::load(&server_config.config_file)?;
    let addr = format!("{}:{}", server_config.host, server_config.port);
    let shutdown = CancellationToken::new();

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    let clock: SharedClock = Arc::new(SystemClock);
    let peer: Arc<dyn ClusterPeer> = Arc::new(StandalonePeer);
    let server = Server::build(server_config, config, clock, peer, shutdown.clone())?;

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("klaxond listening on {addr}");
    let router = server.router();
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    server.drain().await;
    Ok(())
}
