// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared server state: the four singletons and everything the HTTP surface
//! needs to answer queries.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::clock::SharedClock;
use crate::cluster::ClusterPeer;
use crate::config::{Config, ServerConfig};
use crate::dispatch::Dispatcher;
use crate::inhibit::Inhibitor;
use crate::metrics::Metrics;
use crate::nflog::NotificationLog;
use crate::silence::SilenceStore;
use crate::store::alerts::AlertStore;
use crate::store::marker::Marker;

pub struct AppState {
    pub server: ServerConfig,
    pub config: Config,
    pub config_digest: String,
    pub clock: SharedClock,
    pub alerts: Arc<AlertStore>,
    pub marker: Arc<Marker>,
    pub silences: Arc<SilenceStore>,
    pub nflog: Arc<NotificationLog>,
    pub inhibitor: Arc<Inhibitor>,
    pub dispatcher: Arc<Dispatcher>,
    pub peer: Arc<dyn ClusterPeer>,
    pub metrics: Arc<Metrics>,
    pub started_at: DateTime<Utc>,
    pub shutdown: CancellationToken,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config_digest", &self.config_digest)
            .field("started_at", &self.started_at)
            .finish()
    }
}
