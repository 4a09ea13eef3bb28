// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound notification: context, integration contract, and the
//! per-receiver stage pipeline.
//!
//! The pipeline composition is fixed: settle-wait, inhibition mute, silence
//! mute, time-interval gate, cluster stagger, then a per-integration fanout
//! of dedup → retry → set-notifies.  Stages are small objects with one
//! `exec` method; the group runner drives a pipeline once per flush.

pub mod pipeline;
pub mod webhook;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::clock::SharedClock;
use crate::cluster::ClusterPeer;
use crate::config::{Config, ServerConfig};
use crate::inhibit::Inhibitor;
use crate::metrics::Metrics;
use crate::model::{Alert, Fingerprint, LabelSet};
use crate::nflog::NotificationLog;
use crate::silence::Silencer;
use crate::store::marker::Marker;
use crate::timeinterval::TimeInterval;

/// Outcome of one integration call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Success,
    /// Worth retrying: network failure, timeout, 408/429/5xx.
    Transient(String),
    /// Not worth retrying: any other 4xx.  The next flush may still try
    /// again with updated content.
    Permanent(String),
}

/// Per-invocation values carried through the stages.
#[derive(Debug, Clone)]
pub struct NotifyContext {
    pub receiver: String,
    pub integration: String,
    pub integration_index: u32,
    pub group_key: String,
    pub group_labels: LabelSet,
    pub repeat_interval: Duration,
    pub mute_time_intervals: Vec<TimeInterval>,
    pub active_time_intervals: Vec<TimeInterval>,
    /// Hard deadline for this invocation; retries respect it.
    pub deadline: tokio::time::Instant,
    /// Firing/resolved fingerprints of the batch, filled by the dedup stage
    /// and written to the notification log on success.
    pub firing: BTreeSet<Fingerprint>,
    pub resolved: BTreeSet<Fingerprint>,
}

/// The narrow capability every outbound channel implements.
pub trait Integration: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn notify<'a>(
        &'a self,
        ctx: &'a NotifyContext,
        alerts: &'a [Alert],
    ) -> BoxFuture<'a, Delivery>;
}

/// One pipeline stage: transform the alert batch or fail the invocation.
pub trait Stage: Send + Sync {
    fn exec<'a>(
        &'a self,
        ctx: &'a mut NotifyContext,
        alerts: Vec<Alert>,
    ) -> BoxFuture<'a, anyhow::Result<Vec<Alert>>>;
}

/// The assembled stage chain for one receiver.
pub struct ReceiverPipeline {
    receiver: String,
    stages: Vec<Box<dyn Stage>>,
}

impl ReceiverPipeline {
    pub fn new(receiver: String, stages: Vec<Box<dyn Stage>>) -> Self {
        Self { receiver, stages }
    }

    /// Run the whole chain on one snapshot of a group's alerts.
    pub async fn run(&self, ctx: &mut NotifyContext, alerts: Vec<Alert>) -> anyhow::Result<()> {
        let mut alerts = alerts;
        for stage in &self.stages {
            alerts = stage.exec(ctx, alerts).await?;
        }
        Ok(())
    }

    pub fn receiver(&self) -> &str {
        &self.receiver
    }
}

impl fmt::Debug for ReceiverPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiverPipeline")
            .field("receiver", &self.receiver)
            .field("stages", &self.stages.len())
            .finish()
    }
}

/// Everything the pipeline stages need from the rest of the process.
#[derive(Clone)]
pub struct PipelineDeps {
    pub clock: SharedClock,
    pub peer: Arc<dyn ClusterPeer>,
    pub nflog: Arc<NotificationLog>,
    pub marker: Arc<Marker>,
    pub silencer: Arc<Silencer>,
    pub inhibitor: Arc<Inhibitor>,
    pub metrics: Arc<Metrics>,
}

/// Build one pipeline per configured receiver.
pub fn build_pipelines(
    config: &Config,
    server: &ServerConfig,
    deps: &PipelineDeps,
) -> Vec<Arc<ReceiverPipeline>> {
    let settle_gate = Arc::new(pipeline::SettleGate::new());
    config
        .receivers
        .iter()
        .map(|receiver| {
            let mut integrations: Vec<Arc<dyn Integration>> = Vec::new();
            for hook in &receiver.webhook_configs {
                integrations
                    .push(Arc::new(webhook::WebhookIntegration::new(hook, deps.clock.clone())));
            }
            let mut stages: Vec<Box<dyn Stage>> = vec![
                Box::new(pipeline::SettleStage::new(
                    deps.peer.clone(),
                    server.settle_timeout(),
                    settle_gate.clone(),
                )),
                Box::new(pipeline::MuteStage::inhibitor(deps.inhibitor.clone())),
                Box::new(pipeline::MuteStage::silencer(deps.silencer.clone())),
                Box::new(pipeline::TimeMuteStage::new(deps.clock.clone())),
                Box::new(pipeline::WaitStage::new(deps.peer.clone(), server.peer_timeout())),
            ];
            stages.push(Box::new(pipeline::FanoutStage::new(integrations, deps)));
            Arc::new(ReceiverPipeline::new(receiver.name.clone(), stages))
        })
        .collect()
}
