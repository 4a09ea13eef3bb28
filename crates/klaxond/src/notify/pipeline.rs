// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The pipeline stages.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use futures_util::future::BoxFuture;
use rand::Rng;

use crate::clock::SharedClock;
use crate::cluster::{wait_settled, ClusterPeer};
use crate::inhibit::Inhibitor;
use crate::metrics::Metrics;
use crate::model::{Alert, Fingerprint, LabelSet};
use crate::nflog::{LogKey, NotificationLog};
use crate::notify::{Delivery, Integration, NotifyContext, PipelineDeps, Stage};
use crate::silence::Silencer;
use crate::store::marker::{DeliveryMark, Marker};
use crate::timeinterval::in_any;

/// Maximum tolerated clock skew when reading notification log timestamps.
const MAX_SKEW: Duration = Duration::from_secs(30);

/// Retry backoff: base 25 ms doubling to a 5 s cap, jittered.
const BACKOFF_BASE: Duration = Duration::from_millis(25);
const BACKOFF_CAP: Duration = Duration::from_secs(5);

// -- Settle -------------------------------------------------------------------

/// Shared once-flag so only the first pipeline run across all receivers pays
/// the settle wait.
#[derive(Debug, Default)]
pub struct SettleGate(AtomicBool);

impl SettleGate {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Blocks the first invocation until the peer reports settled (or the
/// timeout passes), so the first notification considers cluster state.
pub struct SettleStage {
    peer: Arc<dyn ClusterPeer>,
    timeout: Duration,
    gate: Arc<SettleGate>,
}

impl SettleStage {
    pub fn new(peer: Arc<dyn ClusterPeer>, timeout: Duration, gate: Arc<SettleGate>) -> Self {
        Self { peer, timeout, gate }
    }
}

impl Stage for SettleStage {
    fn exec<'a>(
        &'a self,
        _ctx: &'a mut NotifyContext,
        alerts: Vec<Alert>,
    ) -> BoxFuture<'a, anyhow::Result<Vec<Alert>>> {
        Box::pin(async move {
            if !self.gate.0.load(Ordering::Acquire) {
                if !wait_settled(&*self.peer, self.timeout).await {
                    tracing::warn!("cluster did not settle in time; notifying anyway");
                }
                self.gate.0.store(true, Ordering::Release);
            }
            Ok(alerts)
        })
    }
}

// -- Mute ---------------------------------------------------------------------

/// Something that can veto an alert by its labels.
pub trait Muter: Send + Sync {
    fn mutes(&self, labels: &LabelSet) -> bool;
    fn kind(&self) -> &'static str;
}

impl Muter for Silencer {
    fn mutes(&self, labels: &LabelSet) -> bool {
        Silencer::mutes(self, labels)
    }

    fn kind(&self) -> &'static str {
        "silence"
    }
}

impl Muter for Inhibitor {
    fn mutes(&self, labels: &LabelSet) -> bool {
        Inhibitor::mutes(self, labels)
    }

    fn kind(&self) -> &'static str {
        "inhibition"
    }
}

/// Filters out alerts the muter currently vetoes.
pub struct MuteStage {
    muter: Arc<dyn Muter>,
}

impl MuteStage {
    pub fn silencer(silencer: Arc<Silencer>) -> Self {
        Self { muter: silencer }
    }

    pub fn inhibitor(inhibitor: Arc<Inhibitor>) -> Self {
        Self { muter: inhibitor }
    }
}

impl Stage for MuteStage {
    fn exec<'a>(
        &'a self,
        ctx: &'a mut NotifyContext,
        alerts: Vec<Alert>,
    ) -> BoxFuture<'a, anyhow::Result<Vec<Alert>>> {
        Box::pin(async move {
            let before = alerts.len();
            let kept: Vec<Alert> =
                alerts.into_iter().filter(|a| !self.muter.mutes(&a.labels)).collect();
            if kept.len() < before {
                tracing::debug!(
                    group_key = %ctx.group_key,
                    muted = before - kept.len(),
                    by = self.muter.kind(),
                    "alerts muted"
                );
            }
            Ok(kept)
        })
    }
}

// -- Time intervals -----------------------------------------------------------

/// Drops the whole batch while the route is inside a mute interval or
/// outside every active interval.
pub struct TimeMuteStage {
    clock: SharedClock,
}

impl TimeMuteStage {
    pub fn new(clock: SharedClock) -> Self {
        Self { clock }
    }
}

impl Stage for TimeMuteStage {
    fn exec<'a>(
        &'a self,
        ctx: &'a mut NotifyContext,
        alerts: Vec<Alert>,
    ) -> BoxFuture<'a, anyhow::Result<Vec<Alert>>> {
        Box::pin(async move {
            let now = self.clock.now();
            if in_any(&ctx.mute_time_intervals, now) {
                tracing::debug!(group_key = %ctx.group_key, "inside mute time interval");
                return Ok(Vec::new());
            }
            if !ctx.active_time_intervals.is_empty() && !in_any(&ctx.active_time_intervals, now) {
                tracing::debug!(group_key = %ctx.group_key, "outside every active time interval");
                return Ok(Vec::new());
            }
            Ok(alerts)
        })
    }
}

// -- Cluster stagger ----------------------------------------------------------

/// Sleeps `position × peer_timeout` so lower-position peers notify first and
/// their log entries reach us before our dedup check.
pub struct WaitStage {
    peer: Arc<dyn ClusterPeer>,
    peer_timeout: Duration,
}

impl WaitStage {
    pub fn new(peer: Arc<dyn ClusterPeer>, peer_timeout: Duration) -> Self {
        Self { peer, peer_timeout }
    }
}

impl Stage for WaitStage {
    fn exec<'a>(
        &'a self,
        ctx: &'a mut NotifyContext,
        alerts: Vec<Alert>,
    ) -> BoxFuture<'a, anyhow::Result<Vec<Alert>>> {
        Box::pin(async move {
            if alerts.is_empty() {
                return Ok(alerts);
            }
            let position = self.peer.position() as u32;
            if position > 0 {
                let wait = self.peer_timeout.saturating_mul(position);
                tracing::debug!(group_key = %ctx.group_key, position, wait_ms = wait.as_millis() as u64, "cluster stagger wait");
                tokio::time::sleep(wait).await;
            }
            Ok(alerts)
        })
    }
}

// -- Fanout -------------------------------------------------------------------

/// Runs dedup → retry → set-notifies for every integration of the receiver
/// in parallel; any chain failing fails the invocation.
pub struct FanoutStage {
    chains: Vec<IntegrationChain>,
}

struct IntegrationChain {
    name: &'static str,
    index: u32,
    stages: Vec<Box<dyn Stage>>,
}

impl FanoutStage {
    pub fn new(integrations: Vec<Arc<dyn Integration>>, deps: &PipelineDeps) -> Self {
        let chains = integrations
            .into_iter()
            .enumerate()
            .map(|(index, integration)| IntegrationChain {
                name: integration.name(),
                index: index as u32,
                stages: vec![
                    Box::new(DedupStage::new(
                        deps.nflog.clone(),
                        deps.clock.clone(),
                        deps.metrics.clone(),
                    )) as Box<dyn Stage>,
                    Box::new(RetryStage::new(
                        integration,
                        deps.marker.clone(),
                        deps.clock.clone(),
                        deps.metrics.clone(),
                    )),
                    Box::new(SetNotifiesStage::new(deps.nflog.clone())),
                ],
            })
            .collect();
        Self { chains }
    }
}

impl Stage for FanoutStage {
    fn exec<'a>(
        &'a self,
        ctx: &'a mut NotifyContext,
        alerts: Vec<Alert>,
    ) -> BoxFuture<'a, anyhow::Result<Vec<Alert>>> {
        Box::pin(async move {
            let mut runs = Vec::with_capacity(self.chains.len());
            for chain in &self.chains {
                let mut chain_ctx = ctx.clone();
                chain_ctx.integration = chain.name.to_owned();
                chain_ctx.integration_index = chain.index;
                let chain_alerts = alerts.clone();
                runs.push(async move {
                    let mut alerts = chain_alerts;
                    let mut ctx = chain_ctx;
                    for stage in &chain.stages {
                        alerts = stage.exec(&mut ctx, alerts).await?;
                    }
                    anyhow::Ok(())
                });
            }
            let mut first_err = None;
            for result in futures_util::future::join_all(runs).await {
                if let Err(e) = result {
                    tracing::warn!(group_key = %ctx.group_key, err = %e, "integration chain failed");
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
            match first_err {
                Some(e) => Err(e),
                None => Ok(Vec::new()),
            }
        })
    }
}

// -- Dedup --------------------------------------------------------------------

/// Short-circuits when the notification log shows this exact batch was
/// already delivered recently enough.
pub struct DedupStage {
    nflog: Arc<NotificationLog>,
    clock: SharedClock,
    metrics: Arc<Metrics>,
}

impl DedupStage {
    pub fn new(nflog: Arc<NotificationLog>, clock: SharedClock, metrics: Arc<Metrics>) -> Self {
        Self { nflog, clock, metrics }
    }
}

impl Stage for DedupStage {
    fn exec<'a>(
        &'a self,
        ctx: &'a mut NotifyContext,
        alerts: Vec<Alert>,
    ) -> BoxFuture<'a, anyhow::Result<Vec<Alert>>> {
        Box::pin(async move {
            let now = self.clock.now();
            let mut firing: BTreeSet<Fingerprint> = BTreeSet::new();
            let mut resolved: BTreeSet<Fingerprint> = BTreeSet::new();
            for alert in &alerts {
                if alert.resolved_at(now) {
                    resolved.insert(alert.fingerprint());
                } else {
                    firing.insert(alert.fingerprint());
                }
            }
            ctx.firing = firing;
            ctx.resolved = resolved;

            if alerts.is_empty() {
                return Ok(alerts);
            }

            let key = LogKey {
                group_key: ctx.group_key.clone(),
                receiver: ctx.receiver.clone(),
                integration: ctx.integration_index,
            };
            let max_skew = ChronoDuration::from_std(MAX_SKEW).unwrap_or_default();
            let Some(entry) = self.nflog.get_clamped(&key, now, max_skew) else {
                return Ok(alerts);
            };
            let repeat = ChronoDuration::from_std(ctx.repeat_interval)
                .unwrap_or_else(|_| ChronoDuration::hours(4));

            let within_repeat = now - entry.timestamp < repeat;
            let unchanged = entry.firing == ctx.firing && ctx.resolved.is_subset(&entry.resolved);
            if within_repeat && unchanged {
                self.metrics
                    .notifications_deduped
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                tracing::debug!(
                    group_key = %ctx.group_key,
                    receiver = %ctx.receiver,
                    integration = %ctx.integration,
                    "dedup: batch already notified"
                );
                return Ok(Vec::new());
            }
            Ok(alerts)
        })
    }
}

// -- Retry --------------------------------------------------------------------

/// Calls the integration, retrying transient failures with jittered
/// exponential backoff until the invocation deadline.
pub struct RetryStage {
    integration: Arc<dyn Integration>,
    marker: Arc<Marker>,
    clock: SharedClock,
    metrics: Arc<Metrics>,
}

impl RetryStage {
    pub fn new(
        integration: Arc<dyn Integration>,
        marker: Arc<Marker>,
        clock: SharedClock,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { integration, marker, clock, metrics }
    }

    fn mark_all(&self, ctx: &NotifyContext, alerts: &[Alert], success: bool) {
        let at = self.clock.now();
        for alert in alerts {
            self.marker.record_delivery(
                alert.fingerprint(),
                &ctx.receiver,
                ctx.integration_index,
                DeliveryMark { at, success },
            );
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE.saturating_mul(1u32 << attempt.min(10));
    let capped = exp.min(BACKOFF_CAP);
    // Jitter in [0.5, 1.5) so synchronized peers fan out.
    let factor = rand::rng().random_range(0.5..1.5);
    capped.mul_f64(factor)
}

impl Stage for RetryStage {
    fn exec<'a>(
        &'a self,
        ctx: &'a mut NotifyContext,
        alerts: Vec<Alert>,
    ) -> BoxFuture<'a, anyhow::Result<Vec<Alert>>> {
        Box::pin(async move {
            if alerts.is_empty() {
                return Ok(alerts);
            }
            let relaxed = std::sync::atomic::Ordering::Relaxed;
            let mut attempt: u32 = 0;
            loop {
                if tokio::time::Instant::now() >= ctx.deadline {
                    self.metrics.notifications_failed.fetch_add(1, relaxed);
                    self.mark_all(ctx, &alerts, false);
                    anyhow::bail!(
                        "delivery to {}/{} timed out after {attempt} attempt(s)",
                        ctx.receiver,
                        ctx.integration
                    );
                }
                self.metrics.notifications_attempted.fetch_add(1, relaxed);
                if attempt > 0 {
                    self.metrics.notifications_retried.fetch_add(1, relaxed);
                }

                let outcome =
                    match tokio::time::timeout_at(ctx.deadline, self.integration.notify(ctx, &alerts))
                        .await
                    {
                        Ok(outcome) => outcome,
                        // A cancelled call counts as transient so the next
                        // flush tries again.
                        Err(_) => Delivery::Transient("invocation deadline exceeded".into()),
                    };

                match outcome {
                    Delivery::Success => {
                        self.mark_all(ctx, &alerts, true);
                        tracing::info!(
                            group_key = %ctx.group_key,
                            receiver = %ctx.receiver,
                            integration = %ctx.integration,
                            alerts = alerts.len(),
                            "notification delivered"
                        );
                        return Ok(alerts);
                    }
                    Delivery::Permanent(msg) => {
                        self.metrics.notifications_failed.fetch_add(1, relaxed);
                        self.mark_all(ctx, &alerts, false);
                        anyhow::bail!(
                            "permanent delivery failure to {}/{}: {msg}",
                            ctx.receiver,
                            ctx.integration
                        );
                    }
                    Delivery::Transient(msg) => {
                        let delay = backoff_delay(attempt);
                        attempt += 1;
                        tracing::warn!(
                            group_key = %ctx.group_key,
                            receiver = %ctx.receiver,
                            integration = %ctx.integration,
                            attempt,
                            retry_in_ms = delay.as_millis() as u64,
                            err = %msg,
                            "transient delivery failure"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        })
    }
}

// -- Set notifies -------------------------------------------------------------

/// Records the delivered batch in the notification log and broadcasts it.
pub struct SetNotifiesStage {
    nflog: Arc<NotificationLog>,
}

impl SetNotifiesStage {
    pub fn new(nflog: Arc<NotificationLog>) -> Self {
        Self { nflog }
    }
}

impl Stage for SetNotifiesStage {
    fn exec<'a>(
        &'a self,
        ctx: &'a mut NotifyContext,
        alerts: Vec<Alert>,
    ) -> BoxFuture<'a, anyhow::Result<Vec<Alert>>> {
        Box::pin(async move {
            // Nothing was sent (dedup or mutes emptied the batch): leave the
            // log entry alone so its timestamp keeps meaning "last delivery".
            if alerts.is_empty() {
                return Ok(alerts);
            }
            let key = LogKey {
                group_key: ctx.group_key.clone(),
                receiver: ctx.receiver.clone(),
                integration: ctx.integration_index,
            };
            self.nflog.record(key, ctx.firing.clone(), ctx.resolved.clone());
            Ok(alerts)
        })
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
