// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One runner per live alert group.
//!
//! A runner owns the group's alerts and its timer: the first flush happens
//! `group_wait` after creation, later flushes every `group_interval`.
//! Pipeline runs are strictly serialized within the group; alerts arriving
//! mid-flush sit in the channel and are drained before the next tick is
//! scheduled.  A group whose alerts have all resolved and been reported
//! winds itself down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::clock::SharedClock;
use crate::metrics::Metrics;
use crate::model::{Alert, Fingerprint, LabelSet};
use crate::notify::{NotifyContext, ReceiverPipeline};
use crate::route::{GroupBy, Route};
use crate::timeinterval::TimeInterval;

/// The slice of a route node a group runner needs.
#[derive(Debug, Clone)]
pub struct GroupParams {
    pub route_id: String,
    pub receiver: String,
    pub group_wait: Duration,
    pub group_interval: Duration,
    pub repeat_interval: Duration,
    pub mute_time_intervals: Vec<TimeInterval>,
    pub active_time_intervals: Vec<TimeInterval>,
}

impl GroupParams {
    pub fn from_route(route: &Route) -> Self {
        Self {
            route_id: route.id.clone(),
            receiver: route.receiver.clone(),
            group_wait: route.group_wait,
            group_interval: route.group_interval,
            repeat_interval: route.repeat_interval,
            mute_time_intervals: route.mute_time_intervals.clone(),
            active_time_intervals: route.active_time_intervals.clone(),
        }
    }
}

/// Labels a route's `group_by` selects out of an alert.
pub fn group_labels(route: &Route, alert: &Alert) -> LabelSet {
    match &route.group_by {
        GroupBy::PerAlert => alert.labels.clone(),
        GroupBy::All => LabelSet::new(),
        GroupBy::Labels(names) => alert.labels.project(names),
    }
}

/// Group key: route node id plus the canonical grouping label rendering.
pub fn group_key(route_id: &str, labels: &LabelSet) -> String {
    format!("{route_id}:{labels}")
}

/// Dispatcher-side handle to a running group.
#[derive(Debug)]
pub struct GroupHandle {
    tx: mpsc::UnboundedSender<Alert>,
    cancel: CancellationToken,
    done: Arc<AtomicBool>,
}

impl GroupHandle {
    /// Feed an alert; false when the runner has already wound down.
    pub fn send(&self, alert: Alert) -> bool {
        !self.is_done() && self.tx.send(alert).is_ok()
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

pub struct AlertGroup {
    params: GroupParams,
    group_labels: LabelSet,
    group_key: String,
    /// Insertion order is kept for display; flushes iterate sorted by
    /// fingerprint for determinism.
    alerts: IndexMap<Fingerprint, Alert>,
    pipeline: Arc<ReceiverPipeline>,
    clock: SharedClock,
    metrics: Arc<Metrics>,
}

impl AlertGroup {
    /// Create the group and spawn its runner.
    pub fn spawn(
        params: GroupParams,
        group_labels: LabelSet,
        pipeline: Arc<ReceiverPipeline>,
        clock: SharedClock,
        metrics: Arc<Metrics>,
        cancel: CancellationToken,
    ) -> GroupHandle {
        let key = group_key(&params.route_id, &group_labels);
        let (tx, rx) = mpsc::unbounded_channel();
        let done = Arc::new(AtomicBool::new(false));
        let group = AlertGroup {
            params,
            group_labels,
            group_key: key,
            alerts: IndexMap::new(),
            pipeline,
            clock,
            metrics,
        };
        tokio::spawn(group.run(rx, cancel.clone(), done.clone()));
        GroupHandle { tx, cancel, done }
    }

    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<Alert>,
        cancel: CancellationToken,
        done: Arc<AtomicBool>,
    ) {
        tracing::debug!(group_key = %self.group_key, "alert group created");
        let mut next = tokio::time::Instant::now() + self.params.group_wait;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = rx.recv() => match received {
                    Some(alert) => self.insert(alert),
                    None => break,
                },
                _ = tokio::time::sleep_until(next) => {
                    self.flush().await;
                    // Alerts that arrived during the flush are considered
                    // before deciding whether the group is spent.
                    while let Ok(alert) = rx.try_recv() {
                        self.insert(alert);
                    }
                    if self.alerts.is_empty() {
                        tracing::debug!(group_key = %self.group_key, "alert group spent");
                        break;
                    }
                    next = tokio::time::Instant::now() + self.params.group_interval;
                }
            }
        }
        done.store(true, Ordering::Release);
    }

    fn insert(&mut self, alert: Alert) {
        self.alerts.insert(alert.fingerprint(), alert);
    }

    async fn flush(&mut self) {
        if self.alerts.is_empty() {
            return;
        }
        let mut batch: Vec<Alert> = self.alerts.values().cloned().collect();
        batch.sort_by_key(Alert::fingerprint);
        self.metrics.group_flushes.fetch_add(1, Ordering::Relaxed);

        let mut ctx = NotifyContext {
            receiver: self.params.receiver.clone(),
            integration: String::new(),
            integration_index: 0,
            group_key: self.group_key.clone(),
            group_labels: self.group_labels.clone(),
            repeat_interval: self.params.repeat_interval,
            mute_time_intervals: self.params.mute_time_intervals.clone(),
            active_time_intervals: self.params.active_time_intervals.clone(),
            deadline: tokio::time::Instant::now() + self.params.group_interval * 2,
            firing: Default::default(),
            resolved: Default::default(),
        };
        tracing::debug!(group_key = %self.group_key, alerts = batch.len(), "flushing");
        match self.pipeline.run(&mut ctx, batch).await {
            Ok(()) => {
                // Resolved alerts have now been reported (or deduped away);
                // drop them so a fully-resolved group can wind down.
                let now = self.clock.now();
                self.alerts.retain(|_, alert| !alert.resolved_at(now));
            }
            Err(e) => {
                tracing::warn!(group_key = %self.group_key, err = %e, "flush failed; will retry next interval");
            }
        }
    }
}

#[cfg(test)]
#[path = "group_tests.rs"]
mod tests;
