// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The dispatcher: routes every incoming alert into its group(s) and owns
//! the group runners.

pub mod group;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::clock::SharedClock;
use crate::metrics::Metrics;
use crate::model::Alert;
use crate::notify::ReceiverPipeline;
use crate::route::{Route, RouteTree};
use crate::store::alerts::AlertSubscription;
use group::{group_key, group_labels, AlertGroup, GroupHandle, GroupParams};

/// How often finished group handles are swept out of the index.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

pub struct Dispatcher {
    tree: RouteTree,
    pipelines: HashMap<String, Arc<ReceiverPipeline>>,
    groups: Mutex<HashMap<String, GroupHandle>>,
    clock: SharedClock,
    metrics: Arc<Metrics>,
    /// Parent token for every group runner; cancelling it stops them all.
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        tree: RouteTree,
        pipelines: Vec<Arc<ReceiverPipeline>>,
        clock: SharedClock,
        metrics: Arc<Metrics>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let pipelines =
            pipelines.into_iter().map(|p| (p.receiver().to_owned(), p)).collect();
        Arc::new(Self {
            tree,
            pipelines,
            groups: Mutex::new(HashMap::new()),
            clock,
            metrics,
            cancel,
        })
    }

    /// Route one alert into every matching group, creating runners on first
    /// contact.
    pub fn route(&self, alert: &Alert) {
        for route in self.tree.matching(&alert.labels) {
            self.deliver(route, alert);
        }
    }

    fn deliver(&self, route: &Route, alert: &Alert) {
        let labels = group_labels(route, alert);
        let key = group_key(&route.id, &labels);

        let mut groups = self.groups.lock();
        if let Some(handle) = groups.get(&key) {
            if handle.send(alert.clone()) {
                return;
            }
            // Runner already wound down; fall through and replace it.
        }
        let Some(pipeline) = self.pipelines.get(&route.receiver) else {
            // Config validation makes this unreachable; quarantine rather
            // than drop silently if it ever happens.
            tracing::error!(receiver = %route.receiver, "no pipeline for receiver; alert not grouped");
            return;
        };
        let handle = AlertGroup::spawn(
            GroupParams::from_route(route),
            labels,
            Arc::clone(pipeline),
            self.clock.clone(),
            self.metrics.clone(),
            self.cancel.child_token(),
        );
        handle.send(alert.clone());
        groups.insert(key, handle);
    }

    /// Drop handles whose runners have exited.
    pub fn sweep(&self) {
        self.groups.lock().retain(|_, handle| !handle.is_done());
    }

    pub fn group_count(&self) -> usize {
        self.groups.lock().values().filter(|h| !h.is_done()).count()
    }

    /// Stop every group runner and the dispatch loop.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Consume the alert feed until cancelled.
    pub fn spawn(self: &Arc<Self>, mut subscription: AlertSubscription) -> tokio::task::JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
            sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = dispatcher.cancel.cancelled() => break,
                    _ = sweep.tick() => dispatcher.sweep(),
                    alert = subscription.recv() => match alert {
                        Some(alert) => dispatcher.route(&alert),
                        None => break,
                    },
                }
            }
            for (_, handle) in dispatcher.groups.lock().drain() {
                handle.stop();
            }
        })
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("receivers", &self.pipelines.len())
            .field("groups", &self.group_count())
            .finish()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
