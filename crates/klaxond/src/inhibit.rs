// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inhibition: firing source alerts mute matching target alerts.
//!
//! For each rule the inhibitor keeps a live index of firing alerts accepted
//! by the rule's source matchers, bucketed by the values of the rule's
//! `equal` labels.  The index catches up lazily from the alert feed: a
//! just-fired source may not mute a target until the next pipeline cycle,
//! but a mute verdict is never reported when nothing currently inhibits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::clock::SharedClock;
use crate::model::{matches_all, Alert, Fingerprint, LabelSet, Matcher};
use crate::store::alerts::AlertSubscription;
use crate::store::marker::Marker;

/// Interval between sweeps of resolved sources out of the index.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// One configured inhibition rule.
#[derive(Debug, Clone)]
pub struct InhibitRule {
    pub source_matchers: Vec<Matcher>,
    pub target_matchers: Vec<Matcher>,
    /// Labels that must agree between source and target for muting to apply.
    pub equal: Vec<String>,
}

#[derive(Debug)]
struct RuleIndex {
    rule: InhibitRule,
    /// equal-label values → firing source alerts.
    sources: HashMap<Vec<String>, HashMap<Fingerprint, Alert>>,
}

#[derive(Debug)]
pub struct Inhibitor {
    rules: RwLock<Vec<RuleIndex>>,
    marker: Arc<Marker>,
    clock: SharedClock,
}

impl Inhibitor {
    pub fn new(rules: Vec<InhibitRule>, marker: Arc<Marker>, clock: SharedClock) -> Arc<Self> {
        Arc::new(Self {
            rules: RwLock::new(
                rules.into_iter().map(|rule| RuleIndex { rule, sources: HashMap::new() }).collect(),
            ),
            marker,
            clock,
        })
    }

    /// Feed one alert event into the source index.
    pub fn handle(&self, alert: &Alert) {
        let now = self.clock.now();
        let firing = !alert.resolved_at(now);
        let fp = alert.fingerprint();
        let mut rules = self.rules.write();
        for index in rules.iter_mut() {
            if !matches_all(&index.rule.source_matchers, &alert.labels) {
                continue;
            }
            let bucket_key = alert.labels.values_of(&index.rule.equal);
            if firing {
                index.sources.entry(bucket_key).or_default().insert(fp, alert.clone());
            } else if let Some(bucket) = index.sources.get_mut(&bucket_key) {
                bucket.remove(&fp);
                if bucket.is_empty() {
                    index.sources.remove(&bucket_key);
                }
            }
        }
    }

    /// True iff some rule's target matchers accept `labels` and a distinct
    /// source alert is currently firing in the matching equal bucket.  Tags
    /// the marker with the inhibiting fingerprints either way.
    pub fn mutes(&self, labels: &LabelSet) -> bool {
        let now = self.clock.now();
        let fp = labels.fingerprint();
        let mut inhibited_by: Vec<Fingerprint> = Vec::new();
        {
            let rules = self.rules.read();
            for index in rules.iter() {
                if !matches_all(&index.rule.target_matchers, labels) {
                    continue;
                }
                let bucket_key = labels.values_of(&index.rule.equal);
                let Some(bucket) = index.sources.get(&bucket_key) else {
                    continue;
                };
                for (source_fp, source) in bucket {
                    // An alert never inhibits itself, and a source that has
                    // since resolved no longer mutes anything.
                    if *source_fp != fp && !source.resolved_at(now) {
                        inhibited_by.push(*source_fp);
                    }
                }
            }
        }
        inhibited_by.sort_unstable();
        inhibited_by.dedup();
        let muted = !inhibited_by.is_empty();
        self.marker.set_inhibited(fp, inhibited_by);
        muted
    }

    /// Drop sources that resolved without a final event (e.g. store GC).
    pub fn sweep(&self) {
        let now = self.clock.now();
        let mut rules = self.rules.write();
        for index in rules.iter_mut() {
            for bucket in index.sources.values_mut() {
                bucket.retain(|_, alert| !alert.resolved_at(now));
            }
            index.sources.retain(|_, bucket| !bucket.is_empty());
        }
    }

    /// Number of distinct firing sources across all rules, for metrics.
    pub fn source_count(&self) -> usize {
        let rules = self.rules.read();
        rules.iter().map(|i| i.sources.values().map(HashMap::len).sum::<usize>()).sum()
    }

    /// Consume the alert feed until cancelled.
    pub fn spawn(
        self: &Arc<Self>,
        mut subscription: AlertSubscription,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let inhibitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
            sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sweep.tick() => inhibitor.sweep(),
                    alert = subscription.recv() => match alert {
                        Some(alert) => inhibitor.handle(&alert),
                        None => break,
                    },
                }
            }
        })
    }
}

#[cfg(test)]
#[path = "inhibit_tests.rs"]
mod tests;
