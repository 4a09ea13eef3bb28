// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authoritative in-memory store for live alerts.
//!
//! Upserts merge by fingerprint; every accepted update fans out to
//! subscribers over bounded channels.  A subscriber that cannot keep up has
//! updates shed (never blocking ingest), with a counter incremented for each
//! shed message.  Expired alerts are garbage-collected on an independent
//! schedule.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::clock::SharedClock;
use crate::model::{Alert, Fingerprint};
use crate::store::marker::Marker;

const SHARDS: usize = 16;

/// Per-subscriber channel capacity before updates are shed.
const SUBSCRIBER_BUFFER: usize = 512;

struct Subscriber {
    tx: mpsc::Sender<Alert>,
}

pub struct AlertStore {
    shards: Vec<Mutex<HashMap<Fingerprint, Alert>>>,
    subscribers: Mutex<Vec<Subscriber>>,
    marker: Arc<Marker>,
    clock: SharedClock,
    retention: ChronoDuration,
    /// Updates dropped because a subscriber's backlog was full.
    pub shed_updates: AtomicU64,
    /// Alerts rejected at validation.
    pub invalid_alerts: AtomicU64,
}

/// A live feed of alerts: everything currently stored, then updates as they
/// arrive.  Dropping the subscription cancels it.
pub struct AlertSubscription {
    backlog: VecDeque<Alert>,
    rx: mpsc::Receiver<Alert>,
}

impl AlertSubscription {
    pub async fn recv(&mut self) -> Option<Alert> {
        if let Some(alert) = self.backlog.pop_front() {
            return Some(alert);
        }
        self.rx.recv().await
    }
}

impl AlertStore {
    pub fn new(marker: Arc<Marker>, clock: SharedClock, retention: Duration) -> Arc<Self> {
        Self::with_shards(marker, clock, retention, SHARDS)
    }

    fn with_shards(
        marker: Arc<Marker>,
        clock: SharedClock,
        retention: Duration,
        shards: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            shards: (0..shards.max(1)).map(|_| Mutex::new(HashMap::new())).collect(),
            subscribers: Mutex::new(Vec::new()),
            marker,
            clock,
            retention: ChronoDuration::from_std(retention)
                .unwrap_or_else(|_| ChronoDuration::hours(120)),
            shed_updates: AtomicU64::new(0),
            invalid_alerts: AtomicU64::new(0),
        })
    }

    fn shard(&self, fp: Fingerprint) -> &Mutex<HashMap<Fingerprint, Alert>> {
        // Length is fixed at construction and non-zero.
        &self.shards[(fp.0 as usize) % self.shards.len()]
    }

    /// Upsert a batch of alerts.  Valid alerts are stored and published even
    /// when others in the batch fail validation; the error reports every
    /// rejected alert.
    pub fn put(&self, alerts: impl IntoIterator<Item = Alert>) -> anyhow::Result<()> {
        let mut rejected: Vec<String> = Vec::new();
        for alert in alerts {
            if let Err(e) = alert.validate() {
                self.invalid_alerts.fetch_add(1, Ordering::Relaxed);
                rejected.push(e.to_string());
                continue;
            }
            let fp = alert.fingerprint();
            let merged = {
                let mut shard = self.shard(fp).lock();
                let merged = match shard.get(&fp) {
                    Some(existing) => existing.merge(&alert),
                    None => alert,
                };
                shard.insert(fp, merged.clone());
                merged
            };
            self.marker.set_unprocessed(fp);
            self.publish(&merged);
        }
        if !rejected.is_empty() {
            anyhow::bail!("{} invalid alert(s): {}", rejected.len(), rejected.join("; "));
        }
        Ok(())
    }

    fn publish(&self, alert: &Alert) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sub| match sub.tx.try_send(alert.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.shed_updates.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    pub fn get(&self, fp: Fingerprint) -> Option<Alert> {
        self.shard(fp).lock().get(&fp).cloned()
    }

    /// All stored alerts, sorted by fingerprint for deterministic iteration.
    pub fn all(&self) -> Vec<Alert> {
        let mut out: Vec<Alert> = Vec::new();
        for shard in &self.shards {
            out.extend(shard.lock().values().cloned());
        }
        out.sort_by_key(Alert::fingerprint);
        out
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of current alerts first, then live updates.
    pub fn subscribe(&self) -> AlertSubscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        // Register before snapshotting so no update can fall between the
        // snapshot and the live feed; a duplicate is harmless, a gap is not.
        self.subscribers.lock().push(Subscriber { tx });
        AlertSubscription { backlog: self.all().into(), rx }
    }

    /// Remove alerts resolved longer than the retention window ago.
    pub fn gc(&self) -> usize {
        let horizon = self.clock.now() - self.retention;
        let mut removed = 0;
        for shard in &self.shards {
            let dead: Vec<Fingerprint> = shard
                .lock()
                .iter()
                .filter(|(_, a)| a.ends_at < horizon)
                .map(|(fp, _)| *fp)
                .collect();
            for fp in dead {
                shard.lock().remove(&fp);
                self.marker.delete(fp);
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, "alert gc pass");
        }
        removed
    }

    pub fn spawn_gc(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => {}
                }
                store.gc();
            }
        })
    }
}

impl std::fmt::Debug for AlertStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertStore").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
#[path = "alerts_tests.rs"]
mod tests;
