// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Notification log storage and replication.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::clock::SharedClock;
use crate::cluster::{ClusterPeer, MergeSink, STATE_NFLOG};
use crate::model::Fingerprint;
use crate::snapshot::{write_snapshot, FrameReader};

/// Identifies one notification stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogKey {
    pub group_key: String,
    pub receiver: String,
    pub integration: u32,
}

/// What was last delivered for a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub key: LogKey,
    pub firing: BTreeSet<Fingerprint>,
    pub resolved: BTreeSet<Fingerprint>,
    pub timestamp: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Extra slack past `expires_at` before an entry is dropped, so that a
/// slightly-behind peer can still observe it.
fn gc_grace() -> ChronoDuration {
    ChronoDuration::minutes(15)
}

fn lww_wins(incoming: &LogEntry, local: &LogEntry) -> bool {
    if incoming.timestamp != local.timestamp {
        return incoming.timestamp > local.timestamp;
    }
    let a = postcard::to_allocvec(incoming).unwrap_or_default();
    let b = postcard::to_allocvec(local).unwrap_or_default();
    a > b
}

type LogMap = HashMap<LogKey, LogEntry>;

pub struct NotificationLog {
    state: RwLock<Arc<LogMap>>,
    clock: SharedClock,
    peer: Arc<dyn ClusterPeer>,
    retention: ChronoDuration,
    snapshot_path: PathBuf,
    pub skipped_records: AtomicU64,
}

impl NotificationLog {
    pub fn new(
        clock: SharedClock,
        peer: Arc<dyn ClusterPeer>,
        retention: Duration,
        snapshot_path: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(Arc::new(HashMap::new())),
            clock,
            peer,
            retention: ChronoDuration::from_std(retention)
                .unwrap_or_else(|_| ChronoDuration::hours(120)),
            snapshot_path,
            skipped_records: AtomicU64::new(0),
        })
    }

    fn snapshot_map(&self) -> Arc<LogMap> {
        Arc::clone(&self.state.read())
    }

    fn mutate(&self, f: impl FnOnce(&mut LogMap)) {
        let mut guard = self.state.write();
        let mut next = (**guard).clone();
        f(&mut next);
        *guard = Arc::new(next);
    }

    /// Record a successful delivery and broadcast it to the cluster.
    pub fn record(
        &self,
        key: LogKey,
        firing: BTreeSet<Fingerprint>,
        resolved: BTreeSet<Fingerprint>,
    ) {
        let now = self.clock.now();
        // Strictly after any current entry so the LWW rule propagates this
        // write even under a stalled clock.
        let timestamp = match self.snapshot_map().get(&key) {
            Some(prev) if now <= prev.timestamp => {
                prev.timestamp + ChronoDuration::milliseconds(1)
            }
            _ => now,
        };
        let entry = LogEntry {
            key: key.clone(),
            firing,
            resolved,
            timestamp,
            expires_at: timestamp + self.retention,
        };
        self.mutate(|map| {
            map.insert(key, entry.clone());
        });
        match postcard::to_allocvec(&vec![entry]) {
            Ok(payload) => self.peer.broadcast(STATE_NFLOG, payload),
            Err(e) => tracing::error!(err = %e, "failed to encode notification log delta"),
        }
    }

    pub fn get(&self, key: &LogKey) -> Option<LogEntry> {
        self.snapshot_map().get(key).cloned()
    }

    /// Like `get`, but a timestamp from the future (clock skew on another
    /// peer) is clamped to `now + max_skew` and the correction is persisted
    /// locally, so a skewed entry cannot delay flushes past one repeat
    /// interval plus the skew allowance.  The clamp is never broadcast.
    pub fn get_clamped(
        &self,
        key: &LogKey,
        now: DateTime<Utc>,
        max_skew: ChronoDuration,
    ) -> Option<LogEntry> {
        let entry = self.snapshot_map().get(key).cloned()?;
        let limit = now + max_skew;
        if entry.timestamp <= limit {
            return Some(entry);
        }
        tracing::warn!(
            group_key = %entry.key.group_key,
            receiver = %entry.key.receiver,
            skew_secs = (entry.timestamp - limit).num_seconds(),
            "clamping notification log timestamp from the future"
        );
        let mut clamped = entry;
        clamped.timestamp = limit;
        self.mutate(|map| {
            map.insert(clamped.key.clone(), clamped.clone());
        });
        Some(clamped)
    }

    pub fn len(&self) -> usize {
        self.snapshot_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot_map().is_empty()
    }

    /// Apply a remote delta; never re-broadcasts.
    pub fn merge(&self, payload: &[u8]) {
        let entries: Vec<LogEntry> = match postcard::from_bytes(payload) {
            Ok(entries) => entries,
            Err(e) => {
                self.skipped_records.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(err = %e, "dropping undecodable notification log delta");
                return;
            }
        };
        self.mutate(|map| {
            for entry in entries {
                match map.get(&entry.key) {
                    Some(local) if !lww_wins(&entry, local) => {}
                    _ => {
                        map.insert(entry.key.clone(), entry);
                    }
                }
            }
        });
    }

    /// Drop entries past `expires_at` plus grace.
    pub fn evict(&self) {
        let now = self.clock.now();
        self.mutate(|map| {
            map.retain(|_, entry| entry.expires_at + gc_grace() >= now);
        });
    }

    pub fn write_snapshot_file(&self) -> anyhow::Result<()> {
        let map = self.snapshot_map();
        let mut payloads = Vec::with_capacity(map.len());
        for entry in map.values() {
            payloads.push(postcard::to_allocvec(entry)?);
        }
        write_snapshot(&self.snapshot_path, payloads)?;
        tracing::debug!(records = map.len(), path = %self.snapshot_path.display(), "notification log snapshot written");
        Ok(())
    }

    pub fn restore(&self, path: &Path) -> anyhow::Result<()> {
        if !path.exists() {
            return Ok(());
        }
        let mut skipped = 0u64;
        let mut entries: Vec<LogEntry> = Vec::new();
        let reader = FrameReader::open(path)?;
        for frame in reader {
            let frame = frame?;
            match postcard::from_bytes::<LogEntry>(&frame) {
                Ok(entry) => entries.push(entry),
                Err(_) => skipped += 1,
            }
        }
        let loaded = entries.len();
        self.mutate(|map| {
            for entry in entries {
                match map.get(&entry.key) {
                    Some(local) if !lww_wins(&entry, local) => {}
                    _ => {
                        map.insert(entry.key.clone(), entry);
                    }
                }
            }
        });
        if skipped > 0 {
            self.skipped_records.fetch_add(skipped, Ordering::Relaxed);
            tracing::warn!(skipped, path = %path.display(), "skipped unparseable notification log records");
        }
        tracing::info!(loaded, path = %path.display(), "notification log restored");
        Ok(())
    }

    pub fn spawn_maintenance(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let log = Arc::clone(self);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => {}
                }
                log.evict();
                if let Err(e) = log.write_snapshot_file() {
                    tracing::error!(err = %e, "notification log maintenance snapshot failed");
                }
            }
            if let Err(e) = log.write_snapshot_file() {
                tracing::error!(err = %e, "notification log shutdown snapshot failed");
            }
        })
    }
}

impl MergeSink for NotificationLog {
    fn merge_remote(&self, payload: &[u8]) {
        self.merge(payload);
    }
}

impl std::fmt::Debug for NotificationLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationLog").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
