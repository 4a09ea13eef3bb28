// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gossip-replicated silence store.
//!
//! An observed-remove set with last-writer-wins per id: an incoming record
//! replaces the local one iff its `updated_at` is strictly greater, ties
//! broken by comparing the encoded records.  Expired-past-retention records
//! shrink to tombstones which are themselves gossiped, merged, and purged
//! after a second, longer grace.
//!
//! Writers are serialized; readers clone an `Arc` of the current map and
//! scan without holding any lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::cluster::{ClusterPeer, MergeSink, STATE_SILENCES};
use crate::model::{LabelSet, Silence, SilenceState};
use crate::snapshot::{write_snapshot, FrameReader};

/// One replicated record: a full silence or its tombstone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SilenceEntry {
    Full(Silence),
    Tombstone { id: Uuid, updated_at: DateTime<Utc> },
}

impl SilenceEntry {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Full(s) => s.id,
            Self::Tombstone { id, .. } => *id,
        }
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            Self::Full(s) => s.updated_at,
            Self::Tombstone { updated_at, .. } => *updated_at,
        }
    }
}

/// True when `incoming` should replace `local` under the LWW rule.
fn lww_wins(incoming: &SilenceEntry, local: &SilenceEntry) -> bool {
    if incoming.updated_at() != local.updated_at() {
        return incoming.updated_at() > local.updated_at();
    }
    // Deterministic tie-break: lexicographically greater encoding wins.
    let a = postcard::to_allocvec(incoming).unwrap_or_default();
    let b = postcard::to_allocvec(local).unwrap_or_default();
    a > b
}

type SilenceMap = HashMap<Uuid, SilenceEntry>;

pub struct SilenceStore {
    state: RwLock<Arc<SilenceMap>>,
    clock: SharedClock,
    peer: Arc<dyn ClusterPeer>,
    retention: ChronoDuration,
    snapshot_path: PathBuf,
    /// Records skipped on restore/merge because they failed to decode.
    pub skipped_records: AtomicU64,
}

impl SilenceStore {
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

    fn snapshot_map(&self) -> Arc<SilenceMap> {
        Arc::clone(&self.state.read())
    }

    fn mutate(&self, f: impl FnOnce(&mut SilenceMap)) {
        let mut guard = self.state.write();
        let mut next = (**guard).clone();
        f(&mut next);
        *guard = Arc::new(next);
    }

    /// `updated_at` for a local rewrite of `id`: strictly after whatever the
    /// current record carries, so the LWW rule propagates the write even when
    /// the clock has not advanced.
    fn next_updated_at(&self, id: Uuid, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.snapshot_map().get(&id) {
            Some(prev) if now <= prev.updated_at() => {
                prev.updated_at() + ChronoDuration::milliseconds(1)
            }
            _ => now,
        }
    }

    fn broadcast_entry(&self, entry: &SilenceEntry) {
        match postcard::to_allocvec(&vec![entry.clone()]) {
            Ok(payload) => self.peer.broadcast(STATE_SILENCES, payload),
            Err(e) => tracing::error!(err = %e, "failed to encode silence delta"),
        }
    }

    /// Create or update a silence; returns its id.
    ///
    /// Matchers are immutable: changing them, or touching an expired
    /// silence, supersedes the old record under a fresh id.
    pub fn set(&self, mut silence: Silence) -> anyhow::Result<Uuid> {
        silence.validate()?;
        let now = self.clock.now();

        if !silence.id.is_nil() {
            let existing = self.snapshot_map().get(&silence.id).cloned();
            match existing {
                Some(SilenceEntry::Full(prev)) => {
                    let matchers_changed = prev.matchers != silence.matchers;
                    if matchers_changed || prev.state_at(now) == SilenceState::Expired {
                        // Supersede: retire the old id, keep going with a new one.
                        self.expire(prev.id)?;
                        silence.id = Uuid::new_v4();
                    }
                }
                Some(SilenceEntry::Tombstone { .. }) | None => {
                    anyhow::bail!("silence {} not found", silence.id);
                }
            }
        } else {
            silence.id = Uuid::new_v4();
        }

        silence.updated_at = self.next_updated_at(silence.id, now);
        let entry = SilenceEntry::Full(silence.clone());
        self.mutate(|map| {
            map.insert(silence.id, entry.clone());
        });
        self.broadcast_entry(&entry);
        tracing::debug!(silence_id = %silence.id, "silence set");
        Ok(silence.id)
    }

    /// End a silence now.  Pending silences are collapsed so they never
    /// activate; expiring an already-expired silence is a no-op.
    pub fn expire(&self, id: Uuid) -> anyhow::Result<()> {
        let now = self.clock.now();
        let current = self.snapshot_map().get(&id).cloned();
        let mut silence = match current {
            Some(SilenceEntry::Full(s)) => s,
            Some(SilenceEntry::Tombstone { .. }) | None => {
                anyhow::bail!("silence {id} not found");
            }
        };
        match silence.state_at(now) {
            SilenceState::Expired => return Ok(()),
            SilenceState::Pending => {
                silence.starts_at = now;
                silence.ends_at = now;
            }
            SilenceState::Active => silence.ends_at = now,
        }
        silence.updated_at = self.next_updated_at(id, now);
        let entry = SilenceEntry::Full(silence);
        self.mutate(|map| {
            map.insert(id, entry.clone());
        });
        self.broadcast_entry(&entry);
        tracing::debug!(silence_id = %id, "silence expired");
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Option<Silence> {
        match self.snapshot_map().get(&id) {
            Some(SilenceEntry::Full(s)) => Some(s.clone()),
            _ => None,
        }
    }

    /// All non-tombstone silences, unordered.
    pub fn all(&self) -> Vec<Silence> {
        self.snapshot_map()
            .values()
            .filter_map(|e| match e {
                SilenceEntry::Full(s) => Some(s.clone()),
                SilenceEntry::Tombstone { .. } => None,
            })
            .collect()
    }

    /// Ids of currently-active silences whose matchers all accept `labels`.
    pub fn query(&self, labels: &LabelSet) -> Vec<Uuid> {
        let now = self.clock.now();
        let map = self.snapshot_map();
        let mut ids: Vec<Uuid> = map
            .values()
            .filter_map(|e| match e {
                SilenceEntry::Full(s)
                    if s.state_at(now) == SilenceState::Active && s.matches(labels) =>
                {
                    Some(s.id)
                }
                _ => None,
            })
            .collect();
        ids.sort_unstable();
        ids
    }

    /// (pending, active, expired) counts for metrics.
    pub fn counts(&self) -> (usize, usize, usize) {
        let now = self.clock.now();
        let map = self.snapshot_map();
        let mut counts = (0, 0, 0);
        for entry in map.values() {
            if let SilenceEntry::Full(s) = entry {
                match s.state_at(now) {
                    SilenceState::Pending => counts.0 += 1,
                    SilenceState::Active => counts.1 += 1,
                    SilenceState::Expired => counts.2 += 1,
                }
            }
        }
        counts
    }

    /// Apply a remote delta.  Never re-broadcasts.
    pub fn merge(&self, payload: &[u8]) {
        let entries: Vec<SilenceEntry> = match postcard::from_bytes(payload) {
            Ok(entries) => entries,
            Err(e) => {
                self.skipped_records.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(err = %e, "dropping undecodable silence delta");
                return;
            }
        };
        self.mutate(|map| {
            for entry in entries {
                let id = entry.id();
                match map.get(&id) {
                    Some(local) if !lww_wins(&entry, local) => {}
                    _ => {
                        map.insert(id, entry);
                    }
                }
            }
        });
    }

    /// Reduce expired-past-retention records to tombstones and purge
    /// tombstones past a second, longer grace.
    pub fn evict(&self) {
        let now = self.clock.now();
        let retention = self.retention;
        let tombstone_grace = retention * 2;
        self.mutate(|map| {
            let mut replace: Vec<(Uuid, SilenceEntry)> = Vec::new();
            let mut drop: Vec<Uuid> = Vec::new();
            for (id, entry) in map.iter() {
                match entry {
                    SilenceEntry::Full(s) if s.ends_at + retention < now => {
                        replace.push((
                            *id,
                            SilenceEntry::Tombstone { id: *id, updated_at: now },
                        ));
                    }
                    SilenceEntry::Tombstone { updated_at, .. }
                        if *updated_at + tombstone_grace < now =>
                    {
                        drop.push(*id);
                    }
                    _ => {}
                }
            }
            for (id, tomb) in replace {
                map.insert(id, tomb);
            }
            for id in drop {
                map.remove(&id);
            }
        });
    }

    /// Write the snapshot file; every entry, tombstones included.
    pub fn write_snapshot_file(&self) -> anyhow::Result<()> {
        let map = self.snapshot_map();
        let mut payloads = Vec::with_capacity(map.len());
        for entry in map.values() {
            payloads.push(postcard::to_allocvec(entry)?);
        }
        write_snapshot(&self.snapshot_path, payloads)?;
        tracing::debug!(records = map.len(), path = %self.snapshot_path.display(), "silence snapshot written");
        Ok(())
    }

    /// Load a snapshot, skipping and counting undecodable records.
    pub fn restore(&self, path: &Path) -> anyhow::Result<()> {
        if !path.exists() {
            return Ok(());
        }
        let mut skipped = 0u64;
        let mut loaded = 0usize;
        let reader = FrameReader::open(path)?;
        let mut entries: Vec<SilenceEntry> = Vec::new();
        for frame in reader {
            let frame = frame?;
            match postcard::from_bytes::<SilenceEntry>(&frame) {
                Ok(entry) => {
                    loaded += 1;
                    entries.push(entry);
                }
                Err(_) => skipped += 1,
            }
        }
        self.mutate(|map| {
            for entry in entries {
                let id = entry.id();
                match map.get(&id) {
                    Some(local) if !lww_wins(&entry, local) => {}
                    _ => {
                        map.insert(id, entry);
                    }
                }
            }
        });
        if skipped > 0 {
            self.skipped_records.fetch_add(skipped, Ordering::Relaxed);
            tracing::warn!(skipped, path = %path.display(), "skipped unparseable silence records");
        }
        tracing::info!(loaded, path = %path.display(), "silence snapshot restored");
        Ok(())
    }

    /// Periodic maintenance: evict, then snapshot.
    pub fn spawn_maintenance(
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
                store.evict();
                if let Err(e) = store.write_snapshot_file() {
                    tracing::error!(err = %e, "silence maintenance snapshot failed");
                }
            }
            // Final snapshot on shutdown.
            if let Err(e) = store.write_snapshot_file() {
                tracing::error!(err = %e, "silence shutdown snapshot failed");
            }
        })
    }
}

impl MergeSink for SilenceStore {
    fn merge_remote(&self, payload: &[u8]) {
        self.merge(payload);
    }
}

impl std::fmt::Debug for SilenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SilenceStore").field("len", &self.snapshot_map().len()).finish()
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
