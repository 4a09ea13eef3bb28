// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-local index of per-alert classification and delivery state.
//!
//! Rebuilt from scratch at startup; nothing here is persisted or replicated.
//! Readers always see a consistent entry: every access goes through one
//! short-lived lock over the whole map.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::model::Fingerprint;

/// Derived classification of one alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertState {
    /// Ingested but not yet classified by a pipeline pass.
    Unprocessed,
    Active,
    Suppressed { silenced_by: Vec<Uuid>, inhibited_by: Vec<Fingerprint> },
}

impl AlertState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unprocessed => "unprocessed",
            Self::Active => "active",
            Self::Suppressed { .. } => "suppressed",
        }
    }
}

/// Outcome of the most recent delivery attempt for one (receiver,
/// integration) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryMark {
    pub at: DateTime<Utc>,
    pub success: bool,
}

#[derive(Debug, Default)]
struct Mark {
    unprocessed: bool,
    silenced_by: Vec<Uuid>,
    inhibited_by: Vec<Fingerprint>,
    deliveries: HashMap<(String, u32), DeliveryMark>,
}

impl Mark {
    fn state(&self) -> AlertState {
        if self.unprocessed {
            AlertState::Unprocessed
        } else if self.silenced_by.is_empty() && self.inhibited_by.is_empty() {
            AlertState::Active
        } else {
            AlertState::Suppressed {
                silenced_by: self.silenced_by.clone(),
                inhibited_by: self.inhibited_by.clone(),
            }
        }
    }
}

/// The marker.  One entry per live fingerprint.
#[derive(Debug, Default)]
pub struct Marker {
    inner: RwLock<HashMap<Fingerprint, Mark>>,
}

impl Marker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh or re-put alert as unprocessed.
    pub fn set_unprocessed(&self, fp: Fingerprint) {
        let mut inner = self.inner.write();
        inner.entry(fp).or_default().unprocessed = true;
    }

    /// Record the silences currently muting `fp`; empty clears the tag and
    /// counts as a classification pass.
    pub fn set_silenced(&self, fp: Fingerprint, silenced_by: Vec<Uuid>) {
        let mut inner = self.inner.write();
        let mark = inner.entry(fp).or_default();
        mark.unprocessed = false;
        mark.silenced_by = silenced_by;
    }

    /// Record the source fingerprints currently inhibiting `fp`.
    pub fn set_inhibited(&self, fp: Fingerprint, inhibited_by: Vec<Fingerprint>) {
        let mut inner = self.inner.write();
        let mark = inner.entry(fp).or_default();
        mark.unprocessed = false;
        mark.inhibited_by = inhibited_by;
    }

    pub fn state(&self, fp: Fingerprint) -> AlertState {
        self.inner.read().get(&fp).map(Mark::state).unwrap_or(AlertState::Unprocessed)
    }

    pub fn silenced_by(&self, fp: Fingerprint) -> Vec<Uuid> {
        self.inner.read().get(&fp).map(|m| m.silenced_by.clone()).unwrap_or_default()
    }

    pub fn record_delivery(
        &self,
        fp: Fingerprint,
        receiver: &str,
        integration: u32,
        mark: DeliveryMark,
    ) {
        let mut inner = self.inner.write();
        inner
            .entry(fp)
            .or_default()
            .deliveries
            .insert((receiver.to_owned(), integration), mark);
    }

    pub fn last_delivery(
        &self,
        fp: Fingerprint,
        receiver: &str,
        integration: u32,
    ) -> Option<DeliveryMark> {
        self.inner
            .read()
            .get(&fp)?
            .deliveries
            .get(&(receiver.to_owned(), integration))
            .copied()
    }

    /// Drop an alert's entry entirely (GC).
    pub fn delete(&self, fp: Fingerprint) {
        self.inner.write().remove(&fp);
    }

    /// (active, suppressed, unprocessed) counts for metrics.
    pub fn counts(&self) -> (usize, usize, usize) {
        let inner = self.inner.read();
        let mut counts = (0, 0, 0);
        for mark in inner.values() {
            match mark.state() {
                AlertState::Active => counts.0 += 1,
                AlertState::Suppressed { .. } => counts.1 += 1,
                AlertState::Unprocessed => counts.2 += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
#[path = "marker_tests.rs"]
mod tests;
