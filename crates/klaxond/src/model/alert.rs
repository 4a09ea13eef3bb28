// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The alert record and its merge rules.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::label::{Fingerprint, LabelSet};

/// A single alert as held by the store.
///
/// `ends_at` is always concrete: open-ended alerts (no end time supplied by
/// the collector) get `now + resolve_timeout` assigned at ingest and are
/// re-extended on every re-put, tracked by `open_ended`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub labels: LabelSet,
    pub annotations: BTreeMap<String, String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// Server-assigned on ingest.
    pub updated_at: DateTime<Utc>,
    pub generator_url: String,
    pub open_ended: bool,
}

/// Firing/resolved split, as reported to integrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertPhase {
    Firing,
    Resolved,
}

impl AlertPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Firing => "firing",
            Self::Resolved => "resolved",
        }
    }
}

impl Alert {
    pub fn fingerprint(&self) -> Fingerprint {
        self.labels.fingerprint()
    }

    pub fn resolved_at(&self, now: DateTime<Utc>) -> bool {
        self.ends_at <= now
    }

    pub fn phase_at(&self, now: DateTime<Utc>) -> AlertPhase {
        if self.resolved_at(now) {
            AlertPhase::Resolved
        } else {
            AlertPhase::Firing
        }
    }

    /// Ingest-time invariants.  Violations surface as validation errors to
    /// the caller; nothing is stored.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.labels.is_empty() {
            anyhow::bail!("alert has no labels");
        }
        if !self.labels.names_valid() {
            anyhow::bail!("alert {} has an empty label name", self.labels);
        }
        if self.ends_at < self.starts_at {
            anyhow::bail!(
                "alert {} ends ({}) before it starts ({})",
                self.labels,
                self.ends_at,
                self.starts_at
            );
        }
        Ok(())
    }

    /// Merge an update with the same fingerprint into this alert.
    ///
    /// The record with the later `updated_at` wins for scalar fields;
    /// `ends_at` only ever advances.
    pub fn merge(&self, other: &Alert) -> Alert {
        let (newer, older) = if other.updated_at >= self.updated_at {
            (other, self)
        } else {
            (self, other)
        };
        let mut out = newer.clone();
        out.starts_at = newer.starts_at.min(older.starts_at);
        out.ends_at = newer.ends_at.max(older.ends_at);
        out
    }
}

#[cfg(test)]
#[path = "alert_tests.rs"]
mod tests;
