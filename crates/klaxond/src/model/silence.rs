// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Silence records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::label::LabelSet;
use crate::model::matcher::{matches_all, Matcher};

/// An operator-declared suppression window.
///
/// Matchers are immutable once created; editing a silence's matchers creates
/// a new id that supersedes the old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Silence {
    pub id: Uuid,
    pub matchers: Vec<Matcher>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: String,
    pub comment: String,
}

/// Time-derived silence state; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SilenceState {
    Pending,
    Active,
    Expired,
}

impl SilenceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Expired => "expired",
        }
    }
}

impl Silence {
    pub fn state_at(&self, now: DateTime<Utc>) -> SilenceState {
        if now < self.starts_at {
            SilenceState::Pending
        } else if now < self.ends_at {
            SilenceState::Active
        } else {
            SilenceState::Expired
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.matchers.is_empty() {
            anyhow::bail!("silence must have at least one matcher");
        }
        if self.starts_at >= self.ends_at {
            anyhow::bail!("silence must start before it ends");
        }
        if self.comment.is_empty() {
            anyhow::bail!("silence requires a comment");
        }
        Ok(())
    }

    /// True when every matcher accepts `labels`.
    pub fn matches(&self, labels: &LabelSet) -> bool {
        matches_all(&self.matchers, labels)
    }
}

#[cfg(test)]
#[path = "silence_tests.rs"]
mod tests;
