// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read-side adapter from the silence store to the pipeline's mute check.

use std::sync::Arc;

use crate::model::LabelSet;
use crate::silence::store::SilenceStore;
use crate::store::marker::Marker;

/// Answers "is this label set silenced right now?", tagging the marker as a
/// side effect so the API can report why an alert is suppressed.
#[derive(Debug)]
pub struct Silencer {
    store: Arc<SilenceStore>,
    marker: Arc<Marker>,
}

impl Silencer {
    pub fn new(store: Arc<SilenceStore>, marker: Arc<Marker>) -> Self {
        Self { store, marker }
    }

    pub fn mutes(&self, labels: &LabelSet) -> bool {
        let ids = self.store.query(labels);
        let muted = !ids.is_empty();
        self.marker.set_silenced(labels.fingerprint(), ids);
        muted
    }
}

#[cfg(test)]
#[path = "silencer_tests.rs"]
mod tests;
