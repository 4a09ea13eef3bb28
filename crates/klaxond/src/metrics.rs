// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide counters, rendered by the `/metrics` endpoint.

use std::sync::atomic::AtomicU64;

/// Counters shared across the pipeline and the dispatcher.  Gauges (alert
/// counts, silence states, log sizes) are read from the stores directly at
/// render time.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Alerts accepted by the ingest API.
    pub alerts_received: AtomicU64,
    /// Group flushes that ran a pipeline.
    pub group_flushes: AtomicU64,
    /// Integration calls made.
    pub notifications_attempted: AtomicU64,
    /// Integration calls re-issued after a transient failure.
    pub notifications_retried: AtomicU64,
    /// Invocations that ended in failure after retries.
    pub notifications_failed: AtomicU64,
    /// Invocations short-circuited by the dedup stage.
    pub notifications_deduped: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }
}
