// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster peer abstraction.
//!
//! The core needs exactly four things from a membership layer: the local
//! peer's deterministic position, broadcast of state deltas, delivery of
//! remote deltas into the local replicated stores, and a settle signal after
//! join.  Any transport implementing [`ClusterPeer`] plugs in; this module
//! ships the standalone single-node peer and an in-process mesh used by the
//! end-to-end cluster tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

/// Replicated-state channel names.
pub const STATE_SILENCES: &str = "sil";
pub const STATE_NFLOG: &str = "nfl";

/// Receiver side of a replicated state: accepts remote deltas.
pub trait MergeSink: Send + Sync {
    fn merge_remote(&self, payload: &[u8]);
}

/// Narrow clustering contract consumed by the core.
pub trait ClusterPeer: Send + Sync + fmt::Debug {
    /// Deterministic ordinal of this peer within the membership; position 0
    /// notifies first.
    fn position(&self) -> usize;

    /// Current membership size, including this peer.
    fn peer_count(&self) -> usize;

    /// True once initial state exchange has finished after join.
    fn is_settled(&self) -> bool;

    /// Send a state delta to every other peer.  Best effort; never blocks.
    fn broadcast(&self, state: &'static str, payload: Vec<u8>);

    /// Register the local sink that remote deltas for `state` are fed into.
    fn register(&self, state: &'static str, sink: Arc<dyn MergeSink>);
}

/// Poll `peer` until it reports settled or `timeout` elapses.
pub async fn wait_settled(peer: &dyn ClusterPeer, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if peer.is_settled() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Single-node peer: position 0, always settled, broadcasts go nowhere.
#[derive(Debug, Default)]
pub struct StandalonePeer;

impl ClusterPeer for StandalonePeer {
    fn position(&self) -> usize {
        0
    }

    fn peer_count(&self) -> usize {
        1
    }

    fn is_settled(&self) -> bool {
        true
    }

    fn broadcast(&self, _state: &'static str, _payload: Vec<u8>) {}

    fn register(&self, _state: &'static str, _sink: Arc<dyn MergeSink>) {}
}

// -- In-process mesh ----------------------------------------------------------

/// Shared fabric connecting [`MeshPeer`]s in one process.
///
/// Delivery is immediate and in joining order; good enough to exercise the
/// replication contract without a network.
#[derive(Default)]
pub struct MeshNetwork {
    peers: Mutex<Vec<Weak<MeshPeer>>>,
}

impl MeshNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Join the mesh; positions are assigned in join order.
    pub fn join(self: &Arc<Self>) -> Arc<MeshPeer> {
        let mut peers = self.peers.lock();
        let peer = Arc::new(MeshPeer {
            network: Arc::downgrade(self),
            position: peers.len(),
            sinks: Mutex::new(HashMap::new()),
        });
        peers.push(Arc::downgrade(&peer));
        peer
    }

    fn deliver(&self, from: usize, state: &'static str, payload: &[u8]) {
        let peers: Vec<Arc<MeshPeer>> =
            self.peers.lock().iter().filter_map(Weak::upgrade).collect();
        for peer in peers {
            if peer.position == from {
                continue;
            }
            let sink = peer.sinks.lock().get(state).cloned();
            if let Some(sink) = sink {
                sink.merge_remote(payload);
            }
        }
    }

    fn len(&self) -> usize {
        self.peers.lock().iter().filter(|p| p.strong_count() > 0).count()
    }
}

/// One member of a [`MeshNetwork`].
pub struct MeshPeer {
    network: Weak<MeshNetwork>,
    position: usize,
    sinks: Mutex<HashMap<&'static str, Arc<dyn MergeSink>>>,
}

impl fmt::Debug for MeshPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeshPeer").field("position", &self.position).finish()
    }
}

impl ClusterPeer for MeshPeer {
    fn position(&self) -> usize {
        self.position
    }

    fn peer_count(&self) -> usize {
        self.network.upgrade().map(|n| n.len()).unwrap_or(1)
    }

    fn is_settled(&self) -> bool {
        true
    }

    fn broadcast(&self, state: &'static str, payload: Vec<u8>) {
        if let Some(network) = self.network.upgrade() {
            network.deliver(self.position, state, &payload);
        }
    }

    fn register(&self, state: &'static str, sink: Arc<dyn MergeSink>) {
        self.sinks.lock().insert(state, sink);
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
