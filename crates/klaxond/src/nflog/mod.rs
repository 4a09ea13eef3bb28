// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gossip-replicated notification log.
//!
//! Answers "what did *any* peer last deliver for this (group-key, receiver,
//! integration), and when?" — the basis of the pipeline's dedup stage and of
//! cluster staggering.  Same last-writer-wins discipline as the silence
//! store, keyed per entry, with greater `timestamp` winning and ties broken
//! on the encoded record.

pub mod store;

pub use store::{LogEntry, LogKey, NotificationLog};
