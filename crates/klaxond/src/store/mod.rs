// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory alert storage and the per-alert marker index.

pub mod alerts;
pub mod marker;

pub use alerts::{AlertStore, AlertSubscription};
pub use marker::{AlertState, DeliveryMark, Marker};
