// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport for the alert server.

pub mod api;
pub mod auth;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

/// Build the axum `Router` with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Alerts
        .route("/api/v2/alerts", post(api::post_alerts).get(api::list_alerts))
        // Silences
        .route("/api/v2/silences", get(api::list_silences).post(api::post_silence))
        .route("/api/v2/silences/{id}", delete(api::delete_silence))
        // Status (no auth)
        .route("/api/v2/status", get(api::status))
        // Metrics (no auth)
        .route("/metrics", get(api::metrics))
        // Middleware
        .layer(middleware::from_fn_with_state(state.clone(), auth::require_bearer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
