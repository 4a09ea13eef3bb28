// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer-token guard for the alert and silence APIs.
//!
//! Auth is opt-in: without `--auth-token` every route is open.  When a token
//! is configured, collectors and operators must present it; `/api/v2/status`
//! and `/metrics` stay open so load balancer probes and scrapers keep
//! working without credentials.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;
use crate::state::AppState;

/// Routes reachable without credentials even when auth is on.
const OPEN_PATHS: &[&str] = &["/api/v2/status", "/metrics"];

/// Pull the token out of an `Authorization: Bearer …` header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
}

/// Compare secrets without short-circuiting on the first differing byte, so
/// response timing leaks nothing about the expected token.
fn secrets_match(presented: &str, expected: &str) -> bool {
    let (a, b) = (presented.as_bytes(), expected.as_bytes());
    let mut diff = a.len() ^ b.len();
    for i in 0..a.len().min(b.len()) {
        diff |= usize::from(a[i] ^ b[i]);
    }
    diff == 0
}

/// Axum middleware enforcing the configured bearer token.
pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.server.auth_token.as_deref() else {
        return next.run(req).await;
    };
    if OPEN_PATHS.contains(&req.uri().path()) {
        return next.run(req).await;
    }
    match bearer_token(req.headers()) {
        Some(token) if secrets_match(token, expected) => next.run(req).await,
        _ => ApiError::Unauthorized.into_response(),
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
