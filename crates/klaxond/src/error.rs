// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! API failure modes and their HTTP mapping.
//!
//! Variants carry their domain context so handlers can `?` straight out;
//! the wire shape is a flat `{code, message}` JSON body with the mapped
//! status.  Pipeline and background failures never surface here — they are
//! logged and retried where they happen.

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

/// Everything the HTTP surface can fail with.
#[derive(Debug)]
pub enum ApiError {
    /// One or more alerts in a batch failed validation; the message lists
    /// each rejection.  Valid alerts from the same batch were stored.
    InvalidAlerts(String),
    /// A `filter=` parameter did not parse as a matcher list.
    BadFilter(String),
    /// A posted silence violated its invariants (no matchers, inverted
    /// window, missing comment).
    InvalidSilence(String),
    /// Reference to a silence id this peer has never seen, or has already
    /// tombstoned away.
    SilenceNotFound(Uuid),
    /// Missing or wrong bearer token.
    Unauthorized,
    /// A store operation failed for reasons that are not the caller's fault.
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidAlerts(_) | Self::BadFilter(_) | Self::InvalidSilence(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::SilenceNotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code, stable across message wording changes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAlerts(_) => "invalid_alerts",
            Self::BadFilter(_) => "bad_filter",
            Self::InvalidSilence(_) => "invalid_silence",
            Self::SilenceNotFound(_) => "silence_not_found",
            Self::Unauthorized => "unauthorized",
            Self::Internal(_) => "internal",
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAlerts(detail) => write!(f, "invalid alerts: {detail}"),
            Self::BadFilter(expr) => write!(f, "filter {expr:?} is not a valid matcher list"),
            Self::InvalidSilence(detail) => write!(f, "invalid silence: {detail}"),
            Self::SilenceNotFound(id) => write!(f, "silence {id} not found"),
            Self::Unauthorized => f.write_str("missing or invalid bearer token"),
            Self::Internal(detail) => write!(f, "internal error: {detail}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
