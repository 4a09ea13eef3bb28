// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the alert and silence APIs.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::model::{matches_all, Alert, LabelSet, Matcher, Silence};
use crate::state::AppState;
use crate::store::marker::AlertState;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostableAlert {
    pub labels: LabelSet,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "generatorURL")]
    pub generator_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertStatusBody {
    pub state: &'static str,
    pub silenced_by: Vec<Uuid>,
    pub inhibited_by: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GettableAlert {
    pub labels: LabelSet,
    pub annotations: BTreeMap<String, String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "generatorURL")]
    pub generator_url: String,
    pub fingerprint: String,
    pub status: AlertStatusBody,
}

#[derive(Debug, Default, Deserialize)]
pub struct AlertsQuery {
    /// Include unsuppressed alerts (default true).
    pub active: Option<bool>,
    /// Include silenced alerts (default true).
    pub silenced: Option<bool>,
    /// Include inhibited alerts (default true).
    pub inhibited: Option<bool>,
    /// Comma-separated matcher expressions all returned alerts must satisfy.
    pub filter: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostableSilence {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub matchers: Vec<Matcher>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SilenceStatusBody {
    pub state: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GettableSilence {
    pub id: Uuid,
    pub matchers: Vec<Matcher>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: String,
    pub comment: String,
    pub status: SilenceStatusBody,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SilenceResponse {
    pub silence_id: Uuid,
}

#[derive(Debug, Default, Deserialize)]
pub struct SilencesQuery {
    /// Comma-separated equality matchers; only silences that would mute this
    /// label set are returned.
    pub filter: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    pub position: usize,
    pub peers: usize,
    pub settled: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: i64,
    pub config_digest: String,
    pub cluster: ClusterStatus,
    pub alert_count: usize,
    pub group_count: usize,
}

// -- Helpers ------------------------------------------------------------------

/// RFC-3339 zero values (`0001-01-01T00:00:00Z`) mean "unset".
fn is_zero(t: DateTime<Utc>) -> bool {
    t.timestamp() <= 0
}

fn parse_filter(filter: &Option<String>) -> Result<Vec<Matcher>, ApiError> {
    let Some(raw) = filter else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.parse().map_err(|_| ApiError::BadFilter(raw.clone())))
        .collect()
}

fn to_alert(
    postable: PostableAlert,
    now: DateTime<Utc>,
    resolve_timeout: chrono::Duration,
) -> Alert {
    let starts_at = postable.starts_at.filter(|t| !is_zero(*t)).unwrap_or(now);
    let (ends_at, open_ended) = match postable.ends_at.filter(|t| !is_zero(*t)) {
        Some(ends_at) => (ends_at, false),
        None => (now + resolve_timeout, true),
    };
    Alert {
        labels: postable.labels,
        annotations: postable.annotations,
        starts_at,
        ends_at,
        updated_at: now,
        generator_url: postable.generator_url,
        open_ended,
    }
}

// -- Alerts -------------------------------------------------------------------

pub async fn post_alerts(
    State(state): State<Arc<AppState>>,
    Json(postables): Json<Vec<PostableAlert>>,
) -> Result<StatusCode, ApiError> {
    let now = state.clock.now();
    let resolve_timeout = chrono::Duration::from_std(state.server.resolve_timeout())
        .unwrap_or_else(|_| chrono::Duration::minutes(5));
    let count = postables.len();
    let alerts = postables.into_iter().map(|p| to_alert(p, now, resolve_timeout));

    state.alerts.put(alerts).map_err(|e| ApiError::InvalidAlerts(e.to_string()))?;
    state.metrics.alerts_received.fetch_add(count as u64, Ordering::Relaxed);
    Ok(StatusCode::OK)
}

pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AlertsQuery>,
) -> Result<Json<Vec<GettableAlert>>, ApiError> {
    let filter = parse_filter(&query.filter)?;
    let want_active = query.active.unwrap_or(true);
    let want_silenced = query.silenced.unwrap_or(true);
    let want_inhibited = query.inhibited.unwrap_or(true);

    let mut out = Vec::new();
    for alert in state.alerts.all() {
        if !matches_all(&filter, &alert.labels) {
            continue;
        }
        let fp = alert.fingerprint();
        let (status, silenced_by, inhibited_by) = match state.marker.state(fp) {
            AlertState::Unprocessed => ("unprocessed", Vec::new(), Vec::new()),
            AlertState::Active => ("active", Vec::new(), Vec::new()),
            AlertState::Suppressed { silenced_by, inhibited_by } => {
                ("suppressed", silenced_by, inhibited_by)
            }
        };
        let include = match status {
            "suppressed" => {
                (!silenced_by.is_empty() && want_silenced)
                    || (!inhibited_by.is_empty() && want_inhibited)
            }
            _ => want_active,
        };
        if !include {
            continue;
        }
        out.push(GettableAlert {
            fingerprint: fp.to_string(),
            status: AlertStatusBody {
                state: status,
                silenced_by,
                inhibited_by: inhibited_by.iter().map(|f| f.to_string()).collect(),
            },
            labels: alert.labels,
            annotations: alert.annotations,
            starts_at: alert.starts_at,
            ends_at: alert.ends_at,
            updated_at: alert.updated_at,
            generator_url: alert.generator_url,
        });
    }
    Ok(Json(out))
}

// -- Silences -----------------------------------------------------------------

pub async fn list_silences(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SilencesQuery>,
) -> Result<Json<Vec<GettableSilence>>, ApiError> {
    let filter = parse_filter(&query.filter)?;
    let filter_labels: LabelSet = filter
        .iter()
        .filter(|m| m.op() == crate::model::MatchOp::Equal)
        .map(|m| (m.name(), m.value()))
        .collect();

    let now = state.clock.now();
    let mut silences = state.silences.all();
    silences.sort_by_key(|s| s.id);
    let out: Vec<GettableSilence> = silences
        .into_iter()
        .filter(|s| filter_labels.is_empty() || s.matches(&filter_labels))
        .map(|s| GettableSilence {
            status: SilenceStatusBody { state: s.state_at(now).as_str() },
            id: s.id,
            matchers: s.matchers,
            starts_at: s.starts_at,
            ends_at: s.ends_at,
            updated_at: s.updated_at,
            created_by: s.created_by,
            comment: s.comment,
        })
        .collect();
    Ok(Json(out))
}

pub async fn post_silence(
    State(state): State<Arc<AppState>>,
    Json(postable): Json<PostableSilence>,
) -> Result<Json<SilenceResponse>, ApiError> {
    let id = postable.id.unwrap_or(Uuid::nil());
    if !id.is_nil() && state.silences.get(id).is_none() {
        return Err(ApiError::SilenceNotFound(id));
    }
    let silence = Silence {
        id,
        matchers: postable.matchers,
        starts_at: postable.starts_at,
        ends_at: postable.ends_at,
        updated_at: postable.starts_at,
        created_by: postable.created_by,
        comment: postable.comment,
    };
    let id =
        state.silences.set(silence).map_err(|e| ApiError::InvalidSilence(e.to_string()))?;
    Ok(Json(SilenceResponse { silence_id: id }))
}

pub async fn delete_silence(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.silences.get(id).is_none() {
        return Err(ApiError::SilenceNotFound(id));
    }
    state.silences.expire(id).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(StatusCode::OK)
}

// -- Status & metrics ---------------------------------------------------------

pub async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let now = state.clock.now();
    Json(StatusResponse {
        status: "ready",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: (now - state.started_at).num_seconds(),
        config_digest: state.config_digest.clone(),
        cluster: ClusterStatus {
            position: state.peer.position(),
            peers: state.peer.peer_count(),
            settled: state.peer.is_settled(),
        },
        alert_count: state.alerts.len(),
        group_count: state.dispatcher.group_count(),
    })
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut out = String::new();
    let m = &state.metrics;
    let counter = |out: &mut String, name: &str, help: &str, value: u64| {
        let _ = writeln!(out, "# HELP {name} {help}");
        let _ = writeln!(out, "# TYPE {name} counter");
        let _ = writeln!(out, "{name} {value}");
    };
    let gauge = |out: &mut String, name: &str, labels: &str, value: usize| {
        let _ = writeln!(out, "{name}{labels} {value}");
    };

    counter(
        &mut out,
        "klaxon_alerts_received_total",
        "Alerts accepted by the ingest API.",
        m.alerts_received.load(Ordering::Relaxed),
    );
    counter(
        &mut out,
        "klaxon_alerts_invalid_total",
        "Alerts rejected at validation.",
        state.alerts.invalid_alerts.load(Ordering::Relaxed),
    );
    counter(
        &mut out,
        "klaxon_subscriber_updates_shed_total",
        "Alert updates dropped because a subscriber lagged.",
        state.alerts.shed_updates.load(Ordering::Relaxed),
    );
    counter(
        &mut out,
        "klaxon_group_flushes_total",
        "Group flushes that ran the notification pipeline.",
        m.group_flushes.load(Ordering::Relaxed),
    );
    counter(
        &mut out,
        "klaxon_notifications_attempted_total",
        "Integration delivery attempts.",
        m.notifications_attempted.load(Ordering::Relaxed),
    );
    counter(
        &mut out,
        "klaxon_notifications_retried_total",
        "Delivery attempts that were retries.",
        m.notifications_retried.load(Ordering::Relaxed),
    );
    counter(
        &mut out,
        "klaxon_notifications_failed_total",
        "Pipeline invocations that failed after retries.",
        m.notifications_failed.load(Ordering::Relaxed),
    );
    counter(
        &mut out,
        "klaxon_notifications_deduped_total",
        "Pipeline invocations short-circuited by the notification log.",
        m.notifications_deduped.load(Ordering::Relaxed),
    );
    counter(
        &mut out,
        "klaxon_snapshot_records_skipped_total",
        "Replicated-state records skipped as unparseable.",
        state.silences.skipped_records.load(Ordering::Relaxed)
            + state.nflog.skipped_records.load(Ordering::Relaxed),
    );

    let (active, suppressed, unprocessed) = state.marker.counts();
    let _ = writeln!(out, "# HELP klaxon_alerts Current alerts by state.");
    let _ = writeln!(out, "# TYPE klaxon_alerts gauge");
    gauge(&mut out, "klaxon_alerts", "{state=\"active\"}", active);
    gauge(&mut out, "klaxon_alerts", "{state=\"suppressed\"}", suppressed);
    gauge(&mut out, "klaxon_alerts", "{state=\"unprocessed\"}", unprocessed);

    let (pending, active_s, expired) = state.silences.counts();
    let _ = writeln!(out, "# HELP klaxon_silences Current silences by state.");
    let _ = writeln!(out, "# TYPE klaxon_silences gauge");
    gauge(&mut out, "klaxon_silences", "{state=\"pending\"}", pending);
    gauge(&mut out, "klaxon_silences", "{state=\"active\"}", active_s);
    gauge(&mut out, "klaxon_silences", "{state=\"expired\"}", expired);

    let _ = writeln!(out, "# HELP klaxon_nflog_entries Notification log entries.");
    let _ = writeln!(out, "# TYPE klaxon_nflog_entries gauge");
    gauge(&mut out, "klaxon_nflog_entries", "", state.nflog.len());

    let _ = writeln!(out, "# HELP klaxon_alert_groups Live alert groups.");
    let _ = writeln!(out, "# TYPE klaxon_alert_groups gauge");
    gauge(&mut out, "klaxon_alert_groups", "", state.dispatcher.group_count());

    let _ = writeln!(out, "# HELP klaxon_inhibition_sources Firing inhibition sources.");
    let _ = writeln!(out, "# TYPE klaxon_inhibition_sources gauge");
    gauge(&mut out, "klaxon_inhibition_sources", "", state.inhibitor.source_count());

    let _ = writeln!(out, "# HELP klaxon_peer_position Position of this peer in the cluster.");
    let _ = writeln!(out, "# TYPE klaxon_peer_position gauge");
    gauge(&mut out, "klaxon_peer_position", "", state.peer.position());

    out
}
