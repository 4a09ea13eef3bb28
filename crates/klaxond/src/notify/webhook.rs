// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Webhook integration: POSTs the grouped alert batch as JSON.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use reqwest::Client;
use serde::Serialize;

use crate::clock::SharedClock;
use crate::config::WebhookConfig;
use crate::model::{Alert, AlertPhase, LabelSet};
use crate::notify::{Delivery, Integration, NotifyContext};

/// Payload schema version, for receivers that care.
const PAYLOAD_VERSION: &str = "4";

#[derive(Debug)]
pub struct WebhookIntegration {
    url: String,
    bearer_token: Option<String>,
    send_resolved: bool,
    max_alerts: usize,
    client: Client,
    clock: SharedClock,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookPayload<'a> {
    version: &'static str,
    group_key: &'a str,
    truncated_alerts: usize,
    status: &'static str,
    receiver: &'a str,
    group_labels: &'a LabelSet,
    common_labels: LabelSet,
    alerts: Vec<WebhookAlert<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookAlert<'a> {
    status: &'static str,
    labels: &'a LabelSet,
    annotations: &'a BTreeMap<String, String>,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    generator_url: &'a str,
    fingerprint: String,
}

/// Labels present with the same value on every alert in the batch.
fn common_labels(alerts: &[&Alert]) -> LabelSet {
    let Some((first, rest)) = alerts.split_first() else {
        return LabelSet::new();
    };
    first
        .labels
        .iter()
        .filter(|&(name, value)| rest.iter().all(|a| a.labels.get(name) == Some(value)))
        .collect()
}

impl WebhookIntegration {
    pub fn new(config: &WebhookConfig, clock: SharedClock) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            url: config.url.clone(),
            bearer_token: config.bearer_token.clone(),
            send_resolved: config.send_resolved,
            max_alerts: config.max_alerts,
            client,
            clock,
        }
    }

    fn classify(status: reqwest::StatusCode) -> Delivery {
        if status.is_success() {
            Delivery::Success
        } else if status.as_u16() == 408 || status.as_u16() == 429 || status.is_server_error() {
            Delivery::Transient(format!("webhook returned {status}"))
        } else {
            Delivery::Permanent(format!("webhook returned {status}"))
        }
    }
}

impl Integration for WebhookIntegration {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn notify<'a>(
        &'a self,
        ctx: &'a NotifyContext,
        alerts: &'a [Alert],
    ) -> BoxFuture<'a, Delivery> {
        Box::pin(async move {
            let now = self.clock.now();
            let mut selected: Vec<&Alert> = alerts
                .iter()
                .filter(|a| self.send_resolved || !a.resolved_at(now))
                .collect();
            if selected.is_empty() {
                return Delivery::Success;
            }
            let total = selected.len();
            if self.max_alerts > 0 && total > self.max_alerts {
                selected.truncate(self.max_alerts);
            }
            let any_firing = selected.iter().any(|a| !a.resolved_at(now));
            let payload = WebhookPayload {
                version: PAYLOAD_VERSION,
                group_key: &ctx.group_key,
                truncated_alerts: total - selected.len(),
                status: if any_firing {
                    AlertPhase::Firing.as_str()
                } else {
                    AlertPhase::Resolved.as_str()
                },
                receiver: &ctx.receiver,
                group_labels: &ctx.group_labels,
                common_labels: common_labels(&selected),
                alerts: selected
                    .iter()
                    .map(|a| WebhookAlert {
                        status: a.phase_at(now).as_str(),
                        labels: &a.labels,
                        annotations: &a.annotations,
                        starts_at: a.starts_at,
                        ends_at: a.ends_at,
                        generator_url: &a.generator_url,
                        fingerprint: a.fingerprint().to_string(),
                    })
                    .collect(),
            };

            let mut request = self.client.post(&self.url).json(&payload);
            if let Some(ref token) = self.bearer_token {
                request = request.bearer_auth(token);
            }
            match request.send().await {
                Ok(resp) => Self::classify(resp.status()),
                Err(e) => Delivery::Transient(format!("webhook request failed: {e}")),
            }
        })
    }
}

#[cfg(test)]
#[path = "webhook_tests.rs"]
mod tests;
