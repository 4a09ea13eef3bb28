// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios: a real klaxond instance, a real webhook sink, and
//! wall-clock timings scaled down to keep the suite fast.

use std::time::Duration;

use chrono::Utc;
use klaxon_specs::{mesh, webhook_config, SpecServer, WebhookSink};

const POST_TIMEOUT: Duration = Duration::from_secs(5);

// -- S1: basic dispatch -------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn basic_dispatch_waits_group_wait_then_posts() -> anyhow::Result<()> {
    let sink = WebhookSink::start().await?;
    let server = SpecServer::start(webhook_config(&sink.url, "500ms", "5s", "4h")).await?;

    server.put_firing(&[&[("alertname", "HighCPU"), ("host", "h1")]]).await?;

    // Well before group_wait nothing has fired.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(sink.count(), 0, "no delivery before group_wait");

    assert!(sink.wait_for_count(1, POST_TIMEOUT).await, "delivery after group_wait");
    let received = sink.all();
    assert_eq!(received[0].body["status"], "firing");
    assert_eq!(received[0].body["groupLabels"]["alertname"], "HighCPU");
    assert_eq!(received[0].body["alerts"].as_array().map(Vec::len), Some(1));

    // The unchanged group does not renotify right away.
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(sink.count(), 1);
    Ok(())
}

// -- S2: grouping -------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn alerts_in_same_group_share_one_notification() -> anyhow::Result<()> {
    let sink = WebhookSink::start().await?;
    let server = SpecServer::start(webhook_config(&sink.url, "700ms", "5s", "4h")).await?;

    server.put_firing(&[&[("alertname", "HighCPU"), ("host", "h1")]]).await?;
    tokio::time::sleep(Duration::from_millis(150)).await;
    server.put_firing(&[&[("alertname", "HighCPU"), ("host", "h2")]]).await?;

    assert!(sink.wait_for_count(1, POST_TIMEOUT).await);
    assert_eq!(sink.fingerprints(0).len(), 2, "both alerts in one delivery");

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(sink.count(), 1, "no second delivery for the same batch");
    Ok(())
}

// -- S3: repeat suppression ---------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn unchanged_set_is_suppressed_within_repeat_interval() -> anyhow::Result<()> {
    let sink = WebhookSink::start().await?;
    let server = SpecServer::start(webhook_config(&sink.url, "300ms", "400ms", "4h")).await?;

    server.put_firing(&[&[("alertname", "HighCPU"), ("host", "h1")]]).await?;
    assert!(sink.wait_for_count(1, POST_TIMEOUT).await);

    // Several group_intervals pass; the dedup stage short-circuits each one.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(sink.count(), 1, "unchanged firing set renotifies only after repeat_interval");

    // A new alert in the group defeats suppression.
    server.put_firing(&[&[("alertname", "HighCPU"), ("host", "h2")]]).await?;
    assert!(sink.wait_for_count(2, POST_TIMEOUT).await);
    assert_eq!(sink.fingerprints(1).len(), 2);
    Ok(())
}

// -- S4: silence --------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn silenced_alert_is_not_delivered() -> anyhow::Result<()> {
    let sink = WebhookSink::start().await?;
    let server = SpecServer::start(webhook_config(&sink.url, "300ms", "400ms", "4h")).await?;

    let now = Utc::now();
    server
        .create_silence(serde_json::json!({
            "matchers": [{"name": "alertname", "value": "HighCPU", "isRegex": false, "isEqual": true}],
            "startsAt": now.to_rfc3339(),
            "endsAt": (now + chrono::Duration::hours(1)).to_rfc3339(),
            "createdBy": "ops",
            "comment": "maintenance",
        }))
        .await?;

    server.put_firing(&[&[("alertname", "HighCPU"), ("host", "h1")]]).await?;

    // Give several flush cycles a chance to misbehave.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(sink.count(), 0, "silenced alert never reaches the webhook");

    let alerts = server.alerts().await?;
    assert_eq!(alerts[0]["status"]["state"], "suppressed");
    assert_eq!(alerts[0]["status"]["silencedBy"].as_array().map(Vec::len), Some(1));
    Ok(())
}

// -- S5: inhibition -----------------------------------------------------------

fn inhibit_config(sink_url: &str) -> serde_json::Value {
    serde_json::json!({
        "route": {
            "receiver": "hook",
            "group_by": ["alertname"],
            "group_wait": "200ms",
            "group_interval": "400ms",
            "repeat_interval": "4h",
        },
        "receivers": [
            {"name": "hook", "webhook_configs": [{"url": sink_url}]},
        ],
        "inhibit_rules": [{
            "source_matchers": ["severity=critical"],
            "target_matchers": ["severity=warning"],
            "equal": ["cluster"],
        }],
    })
}

fn deliveries_with_alertname(sink: &WebhookSink, name: &str) -> usize {
    sink.all()
        .iter()
        .filter(|r| {
            r.body["alerts"]
                .as_array()
                .map(|alerts| alerts.iter().any(|a| a["labels"]["alertname"] == name))
                .unwrap_or(false)
        })
        .count()
}

#[tokio::test(flavor = "multi_thread")]
async fn inhibited_alert_resumes_after_source_resolves() -> anyhow::Result<()> {
    let sink = WebhookSink::start().await?;
    let server = SpecServer::start(inhibit_config(&sink.url)).await?;

    // Source fires first and gets indexed.
    server
        .put_firing(&[&[("alertname", "NodeDown"), ("severity", "critical"), ("cluster", "c1")]])
        .await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    server
        .put_firing(&[&[("alertname", "HighLatency"), ("severity", "warning"), ("cluster", "c1")]])
        .await?;

    // The source's own notification arrives; the target stays muted.
    assert!(sink.wait_for_count(1, POST_TIMEOUT).await);
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(deliveries_with_alertname(&sink, "HighLatency"), 0, "target muted while source fires");
    assert_eq!(deliveries_with_alertname(&sink, "NodeDown"), 1);

    // Resolve the source; the target resumes within a group_interval or two.
    server
        .put_resolved(&[("alertname", "NodeDown"), ("severity", "critical"), ("cluster", "c1")])
        .await?;
    let deadline = tokio::time::Instant::now() + POST_TIMEOUT;
    loop {
        if deliveries_with_alertname(&sink, "HighLatency") >= 1 {
            break;
        }
        anyhow::ensure!(
            tokio::time::Instant::now() < deadline,
            "target never resumed after source resolved"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Ok(())
}

// -- S6: cluster stagger ------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn second_peer_dedupes_after_stagger_wait() -> anyhow::Result<()> {
    let sink = WebhookSink::start().await?;
    let network = mesh();
    let peer0 = network.join();
    let peer1 = network.join();

    let config = webhook_config(&sink.url, "300ms", "5s", "4h");
    let server0 =
        SpecServer::start_peered(config.clone(), peer0, Duration::from_millis(700)).await?;
    let server1 =
        SpecServer::start_peered(config, peer1, Duration::from_millis(700)).await?;

    // Collectors double-send to both peers.
    let alert: &[(&str, &str)] = &[("alertname", "HighCPU"), ("host", "h1")];
    server0.put_firing(&[alert]).await?;
    server1.put_firing(&[alert]).await?;

    // Peer 0 notifies at group_wait; peer 1 wakes group_wait + stagger later,
    // observes the replicated log entry, and stays quiet.
    assert!(sink.wait_for_count(1, POST_TIMEOUT).await);
    tokio::time::sleep(Duration::from_millis(1800)).await;
    assert_eq!(sink.count(), 1, "exactly one delivery across the cluster");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn silences_replicate_across_peers() -> anyhow::Result<()> {
    let sink = WebhookSink::start().await?;
    let network = mesh();
    let peer0 = network.join();
    let peer1 = network.join();

    let config = webhook_config(&sink.url, "300ms", "5s", "4h");
    let server0 =
        SpecServer::start_peered(config.clone(), peer0, Duration::from_millis(100)).await?;
    let server1 =
        SpecServer::start_peered(config, peer1, Duration::from_millis(100)).await?;

    let now = Utc::now();
    let id = server0
        .create_silence(serde_json::json!({
            "matchers": [{"name": "alertname", "value": "HighCPU", "isRegex": false, "isEqual": true}],
            "startsAt": now.to_rfc3339(),
            "endsAt": (now + chrono::Duration::hours(1)).to_rfc3339(),
            "createdBy": "ops",
            "comment": "fleet-wide window",
        }))
        .await?;

    let listed: Vec<serde_json::Value> = server1
        .client
        .get(format!("{}/api/v2/silences", server1.base_url))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["id"], id);

    // And it mutes alerts on the peer that never saw the POST.
    server1.put_firing(&[&[("alertname", "HighCPU"), ("host", "h9")]]).await?;
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(sink.count(), 0);
    Ok(())
}
