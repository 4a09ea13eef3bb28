// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::clock::ManualClock;
use crate::notify::Stage;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::future::BoxFuture;
use parking_lot::Mutex as PlMutex;
use std::collections::BTreeMap;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap_or_default()
}

fn alert(pairs: &[(&str, &str)], ends: i64) -> Alert {
    Alert {
        labels: LabelSet::from_pairs(pairs.iter().copied()),
        annotations: BTreeMap::new(),
        starts_at: at(0),
        ends_at: at(ends),
        updated_at: at(0),
        generator_url: String::new(),
        open_ended: false,
    }
}

type Batches = Arc<PlMutex<Vec<(String, Vec<Alert>)>>>;

/// Terminal stage that records every batch it sees.
struct RecordingStage {
    batches: Batches,
    fail: bool,
}

impl Stage for RecordingStage {
    fn exec<'a>(
        &'a self,
        ctx: &'a mut NotifyContext,
        alerts: Vec<Alert>,
    ) -> BoxFuture<'a, anyhow::Result<Vec<Alert>>> {
        Box::pin(async move {
            self.batches.lock().push((ctx.group_key.clone(), alerts));
            if self.fail {
                anyhow::bail!("synthetic stage failure");
            }
            Ok(Vec::new())
        })
    }
}

fn recording_pipeline(fail: bool) -> (Arc<ReceiverPipeline>, Batches) {
    let batches: Batches = Arc::new(PlMutex::new(Vec::new()));
    let stage = RecordingStage { batches: batches.clone(), fail };
    (Arc::new(ReceiverPipeline::new("ops".into(), vec![Box::new(stage)])), batches)
}

fn params(wait_ms: u64, interval_ms: u64) -> GroupParams {
    GroupParams {
        route_id: "0".into(),
        receiver: "ops".into(),
        group_wait: Duration::from_millis(wait_ms),
        group_interval: Duration::from_millis(interval_ms),
        repeat_interval: Duration::from_secs(4 * 3600),
        mute_time_intervals: Vec::new(),
        active_time_intervals: Vec::new(),
    }
}

fn spawn_group(
    wait_ms: u64,
    interval_ms: u64,
    fail: bool,
) -> (GroupHandle, Batches, CancellationToken) {
    let (pipeline, batches) = recording_pipeline(fail);
    let clock = Arc::new(ManualClock::new(at(100)));
    let cancel = CancellationToken::new();
    let handle = AlertGroup::spawn(
        params(wait_ms, interval_ms),
        LabelSet::from_pairs([("alertname", "HighCPU")]),
        pipeline,
        clock,
        Arc::new(Metrics::new()),
        cancel.clone(),
    );
    (handle, batches, cancel)
}

#[tokio::test(start_paused = true)]
async fn first_flush_waits_group_wait() {
    let (handle, batches, _cancel) = spawn_group(50, 1000, false);
    assert!(handle.send(alert(&[("alertname", "HighCPU"), ("host", "h1")], 10_000)));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(batches.lock().is_empty(), "nothing before group_wait");

    tokio::time::sleep(Duration::from_millis(40)).await;
    let got = batches.lock();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].0, "0:{alertname=\"HighCPU\"}");
    assert_eq!(got[0].1.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn alerts_within_group_wait_share_one_flush() {
    let (handle, batches, _cancel) = spawn_group(50, 1000, false);
    handle.send(alert(&[("alertname", "HighCPU"), ("host", "h1")], 10_000));
    tokio::time::sleep(Duration::from_millis(10)).await;
    handle.send(alert(&[("alertname", "HighCPU"), ("host", "h2")], 10_000));

    tokio::time::sleep(Duration::from_millis(60)).await;
    let got = batches.lock();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].1.len(), 2, "both alerts in one batch");
}

#[tokio::test(start_paused = true)]
async fn batches_are_sorted_by_fingerprint() {
    let (handle, batches, _cancel) = spawn_group(50, 1000, false);
    for host in ["h3", "h1", "h2"] {
        handle.send(alert(&[("alertname", "HighCPU"), ("host", host)], 10_000));
    }
    tokio::time::sleep(Duration::from_millis(60)).await;

    let got = batches.lock();
    let fps: Vec<_> = got[0].1.iter().map(Alert::fingerprint).collect();
    let mut sorted = fps.clone();
    sorted.sort_unstable();
    assert_eq!(fps, sorted);
}

#[tokio::test(start_paused = true)]
async fn later_flushes_use_group_interval() {
    let (handle, batches, _cancel) = spawn_group(50, 200, false);
    handle.send(alert(&[("alertname", "HighCPU"), ("host", "h1")], 10_000));
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(batches.lock().len(), 1);

    handle.send(alert(&[("alertname", "HighCPU"), ("host", "h2")], 10_000));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(batches.lock().len(), 1, "no flush before group_interval elapses");

    tokio::time::sleep(Duration::from_millis(150)).await;
    let got = batches.lock();
    assert_eq!(got.len(), 2);
    assert_eq!(got[1].1.len(), 2, "second flush carries the whole set");
}

#[tokio::test(start_paused = true)]
async fn resolved_only_group_winds_down() {
    let (handle, batches, _cancel) = spawn_group(50, 200, false);
    // Already resolved relative to the manual clock (now = t+100).
    handle.send(alert(&[("alertname", "HighCPU")], 10));

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(batches.lock().len(), 1, "resolution is still reported once");
    assert!(handle.is_done());
    assert!(!handle.send(alert(&[("alertname", "HighCPU")], 10)), "done group refuses alerts");
}

#[tokio::test(start_paused = true)]
async fn failed_flush_keeps_alerts_for_retry() {
    let (handle, batches, _cancel) = spawn_group(50, 200, true);
    handle.send(alert(&[("alertname", "HighCPU")], 10));

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(batches.lock().len(), 1);
    assert!(!handle.is_done(), "failed flush keeps even resolved alerts");

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(batches.lock().len() >= 2, "retried on the next interval");
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_the_runner() {
    let (handle, batches, cancel) = spawn_group(100, 200, false);
    handle.send(alert(&[("alertname", "HighCPU")], 10_000));
    cancel.cancel();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(batches.lock().is_empty(), "cancelled before first flush");
    assert!(handle.is_done());
}

#[test]
fn group_key_is_route_scoped_and_canonical() {
    let labels = LabelSet::from_pairs([("b", "2"), ("a", "1")]);
    assert_eq!(group_key("0/1", &labels), "0/1:{a=\"1\", b=\"2\"}");
    assert_eq!(group_key("0/1", &LabelSet::new()), "0/1:{}");
}
