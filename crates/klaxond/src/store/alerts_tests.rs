// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::clock::ManualClock;
use crate::model::LabelSet;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap_or_default()
}

fn setup(now: i64) -> (Arc<ManualClock>, Arc<Marker>, Arc<AlertStore>) {
    let clock = Arc::new(ManualClock::new(at(now)));
    let marker = Arc::new(Marker::new());
    let store = AlertStore::new(marker.clone(), clock.clone(), Duration::from_secs(300));
    (clock, marker, store)
}

fn alert(pairs: &[(&str, &str)], starts: i64, ends: i64, updated: i64) -> Alert {
    Alert {
        labels: LabelSet::from_pairs(pairs.iter().copied()),
        annotations: BTreeMap::new(),
        starts_at: at(starts),
        ends_at: at(ends),
        updated_at: at(updated),
        generator_url: String::new(),
        open_ended: false,
    }
}

#[test]
fn put_then_get_by_fingerprint() -> anyhow::Result<()> {
    let (_clock, _marker, store) = setup(0);
    let a = alert(&[("alertname", "HighCPU"), ("host", "h1")], 0, 100, 0);
    let fp = a.fingerprint();

    store.put([a.clone()])?;
    assert_eq!(store.get(fp), Some(a));
    assert_eq!(store.len(), 1);
    Ok(())
}

#[test]
fn put_merges_same_fingerprint() -> anyhow::Result<()> {
    let (_clock, _marker, store) = setup(0);
    let a = alert(&[("alertname", "HighCPU")], 0, 100, 0);
    let fp = a.fingerprint();
    store.put([a])?;
    store.put([alert(&[("alertname", "HighCPU")], 0, 50, 5)])?;

    let merged = store.get(fp).ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(merged.ends_at, at(100), "ends_at only advances");
    assert_eq!(merged.updated_at, at(5));
    assert_eq!(store.len(), 1);
    Ok(())
}

#[test]
fn put_rejects_invalid_but_keeps_valid() {
    let (_clock, _marker, store) = setup(0);
    let good = alert(&[("alertname", "HighCPU")], 0, 100, 0);
    let bad = alert(&[], 0, 100, 0);

    let result = store.put([bad, good.clone()]);
    assert!(result.is_err());
    assert_eq!(store.len(), 1);
    assert_eq!(store.get(good.fingerprint()), Some(good));
    assert_eq!(store.invalid_alerts.load(Ordering::Relaxed), 1);
}

#[test]
fn put_marks_alert_unprocessed() -> anyhow::Result<()> {
    let (_clock, marker, store) = setup(0);
    let a = alert(&[("alertname", "HighCPU")], 0, 100, 0);
    let fp = a.fingerprint();
    store.put([a])?;
    assert_eq!(marker.state(fp), crate::store::marker::AlertState::Unprocessed);
    Ok(())
}

#[tokio::test]
async fn subscription_sees_snapshot_then_updates() -> anyhow::Result<()> {
    let (_clock, _marker, store) = setup(0);
    let first = alert(&[("alertname", "A")], 0, 100, 0);
    store.put([first.clone()])?;

    let mut sub = store.subscribe();
    let got = sub.recv().await.ok_or_else(|| anyhow::anyhow!("closed"))?;
    assert_eq!(got.labels, first.labels);

    let second = alert(&[("alertname", "B")], 0, 100, 1);
    store.put([second.clone()])?;
    let got = sub.recv().await.ok_or_else(|| anyhow::anyhow!("closed"))?;
    assert_eq!(got.labels, second.labels);
    Ok(())
}

#[tokio::test]
async fn dropped_subscription_is_pruned() -> anyhow::Result<()> {
    let (_clock, _marker, store) = setup(0);
    let sub = store.subscribe();
    drop(sub);

    store.put([alert(&[("alertname", "A")], 0, 100, 0)])?;
    store.put([alert(&[("alertname", "B")], 0, 100, 0)])?;
    assert_eq!(store.subscribers.lock().len(), 0);
    Ok(())
}

#[tokio::test]
async fn slow_subscriber_sheds_instead_of_blocking() -> anyhow::Result<()> {
    let (_clock, _marker, store) = setup(0);
    let _sub = store.subscribe();

    // Overflow the subscriber buffer without ever reading from it.
    for i in 0..(SUBSCRIBER_BUFFER + 10) {
        store.put([alert(&[("alertname", "A"), ("i", &i.to_string())], 0, 100, 0)])?;
    }
    assert_eq!(store.shed_updates.load(Ordering::Relaxed), 10);
    Ok(())
}

#[test]
fn gc_removes_long_resolved_alerts() -> anyhow::Result<()> {
    let (clock, marker, store) = setup(0);
    let live = alert(&[("alertname", "Live")], 0, 1000, 0);
    let dead = alert(&[("alertname", "Dead")], 0, 10, 0);
    let dead_fp = dead.fingerprint();
    store.put([live.clone(), dead])?;

    // Resolved, but within retention: kept.
    clock.set(at(200));
    assert_eq!(store.gc(), 0);

    // Resolved past retention: removed, marker entry dropped with it.
    clock.set(at(10 + 301));
    assert_eq!(store.gc(), 1);
    assert!(store.get(dead_fp).is_none());
    assert_eq!(marker.state(dead_fp), crate::store::marker::AlertState::Unprocessed);
    assert_eq!(store.len(), 1);
    Ok(())
}

#[test]
fn all_is_sorted_by_fingerprint() -> anyhow::Result<()> {
    let (_clock, _marker, store) = setup(0);
    for name in ["C", "A", "B", "D"] {
        store.put([alert(&[("alertname", name)], 0, 100, 0)])?;
    }
    let fps: Vec<_> = store.all().iter().map(Alert::fingerprint).collect();
    let mut sorted = fps.clone();
    sorted.sort_unstable();
    assert_eq!(fps, sorted);
    Ok(())
}
