// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::clock::ManualClock;
use crate::cluster::{MeshNetwork, StandalonePeer};
use chrono::TimeZone;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap_or_default()
}

fn log_at(secs: i64, dir: &Path) -> (Arc<ManualClock>, Arc<NotificationLog>) {
    let clock = Arc::new(ManualClock::new(at(secs)));
    let log = NotificationLog::new(
        clock.clone(),
        Arc::new(StandalonePeer),
        Duration::from_secs(7200),
        dir.join("nflog.snap"),
    );
    (clock, log)
}

fn key(receiver: &str) -> LogKey {
    LogKey { group_key: "0/alertname=HighCPU".into(), receiver: receiver.into(), integration: 0 }
}

fn fps(ns: &[u64]) -> BTreeSet<Fingerprint> {
    ns.iter().map(|n| Fingerprint(*n)).collect()
}

#[test]
fn record_and_get() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (_clock, log) = log_at(0, dir.path());

    log.record(key("ops"), fps(&[1, 2]), fps(&[3]));
    let entry = log.get(&key("ops")).ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(entry.firing, fps(&[1, 2]));
    assert_eq!(entry.resolved, fps(&[3]));
    assert_eq!(entry.timestamp, at(0));
    assert_eq!(entry.expires_at, at(7200));

    assert!(log.get(&key("other")).is_none());
    Ok(())
}

#[test]
fn record_with_stalled_clock_still_advances() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (_clock, log) = log_at(0, dir.path());

    log.record(key("ops"), fps(&[1]), fps(&[]));
    log.record(key("ops"), fps(&[1, 2]), fps(&[]));
    let entry = log.get(&key("ops")).ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(entry.firing, fps(&[1, 2]));
    assert!(entry.timestamp > at(0));
    Ok(())
}

#[test]
fn merge_prefers_newer_timestamp() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (_clock, log) = log_at(100, dir.path());
    log.record(key("ops"), fps(&[1]), fps(&[]));

    let stale = LogEntry {
        key: key("ops"),
        firing: fps(&[9]),
        resolved: fps(&[]),
        timestamp: at(50),
        expires_at: at(7250),
    };
    log.merge(&postcard::to_allocvec(&vec![stale])?);
    let entry = log.get(&key("ops")).ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(entry.firing, fps(&[1]));

    let fresh = LogEntry {
        key: key("ops"),
        firing: fps(&[9]),
        resolved: fps(&[]),
        timestamp: at(200),
        expires_at: at(7400),
    };
    log.merge(&postcard::to_allocvec(&vec![fresh])?);
    let entry = log.get(&key("ops")).ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(entry.firing, fps(&[9]));
    Ok(())
}

#[test]
fn tie_break_is_order_independent() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let dir2 = tempfile::tempdir()?;
    let (_c1, a) = log_at(0, dir.path());
    let (_c2, b) = log_at(0, dir2.path());

    let mk = |firing: &[u64]| LogEntry {
        key: key("ops"),
        firing: fps(firing),
        resolved: fps(&[]),
        timestamp: at(100),
        expires_at: at(7300),
    };
    let d1 = postcard::to_allocvec(&vec![mk(&[1])])?;
    let d2 = postcard::to_allocvec(&vec![mk(&[2])])?;

    a.merge(&d1);
    a.merge(&d2);
    b.merge(&d2);
    b.merge(&d1);
    assert_eq!(a.get(&key("ops")), b.get(&key("ops")));
    Ok(())
}

#[test]
fn broadcast_reaches_mesh_peer() {
    let dir = match tempfile::tempdir() {
        Ok(d) => d,
        Err(_) => return,
    };
    let network = MeshNetwork::new();
    let clock = Arc::new(ManualClock::new(at(0)));
    let peer_a = network.join();
    let peer_b = network.join();
    let a = NotificationLog::new(
        clock.clone(),
        peer_a.clone(),
        Duration::from_secs(7200),
        dir.path().join("a.snap"),
    );
    let b = NotificationLog::new(
        clock,
        peer_b.clone(),
        Duration::from_secs(7200),
        dir.path().join("b.snap"),
    );
    peer_a.register(STATE_NFLOG, a.clone());
    peer_b.register(STATE_NFLOG, b.clone());

    a.record(key("ops"), fps(&[1]), fps(&[]));
    assert_eq!(b.get(&key("ops")), a.get(&key("ops")));
}

#[test]
fn evict_drops_expired_entries_after_grace() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (clock, log) = log_at(0, dir.path());
    log.record(key("ops"), fps(&[1]), fps(&[]));

    // Expired but within grace: kept.
    clock.set(at(7200 + 60));
    log.evict();
    assert_eq!(log.len(), 1);

    // Past grace: dropped.
    clock.set(at(7200 + 16 * 60));
    log.evict();
    assert!(log.is_empty());
    Ok(())
}

#[test]
fn snapshot_roundtrip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (_clock, log) = log_at(0, dir.path());
    log.record(key("ops"), fps(&[1, 2]), fps(&[3]));
    log.write_snapshot_file()?;

    let (_clock2, restored) = log_at(0, dir.path());
    restored.restore(&dir.path().join("nflog.snap"))?;
    assert_eq!(restored.get(&key("ops")), log.get(&key("ops")));
    Ok(())
}

#[test]
fn restore_counts_undecodable_frames() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nflog.snap");
    crate::snapshot::write_snapshot(&path, vec![b"\xff\xffgarbage".to_vec()])?;

    let (_clock, log) = log_at(0, dir.path());
    log.restore(&path)?;
    assert!(log.is_empty());
    assert_eq!(log.skipped_records.load(Ordering::Relaxed), 1);
    Ok(())
}
