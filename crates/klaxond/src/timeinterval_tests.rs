// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn interval(json: serde_json::Value) -> TimeInterval {
    serde_json::from_value(json).unwrap_or_default()
}

fn utc(s: &str) -> DateTime<Utc> {
    s.parse().unwrap_or_default()
}

#[test]
fn empty_interval_accepts_everything() {
    let ti = TimeInterval::default();
    assert!(ti.contains(utc("2026-03-14T09:26:53Z")));
}

#[test]
fn time_range_is_start_inclusive_end_exclusive() {
    let ti = interval(serde_json::json!({
        "times": [{"start_time": "09:00", "end_time": "17:00"}],
    }));
    assert!(!ti.contains(utc("2026-03-02T08:59:00Z")));
    assert!(ti.contains(utc("2026-03-02T09:00:00Z")));
    assert!(ti.contains(utc("2026-03-02T16:59:00Z")));
    assert!(!ti.contains(utc("2026-03-02T17:00:00Z")));
}

#[test]
fn weekday_ranges() {
    let ti = interval(serde_json::json!({"weekdays": ["monday:friday"]}));
    assert!(ti.contains(utc("2026-03-02T12:00:00Z"))); // Monday
    assert!(ti.contains(utc("2026-03-06T12:00:00Z"))); // Friday
    assert!(!ti.contains(utc("2026-03-07T12:00:00Z"))); // Saturday
}

#[test]
fn fields_are_conjunctive() {
    let ti = interval(serde_json::json!({
        "weekdays": ["saturday", "sunday"],
        "times": [{"start_time": "00:00", "end_time": "06:00"}],
    }));
    assert!(ti.contains(utc("2026-03-07T03:00:00Z"))); // Saturday night
    assert!(!ti.contains(utc("2026-03-07T12:00:00Z"))); // Saturday noon
    assert!(!ti.contains(utc("2026-03-04T03:00:00Z"))); // Wednesday night
}

#[test]
fn negative_days_count_from_month_end() {
    let ti = interval(serde_json::json!({"days_of_month": ["-1"]}));
    assert!(ti.contains(utc("2026-02-28T12:00:00Z")));
    assert!(!ti.contains(utc("2026-02-27T12:00:00Z")));
    assert!(ti.contains(utc("2026-01-31T12:00:00Z")));
}

#[test]
fn mixed_sign_day_range_spans_to_month_end() {
    let ti = interval(serde_json::json!({"days_of_month": ["15:-1"]}));
    assert!(ti.contains(utc("2026-02-15T12:00:00Z")));
    assert!(ti.contains(utc("2026-02-28T12:00:00Z")));
    assert!(!ti.contains(utc("2026-02-14T12:00:00Z")));
}

#[test]
fn months_accept_names_and_numbers() {
    let ti = interval(serde_json::json!({"months": ["december:december", "1"]}));
    assert!(ti.contains(utc("2026-12-25T00:00:00Z")));
    assert!(ti.contains(utc("2026-01-05T00:00:00Z")));
    assert!(!ti.contains(utc("2026-06-05T00:00:00Z")));
}

#[test]
fn years_bound_the_interval() {
    let ti = interval(serde_json::json!({"years": ["2025:2026"]}));
    assert!(ti.contains(utc("2026-06-05T00:00:00Z")));
    assert!(!ti.contains(utc("2027-06-05T00:00:00Z")));
}

#[test]
fn fixed_offset_location_shifts_the_day() {
    // 23:30 UTC on Friday is already Saturday in +02:00.
    let ti = interval(serde_json::json!({
        "weekdays": ["saturday"],
        "location": "+02:00",
    }));
    assert!(ti.contains(utc("2026-03-06T23:30:00Z")));
    assert!(!ti.contains(utc("2026-03-06T20:00:00Z")));
}

#[test]
fn bad_inputs_are_rejected() {
    for bad in [
        serde_json::json!({"weekdays": ["someday"]}),
        serde_json::json!({"months": ["13"]}),
        serde_json::json!({"days_of_month": ["0"]}),
        serde_json::json!({"times": [{"start_time": "17:00", "end_time": "09:00"}]}),
        serde_json::json!({"location": "Mars/Olympus"}),
        serde_json::json!({"weekdays": ["friday:monday"]}),
    ] {
        assert!(serde_json::from_value::<TimeInterval>(bad.clone()).is_err(), "{bad}");
    }
}

#[test]
fn in_any_is_disjunctive_across_members() {
    let a = interval(serde_json::json!({"weekdays": ["monday"]}));
    let b = interval(serde_json::json!({"weekdays": ["friday"]}));
    let both = vec![a, b];
    assert!(in_any(&both, utc("2026-03-02T12:00:00Z"))); // Monday
    assert!(in_any(&both, utc("2026-03-06T12:00:00Z"))); // Friday
    assert!(!in_any(&both, utc("2026-03-04T12:00:00Z"))); // Wednesday
}
