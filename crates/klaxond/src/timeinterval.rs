// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Named time intervals for mute/active windows on routes.
//!
//! An interval is a set of calendar ranges: `{times, weekdays, days_of_month,
//! months, years, location}`.  A timestamp is *in* the interval iff every
//! present field accepts it; an empty field accepts anything.  Within one
//! field, any listed range may accept.  Boundaries are inclusive at the start
//! and exclusive at the end.  Locations are `UTC` (default) or a fixed
//! `±HH:MM` offset.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// A minute-of-day range, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TimeRangeRepr", into = "TimeRangeRepr")]
pub struct TimeRange {
    pub start_minute: u32,
    pub end_minute: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TimeRangeRepr {
    start_time: String,
    end_time: String,
}

fn parse_minute_of_day(s: &str) -> anyhow::Result<u32> {
    let (h, m) = s
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("time {s:?} is not HH:MM"))?;
    let h: u32 = h.parse()?;
    let m: u32 = m.parse()?;
    if h > 24 || m > 59 || (h == 24 && m != 0) {
        anyhow::bail!("time {s:?} out of range");
    }
    Ok(h * 60 + m)
}

impl TryFrom<TimeRangeRepr> for TimeRange {
    type Error = anyhow::Error;

    fn try_from(repr: TimeRangeRepr) -> anyhow::Result<Self> {
        let start_minute = parse_minute_of_day(&repr.start_time)?;
        let end_minute = parse_minute_of_day(&repr.end_time)?;
        if start_minute >= end_minute {
            anyhow::bail!("time range {}..{} is empty", repr.start_time, repr.end_time);
        }
        Ok(Self { start_minute, end_minute })
    }
}

impl From<TimeRange> for TimeRangeRepr {
    fn from(r: TimeRange) -> Self {
        let fmt = |m: u32| format!("{:02}:{:02}", m / 60, m % 60);
        Self { start_time: fmt(r.start_minute), end_time: fmt(r.end_minute) }
    }
}

/// An inclusive range over a calendar field, parsed from `"a"` or `"a:b"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InclusiveRange {
    pub begin: i32,
    pub end: i32,
}

impl InclusiveRange {
    fn contains(&self, v: i32) -> bool {
        self.begin <= v && v <= self.end
    }
}

fn parse_range(s: &str, one: impl Fn(&str) -> anyhow::Result<i32>) -> anyhow::Result<InclusiveRange> {
    // Negative days of month use a leading minus; only a colon that is not
    // part of a leading sign splits the range.
    match s.split_once(':') {
        Some((a, b)) => {
            let begin = one(a.trim())?;
            let end = one(b.trim())?;
            // A positive begin with a negative end ("1:-1") spans to the end
            // of the month and is only resolvable per-month at query time.
            if begin > end && (begin < 0) == (end < 0) {
                anyhow::bail!("range {s:?} is inverted");
            }
            Ok(InclusiveRange { begin, end })
        }
        None => {
            let v = one(s.trim())?;
            Ok(InclusiveRange { begin: v, end: v })
        }
    }
}

fn parse_weekday(s: &str) -> anyhow::Result<i32> {
    // Sunday = 0, matching common cron conventions.
    Ok(match s.to_ascii_lowercase().as_str() {
        "sunday" => 0,
        "monday" => 1,
        "tuesday" => 2,
        "wednesday" => 3,
        "thursday" => 4,
        "friday" => 5,
        "saturday" => 6,
        other => anyhow::bail!("unknown weekday {other:?}"),
    })
}

fn parse_month(s: &str) -> anyhow::Result<i32> {
    if let Ok(n) = s.parse::<i32>() {
        if !(1..=12).contains(&n) {
            anyhow::bail!("month {n} out of range");
        }
        return Ok(n);
    }
    Ok(match s.to_ascii_lowercase().as_str() {
        "january" => 1,
        "february" => 2,
        "march" => 3,
        "april" => 4,
        "may" => 5,
        "june" => 6,
        "july" => 7,
        "august" => 8,
        "september" => 9,
        "october" => 10,
        "november" => 11,
        "december" => 12,
        other => anyhow::bail!("unknown month {other:?}"),
    })
}

fn parse_day_of_month(s: &str) -> anyhow::Result<i32> {
    let n: i32 = s.parse()?;
    if n == 0 || n > 31 || n < -31 {
        anyhow::bail!("day of month {n} out of range");
    }
    Ok(n)
}

fn parse_year(s: &str) -> anyhow::Result<i32> {
    Ok(s.parse()?)
}

/// One conjunctive member of a named time interval.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "TimeIntervalRepr", into = "TimeIntervalRepr")]
pub struct TimeInterval {
    pub times: Vec<TimeRange>,
    pub weekdays: Vec<InclusiveRange>,
    pub days_of_month: Vec<InclusiveRange>,
    pub months: Vec<InclusiveRange>,
    pub years: Vec<InclusiveRange>,
    /// Fixed offset from UTC; `None` means UTC.
    pub location: Option<FixedOffset>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TimeIntervalRepr {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    times: Vec<TimeRange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    weekdays: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    days_of_month: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    months: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    years: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<String>,
}

impl TryFrom<TimeIntervalRepr> for TimeInterval {
    type Error = anyhow::Error;

    fn try_from(repr: TimeIntervalRepr) -> anyhow::Result<Self> {
        let location = match repr.location.as_deref() {
            None | Some("UTC") | Some("utc") => None,
            Some(off) => Some(
                off.parse::<FixedOffset>()
                    .map_err(|e| anyhow::anyhow!("location {off:?}: {e} (UTC or ±HH:MM)"))?,
            ),
        };
        let parse_all = |items: &[String], one: fn(&str) -> anyhow::Result<i32>| {
            items.iter().map(|s| parse_range(s, one)).collect::<anyhow::Result<Vec<_>>>()
        };
        Ok(Self {
            times: repr.times,
            weekdays: parse_all(&repr.weekdays, parse_weekday)?,
            days_of_month: parse_all(&repr.days_of_month, parse_day_of_month)?,
            months: parse_all(&repr.months, parse_month)?,
            years: parse_all(&repr.years, parse_year)?,
            location,
        })
    }
}

impl From<TimeInterval> for TimeIntervalRepr {
    fn from(ti: TimeInterval) -> Self {
        let fmt_all = |items: &[InclusiveRange]| {
            items
                .iter()
                .map(|r| {
                    if r.begin == r.end {
                        r.begin.to_string()
                    } else {
                        format!("{}:{}", r.begin, r.end)
                    }
                })
                .collect()
        };
        Self {
            times: ti.times,
            weekdays: fmt_all(&ti.weekdays),
            days_of_month: fmt_all(&ti.days_of_month),
            months: fmt_all(&ti.months),
            years: fmt_all(&ti.years),
            location: ti.location.map(|o| o.to_string()),
        }
    }
}

fn days_in_month(year: i32, month: u32) -> i32 {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    match (next, NaiveDate::from_ymd_opt(year, month, 1)) {
        (Some(next), Some(first)) => (next - first).num_days() as i32,
        _ => 31,
    }
}

impl TimeInterval {
    /// Membership test; every present field must accept `t` (conjunction).
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        let local = match self.location {
            Some(off) => t.with_timezone(&off).naive_local(),
            None => t.naive_utc(),
        };

        if !self.times.is_empty() {
            let minute = local.hour() * 60 + local.minute();
            if !self.times.iter().any(|r| r.start_minute <= minute && minute < r.end_minute) {
                return false;
            }
        }
        if !self.weekdays.is_empty() {
            let wd = local.weekday().num_days_from_sunday() as i32;
            if !self.weekdays.iter().any(|r| r.contains(wd)) {
                return false;
            }
        }
        if !self.days_of_month.is_empty() {
            let dom = local.day() as i32;
            let total = days_in_month(local.year(), local.month());
            // Negative values count back from the end of the month.
            let accepts = self.days_of_month.iter().any(|r| {
                let begin = if r.begin < 0 { total + r.begin + 1 } else { r.begin };
                let end = if r.end < 0 { total + r.end + 1 } else { r.end };
                begin <= dom && dom <= end
            });
            if !accepts {
                return false;
            }
        }
        if !self.months.is_empty() {
            let month = local.month() as i32;
            if !self.months.iter().any(|r| r.contains(month)) {
                return false;
            }
        }
        if !self.years.is_empty() {
            let year = local.year();
            if !self.years.iter().any(|r| r.contains(year)) {
                return false;
            }
        }
        true
    }
}

/// True when `t` falls inside any member of the named interval.
pub fn in_any(intervals: &[TimeInterval], t: DateTime<Utc>) -> bool {
    intervals.iter().any(|ti| ti.contains(t))
}

#[cfg(test)]
#[path = "timeinterval_tests.rs"]
mod tests;
