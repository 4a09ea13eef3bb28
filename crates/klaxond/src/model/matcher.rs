// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Label matchers shared by silences, routes, and inhibit rules.
//!
//! A matcher tests one label against a value with `=`, `!=`, `=~`, or `!~`.
//! Regex matchers are anchored to the full value.  A label absent from the
//! set matches as the empty string, so `foo=""` and `foo=~".*"` accept alerts
//! without a `foo` label.

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::label::LabelSet;

/// Matcher operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatchOp {
    Equal,
    NotEqual,
    Regex,
    NotRegex,
}

impl MatchOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::Regex => "=~",
            Self::NotRegex => "!~",
        }
    }

    fn is_regex(&self) -> bool {
        matches!(self, Self::Regex | Self::NotRegex)
    }

    fn is_equal(&self) -> bool {
        matches!(self, Self::Equal | Self::Regex)
    }

    fn from_flags(is_regex: bool, is_equal: bool) -> Self {
        match (is_regex, is_equal) {
            (false, true) => Self::Equal,
            (false, false) => Self::NotEqual,
            (true, true) => Self::Regex,
            (true, false) => Self::NotRegex,
        }
    }
}

/// A single label matcher.
#[derive(Debug, Clone)]
pub struct Matcher {
    name: String,
    op: MatchOp,
    value: String,
    /// Compiled full-string pattern; present iff `op` is a regex op.
    re: Option<Regex>,
}

impl Matcher {
    pub fn new(
        name: impl Into<String>,
        op: MatchOp,
        value: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let name = name.into();
        let value = value.into();
        if name.is_empty() {
            anyhow::bail!("matcher name must not be empty");
        }
        let re = if op.is_regex() {
            Some(Regex::new(&format!("^(?:{value})$"))?)
        } else {
            None
        };
        Ok(Self { name, op, value, re })
    }

    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        let (name, value) = (name.into(), value.into());
        Self { name, op: MatchOp::Equal, value, re: None }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn op(&self) -> MatchOp {
        self.op
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Test against a label set; absent labels read as the empty string.
    pub fn matches(&self, labels: &LabelSet) -> bool {
        let v = labels.get(&self.name).unwrap_or_default();
        match (self.op, &self.re) {
            (MatchOp::Equal, _) => v == self.value,
            (MatchOp::NotEqual, _) => v != self.value,
            (MatchOp::Regex, Some(re)) => re.is_match(v),
            (MatchOp::NotRegex, Some(re)) => !re.is_match(v),
            // Regex ops always carry a compiled pattern; treat a missing one
            // as non-matching rather than guessing.
            (MatchOp::Regex, None) => false,
            (MatchOp::NotRegex, None) => true,
        }
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.op == other.op && self.value == other.value
    }
}

impl Eq for Matcher {}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.op.as_str(), self.value)
    }
}

/// Parse the string form used in routing configuration: `name=value`,
/// `name!=value`, `name=~value`, `name!~value`.  The value may be quoted.
impl FromStr for Matcher {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let idx = s
            .find(['=', '!'])
            .ok_or_else(|| anyhow::anyhow!("matcher {s:?} has no operator"))?;
        let name = s[..idx].trim();
        let rest = &s[idx..];
        let (op, value) = if let Some(v) = rest.strip_prefix("=~") {
            (MatchOp::Regex, v)
        } else if let Some(v) = rest.strip_prefix("!~") {
            (MatchOp::NotRegex, v)
        } else if let Some(v) = rest.strip_prefix("!=") {
            (MatchOp::NotEqual, v)
        } else if let Some(v) = rest.strip_prefix('=') {
            (MatchOp::Equal, v)
        } else {
            anyhow::bail!("matcher {s:?} has no operator");
        };
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        Matcher::new(name, op, value)
    }
}

// Wire form shared by the silence API and the replicated silence records.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatcherRepr {
    name: String,
    value: String,
    is_regex: bool,
    is_equal: bool,
}

impl Serialize for Matcher {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        MatcherRepr {
            name: self.name.clone(),
            value: self.value.clone(),
            is_regex: self.op.is_regex(),
            is_equal: self.op.is_equal(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Matcher {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = MatcherRepr::deserialize(deserializer)?;
        Matcher::new(repr.name, MatchOp::from_flags(repr.is_regex, repr.is_equal), repr.value)
            .map_err(serde::de::Error::custom)
    }
}

/// True when every matcher accepts `labels`; evaluation short-circuits.
pub fn matches_all(matchers: &[Matcher], labels: &LabelSet) -> bool {
    matchers.iter().all(|m| m.matches(labels))
}

#[cfg(test)]
#[path = "matcher_tests.rs"]
mod tests;
