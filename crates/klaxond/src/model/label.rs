// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Label sets and their fingerprints.
//!
//! A label set is an ordered name→value mapping; its fingerprint is a stable
//! 64-bit hash over the sorted pairs and is the identity of an alert.  Two
//! alerts with identical labels are the same alert, regardless of insertion
//! order or re-serialisation.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::Xxh3;

/// Stable identity of a label set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub u64);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl Fingerprint {
    /// Parse the hex form produced by `Display`.
    pub fn parse(s: &str) -> Option<Self> {
        u64::from_str_radix(s, 16).ok().map(Fingerprint)
    }
}

/// An ordered mapping from label name to label value.
///
/// Backed by a `BTreeMap` so iteration (and therefore fingerprinting and
/// group-key construction) is canonical.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet(BTreeMap<String, String>);

/// Byte that cannot occur in UTF-8 label text, used to delimit hashed pairs.
const SEP: u8 = 0xff;

impl LabelSet {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Build from name/value pairs; later duplicates overwrite earlier ones.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every name is non-empty.  Emptiness of the whole set is
    /// checked separately at ingest.
    pub fn names_valid(&self) -> bool {
        self.0.keys().all(|k| !k.is_empty())
    }

    /// Deterministic hash over the sorted name/value pairs.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut h = Xxh3::new();
        for (name, value) in &self.0 {
            h.update(name.as_bytes());
            h.update(&[SEP]);
            h.update(value.as_bytes());
            h.update(&[SEP]);
        }
        Fingerprint(h.digest())
    }

    /// Project onto `names`, mapping absent labels to the empty string so
    /// that projection is deterministic for every alert.
    pub fn project(&self, names: &[String]) -> LabelSet {
        let mut out = LabelSet::new();
        for name in names {
            out.insert(name.clone(), self.get(name).unwrap_or_default());
        }
        out
    }

    /// Values of `names` in order, absent labels as empty strings.
    pub fn values_of(&self, names: &[String]) -> Vec<String> {
        names.iter().map(|n| self.get(n).unwrap_or_default().to_owned()).collect()
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value:?}")?;
        }
        write!(f, "}}")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LabelSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

impl IntoIterator for LabelSet {
    type Item = (String, String);
    type IntoIter = std::collections::btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
#[path = "label_tests.rs"]
mod tests;
