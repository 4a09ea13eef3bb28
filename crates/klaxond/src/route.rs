// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The route tree: configuration-derived selection of receiver, grouping,
//! and timing for every alert.
//!
//! Immutable after construction.  A config reload builds a whole new tree
//! and swaps the dispatcher over to it.

use std::time::Duration;

use crate::config::{Config, RouteConfig};
use crate::model::{matches_all, LabelSet, Matcher};
use crate::timeinterval::TimeInterval;

/// How a node groups the alerts it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupBy {
    /// One group per alert fingerprint.
    PerAlert,
    /// Group by the values of these labels (absent labels read as "").
    Labels(Vec<String>),
    /// Everything in one group (the `...` sentinel).
    All,
}

/// A resolved route node.
#[derive(Debug, Clone)]
pub struct Route {
    /// Stable tree path, e.g. `"0/2/1"`; namespaces group keys.
    pub id: String,
    pub matchers: Vec<Matcher>,
    pub continue_: bool,
    pub group_by: GroupBy,
    pub group_wait: Duration,
    pub group_interval: Duration,
    pub repeat_interval: Duration,
    pub receiver: String,
    pub mute_time_intervals: Vec<TimeInterval>,
    pub active_time_intervals: Vec<TimeInterval>,
    pub children: Vec<Route>,
}

/// The whole tree.  The root matches every alert.
#[derive(Debug, Clone)]
pub struct RouteTree {
    root: Route,
}

impl RouteTree {
    pub fn build(config: &Config) -> anyhow::Result<RouteTree> {
        // Defaults the root inherits where the document is silent.
        let defaults = Inherited {
            receiver: None,
            group_by: GroupBy::PerAlert,
            group_wait: config.global.group_wait,
            group_interval: config.global.group_interval,
            repeat_interval: config.global.repeat_interval,
        };
        let root = build_node(config, &config.route, "0".to_owned(), &defaults)?;
        Ok(RouteTree { root })
    }

    pub fn root(&self) -> &Route {
        &self.root
    }

    /// All route nodes whose receiver applies to `labels`.
    pub fn matching(&self, labels: &LabelSet) -> Vec<&Route> {
        let mut out = Vec::new();
        collect_matches(&self.root, labels, &mut out);
        out
    }

    /// Pre-order walk over every node.
    pub fn walk(&self, mut f: impl FnMut(&Route)) {
        fn inner(route: &Route, f: &mut impl FnMut(&Route)) {
            f(route);
            for child in &route.children {
                inner(child, f);
            }
        }
        inner(&self.root, &mut f);
    }
}

struct Inherited {
    receiver: Option<String>,
    group_by: GroupBy,
    group_wait: Duration,
    group_interval: Duration,
    repeat_interval: Duration,
}

fn build_node(
    config: &Config,
    node: &RouteConfig,
    id: String,
    inherited: &Inherited,
) -> anyhow::Result<Route> {
    let receiver = node
        .receiver
        .clone()
        .or_else(|| inherited.receiver.clone())
        .ok_or_else(|| anyhow::anyhow!("route {id} has no receiver, inherited or otherwise"))?;

    let group_by = match &node.group_by {
        None => inherited.group_by.clone(),
        Some(labels) if labels.iter().any(|l| l == "...") => GroupBy::All,
        Some(labels) if labels.is_empty() => GroupBy::PerAlert,
        Some(labels) => GroupBy::Labels(labels.clone()),
    };

    let matchers: Vec<Matcher> =
        node.matchers.iter().map(|s| s.parse()).collect::<anyhow::Result<_>>()?;

    let resolve_intervals = |names: &[String]| -> anyhow::Result<Vec<TimeInterval>> {
        let mut out = Vec::new();
        for name in names {
            let members = config
                .time_interval(name)
                .ok_or_else(|| anyhow::anyhow!("route {id} references unknown time interval {name:?}"))?;
            out.extend_from_slice(members);
        }
        Ok(out)
    };

    let next = Inherited {
        receiver: Some(receiver.clone()),
        group_by: group_by.clone(),
        group_wait: node.group_wait.unwrap_or(inherited.group_wait),
        group_interval: node.group_interval.unwrap_or(inherited.group_interval),
        repeat_interval: node.repeat_interval.unwrap_or(inherited.repeat_interval),
    };

    let mute_time_intervals = resolve_intervals(&node.mute_time_intervals)?;
    let active_time_intervals = resolve_intervals(&node.active_time_intervals)?;

    let mut children = Vec::with_capacity(node.routes.len());
    for (i, child) in node.routes.iter().enumerate() {
        children.push(build_node(config, child, format!("{id}/{i}"), &next)?);
    }

    Ok(Route {
        id,
        matchers,
        continue_: node.continue_,
        group_by,
        group_wait: next.group_wait,
        group_interval: next.group_interval,
        repeat_interval: next.repeat_interval,
        receiver,
        mute_time_intervals,
        active_time_intervals,
        children,
    })
}

/// Depth-first match.  A matching child with `continue == false` stops the
/// sibling scan; when no child matches, the node itself applies.
fn collect_matches<'a>(route: &'a Route, labels: &LabelSet, out: &mut Vec<&'a Route>) {
    if !matches_all(&route.matchers, labels) {
        return;
    }
    let before = out.len();
    for child in &route.children {
        let child_before = out.len();
        collect_matches(child, labels, out);
        let child_matched = out.len() > child_before;
        if child_matched && !child.continue_ {
            break;
        }
    }
    if out.len() == before {
        out.push(route);
    }
}

#[cfg(test)]
#[path = "route_tests.rs"]
mod tests;
