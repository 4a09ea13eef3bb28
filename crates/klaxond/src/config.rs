// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server flags and the routing configuration document.
//!
//! Flags cover the process: listen address, data directory, timings of the
//! background loops.  The routing document (JSON, `--config-file`) carries
//! everything policy: the route tree, receivers, inhibit rules, and named
//! time intervals.  The loader validates; consumers re-assert the invariants
//! they depend on.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::inhibit::InhibitRule;
use crate::model::Matcher;
use crate::timeinterval::TimeInterval;

/// Command-line configuration for the klaxond process.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "klaxond", about = "Alert-handling server", version)]
pub struct ServerConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "KLAXON_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9093, env = "KLAXON_PORT")]
    pub port: u16,

    /// Path to the routing configuration JSON file.
    #[arg(long, env = "KLAXON_CONFIG_FILE")]
    pub config_file: PathBuf,

    /// Directory for replicated-state snapshots.
    #[arg(long, default_value = "data", env = "KLAXON_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Bearer token for API auth.  If unset, auth is disabled.
    #[arg(long, env = "KLAXON_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// How long an alert without an end time keeps firing after its last
    /// re-put, in milliseconds.
    #[arg(long, default_value_t = 300_000, env = "KLAXON_RESOLVE_TIMEOUT_MS")]
    pub resolve_timeout_ms: u64,

    /// Retention for resolved alerts and replicated records, in milliseconds.
    #[arg(long, default_value_t = 432_000_000, env = "KLAXON_RETENTION_MS")]
    pub retention_ms: u64,

    /// Alert store GC interval in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "KLAXON_GC_INTERVAL_MS")]
    pub gc_interval_ms: u64,

    /// Snapshot/eviction maintenance interval in milliseconds.
    #[arg(long, default_value_t = 900_000, env = "KLAXON_MAINTENANCE_INTERVAL_MS")]
    pub maintenance_interval_ms: u64,

    /// Per-position cluster stagger in milliseconds.
    #[arg(long, default_value_t = 15_000, env = "KLAXON_PEER_TIMEOUT_MS")]
    pub peer_timeout_ms: u64,

    /// How long the first pipeline run may wait for cluster settle, in
    /// milliseconds.
    #[arg(long, default_value_t = 30_000, env = "KLAXON_SETTLE_TIMEOUT_MS")]
    pub settle_timeout_ms: u64,

    /// Emit logs as JSON.
    #[arg(long, env = "KLAXON_LOG_JSON")]
    pub log_json: bool,
}

impl ServerConfig {
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }
}

// -- Routing document ---------------------------------------------------------

fn default_group_wait() -> Duration {
    Duration::from_secs(30)
}

fn default_group_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_repeat_interval() -> Duration {
    Duration::from_secs(4 * 3600)
}

fn default_true() -> bool {
    true
}

/// Timing defaults applied where the route tree leaves them unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(with = "humantime_serde", default = "default_group_wait")]
    pub group_wait: Duration,
    #[serde(with = "humantime_serde", default = "default_group_interval")]
    pub group_interval: Duration,
    #[serde(with = "humantime_serde", default = "default_repeat_interval")]
    pub repeat_interval: Duration,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            group_wait: default_group_wait(),
            group_interval: default_group_interval(),
            repeat_interval: default_repeat_interval(),
        }
    }
}

/// One node of the configured route tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Receiver for alerts that stop at this node; inherited from the parent
    /// when unset.  The root must name one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
    /// Matchers in string form (`name=value`, `name!=v`, `name=~re`, `name!~re`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matchers: Vec<String>,
    /// Unset inherits the parent; `[]` groups per alert; `["..."]` coalesces
    /// everything into one group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<Vec<String>>,
    #[serde(default, with = "humantime_serde::option", skip_serializing_if = "Option::is_none")]
    pub group_wait: Option<Duration>,
    #[serde(default, with = "humantime_serde::option", skip_serializing_if = "Option::is_none")]
    pub group_interval: Option<Duration>,
    #[serde(default, with = "humantime_serde::option", skip_serializing_if = "Option::is_none")]
    pub repeat_interval: Option<Duration>,
    /// Keep evaluating sibling routes after this one matches.
    #[serde(default, rename = "continue")]
    pub continue_: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mute_time_intervals: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub active_time_intervals: Vec<String>,
}

/// A named bundle of integrations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub webhook_configs: Vec<WebhookConfig>,
}

/// One webhook integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    #[serde(default = "default_true")]
    pub send_resolved: bool,
    /// Truncate the payload to this many alerts; 0 means no limit.
    #[serde(default)]
    pub max_alerts: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InhibitRuleConfig {
    pub source_matchers: Vec<String>,
    pub target_matchers: Vec<String>,
    #[serde(default)]
    pub equal: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedTimeInterval {
    pub name: String,
    pub time_intervals: Vec<TimeInterval>,
}

/// The parsed routing document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    pub route: RouteConfig,
    pub receivers: Vec<ReceiverConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inhibit_rules: Vec<InhibitRuleConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub time_intervals: Vec<NamedTimeInterval>,
}

fn parse_matchers(exprs: &[String]) -> anyhow::Result<Vec<Matcher>> {
    exprs.iter().map(|s| s.parse()).collect()
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Config> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
        let config: Config = serde_json::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Structural validation: receivers resolve, matchers parse, interval
    /// names exist.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.route.receiver.is_none() {
            anyhow::bail!("root route must name a receiver");
        }
        if !self.route.matchers.is_empty() {
            anyhow::bail!("root route must match everything; move matchers to a child route");
        }
        if self.route.continue_ {
            anyhow::bail!("root route cannot set continue");
        }
        let mut receiver_names = HashSet::new();
        for receiver in &self.receivers {
            if receiver.name.is_empty() {
                anyhow::bail!("receiver with empty name");
            }
            if !receiver_names.insert(receiver.name.as_str()) {
                anyhow::bail!("duplicate receiver {:?}", receiver.name);
            }
        }
        let interval_names: HashSet<&str> =
            self.time_intervals.iter().map(|ti| ti.name.as_str()).collect();
        if interval_names.len() != self.time_intervals.len() {
            anyhow::bail!("duplicate time interval name");
        }
        self.validate_route(&self.route, &receiver_names, &interval_names)?;
        for rule in &self.inhibit_rules {
            if rule.source_matchers.is_empty() || rule.target_matchers.is_empty() {
                anyhow::bail!("inhibit rule needs both source and target matchers");
            }
            parse_matchers(&rule.source_matchers)?;
            parse_matchers(&rule.target_matchers)?;
        }
        Ok(())
    }

    fn validate_route(
        &self,
        route: &RouteConfig,
        receivers: &HashSet<&str>,
        intervals: &HashSet<&str>,
    ) -> anyhow::Result<()> {
        if let Some(ref name) = route.receiver {
            if !receivers.contains(name.as_str()) {
                anyhow::bail!("route references unknown receiver {name:?}");
            }
        }
        parse_matchers(&route.matchers)?;
        if let Some(ref group_by) = route.group_by {
            let all = group_by.iter().any(|g| g == "...");
            if all && group_by.len() != 1 {
                anyhow::bail!("group_by cannot mix \"...\" with label names");
            }
        }
        for name in route.mute_time_intervals.iter().chain(&route.active_time_intervals) {
            if !intervals.contains(name.as_str()) {
                anyhow::bail!("route references unknown time interval {name:?}");
            }
        }
        for child in &route.routes {
            self.validate_route(child, receivers, intervals)?;
        }
        Ok(())
    }

    pub fn receiver(&self, name: &str) -> Option<&ReceiverConfig> {
        self.receivers.iter().find(|r| r.name == name)
    }

    pub fn time_interval(&self, name: &str) -> Option<&[TimeInterval]> {
        self.time_intervals
            .iter()
            .find(|ti| ti.name == name)
            .map(|ti| ti.time_intervals.as_slice())
    }

    /// Inhibit rules in runtime form.  `validate` has already checked the
    /// matcher syntax; failures here mean the document changed underneath us.
    pub fn build_inhibit_rules(&self) -> anyhow::Result<Vec<InhibitRule>> {
        self.inhibit_rules
            .iter()
            .map(|rule| {
                Ok(InhibitRule {
                    source_matchers: parse_matchers(&rule.source_matchers)?,
                    target_matchers: parse_matchers(&rule.target_matchers)?,
                    equal: rule.equal.clone(),
                })
            })
            .collect()
    }

    /// Stable digest of the document, reported by the status API.
    pub fn digest(&self) -> String {
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        format!("{:016x}", xxhash_rust::xxh3::xxh3_64(&encoded))
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
