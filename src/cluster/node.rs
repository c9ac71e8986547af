//! Typed node records and the oldest-healthy selection rule.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::client::RawNode;

/// Health of a node as derived from its `Ready` condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeHealth {
    /// `Ready` condition is true.
    Healthy,
    /// `Ready` condition is explicitly false.
    Unhealthy,
    /// `Ready` condition absent or unknown.
    Unknown,
}

impl NodeHealth {
    pub fn from_ready(ready: Option<bool>) -> Self {
        match ready {
            Some(true) => NodeHealth::Healthy,
            Some(false) => NodeHealth::Unhealthy,
            None => NodeHealth::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeHealth::Healthy => "Healthy",
            NodeHealth::Unhealthy => "Unhealthy",
            NodeHealth::Unknown => "Unknown",
        }
    }
}

/// Which node address a record is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressPolicy {
    /// Internal cluster address only; nodes without one are skipped.
    #[default]
    Internal,
    /// External address when present, internal as fallback.
    PreferExternal,
}

impl AddressPolicy {
    fn address_of(&self, raw: &RawNode) -> Option<String> {
        match self {
            AddressPolicy::Internal => raw.internal_ip.clone(),
            AddressPolicy::PreferExternal => {
                raw.external_ip.clone().or_else(|| raw.internal_ip.clone())
            }
        }
    }
}

/// A single cluster node snapshot, ready for selection and display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    pub ip: String,
    pub health: NodeHealth,
    pub created_at: DateTime<Utc>,
    pub last_checked: DateTime<Utc>,
}

impl NodeRecord {
    /// Build a record from a raw node under the given address policy.
    /// Returns `None` when the policy yields no usable address; such nodes
    /// are never surfaced to selection.
    pub fn from_raw(raw: &RawNode, policy: AddressPolicy, now: DateTime<Utc>) -> Option<Self> {
        let ip = policy.address_of(raw).filter(|ip| !ip.is_empty())?;
        if raw.name.is_empty() {
            return None;
        }
        Some(Self {
            name: raw.name.clone(),
            ip,
            health: NodeHealth::from_ready(raw.ready),
            created_at: raw.created_at,
            last_checked: now,
        })
    }

    pub fn is_healthy(&self) -> bool {
        self.health == NodeHealth::Healthy
    }

    /// Time since the cluster created this node.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }
}

/// Pick the healthy node with the smallest creation timestamp, ties broken by
/// name ascending, optionally excluding one name (the failing current node).
///
/// The oldest node is the one least likely to disappear imminently: new nodes
/// are churning, old ones survived previous rolls.
pub fn oldest_healthy<'a>(
    nodes: &'a [NodeRecord],
    exclude: Option<&str>,
) -> Option<&'a NodeRecord> {
    nodes
        .iter()
        .filter(|n| n.is_healthy())
        .filter(|n| exclude != Some(n.name.as_str()))
        .min_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.name.cmp(&b.name))
        })
}

/// Format a node age for the status page, coarsest useful unit only.
pub fn format_age(age: Duration) -> String {
    let secs = age.num_seconds().max(0);
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d{}h", secs / 86400, (secs % 86400) / 3600)
    }
}
