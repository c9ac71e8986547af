//! Cluster-facing state: node knowledge and the current-node selection.
//!
//! Three layers, leaves first:
//!
//! - [`client`] — the [`ClusterClient`] trait the rest of the crate consumes.
//!   Concrete adapters live in `crate::adapters`.
//! - [`registry`] — converts raw node records into a typed, sorted,
//!   health-annotated cache with a TTL.
//! - [`selector`] — keeps exactly one node "current", probes it periodically,
//!   and fails over to the oldest healthy alternative after repeated failures.
//!
//! The timeouts below are the authoritative values for the whole crate.

pub mod client;
pub mod node;
pub mod registry;
pub mod selector;

pub use client::{ClientError, ClusterClient, ClusterDetails, RawNode, RawService, RawServicePort};
pub use node::{format_age, oldest_healthy, AddressPolicy, NodeHealth, NodeRecord};
pub use registry::{NodeRegistry, NodeSnapshot};
pub use selector::{NodeSelector, SelectionView, SelectorError};

use std::time::Duration;

/// How long a fetched node list stays valid before the registry refetches.
pub const NODE_CACHE_TTL: Duration = Duration::from_secs(120);

/// How long a probed IP is served from the selection slot without reselecting.
pub const IP_CACHE_VALIDITY: Duration = Duration::from_secs(30);

/// Period of the health monitor loop.
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(15);

/// Deadline for a single node probe inside the monitor, and for on-demand
/// selection triggered by `current_ip`.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for the candidate fetch during failover.
pub const FAILOVER_TIMEOUT: Duration = Duration::from_secs(30);

/// Consecutive failed probes before failover is attempted.
pub const FAILURE_THRESHOLD: u32 = 3;
