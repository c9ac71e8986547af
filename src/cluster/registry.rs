//! Node registry: a TTL cache of typed node records.
//!
//! The registry owns the `NodeRecord` list. It rebuilds the list from the
//! cluster client at most once per TTL, sorts it ascending by creation time,
//! and serves the last good list (flagged stale) when the cluster API fails.
//! The selector writes probe outcomes back through [`NodeRegistry::mark_checked`]
//! so the status page reflects what the monitor actually observed.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::client::{ClientError, ClusterClient, RawNode};
use super::node::{AddressPolicy, NodeHealth, NodeRecord};
use super::NODE_CACHE_TTL;

/// A view of the node list together with its freshness.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub nodes: Vec<NodeRecord>,
    /// True when the cluster API failed and this is the last good list.
    pub stale: bool,
}

#[derive(Default)]
struct Cache {
    nodes: Vec<NodeRecord>,
    fetched_at: Option<Instant>,
}

impl Cache {
    fn fresh_within(&self, ttl: std::time::Duration) -> bool {
        self.fetched_at
            .map(|at| at.elapsed() < ttl)
            .unwrap_or(false)
    }
}

/// TTL-cached, health-annotated node list.
pub struct NodeRegistry {
    client: Arc<dyn ClusterClient>,
    policy: AddressPolicy,
    ttl: std::time::Duration,
    cache: RwLock<Cache>,
}

impl NodeRegistry {
    pub fn new(client: Arc<dyn ClusterClient>, policy: AddressPolicy) -> Self {
        Self {
            client,
            policy,
            ttl: NODE_CACHE_TTL,
            cache: RwLock::new(Cache::default()),
        }
    }

    #[cfg(test)]
    pub fn with_ttl(mut self, ttl: std::time::Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// The node list, refetched when the cache is older than the TTL.
    pub async fn list(&self) -> Result<NodeSnapshot, ClientError> {
        self.list_no_older_than(None).await
    }

    /// Like [`list`](Self::list), but additionally treats the cache as
    /// expired when it was fetched before `cutoff`. Failover uses this to
    /// avoid selecting from a list that predates the first observed failure.
    /// No stale fallback is served on this path: a list from before the
    /// cutoff is exactly what the caller is trying to avoid.
    pub async fn list_no_older_than(
        &self,
        cutoff: Option<Instant>,
    ) -> Result<NodeSnapshot, ClientError> {
        {
            let cache = self.cache.read().await;
            if cache.fresh_within(self.ttl) && Self::after_cutoff(&cache, cutoff) {
                return Ok(NodeSnapshot {
                    nodes: cache.nodes.clone(),
                    stale: false,
                });
            }
        }

        let mut cache = self.cache.write().await;
        // Another task may have refreshed while this one waited for the lock.
        if cache.fresh_within(self.ttl) && Self::after_cutoff(&cache, cutoff) {
            return Ok(NodeSnapshot {
                nodes: cache.nodes.clone(),
                stale: false,
            });
        }

        match self.client.list_nodes().await {
            Ok(raw) => {
                cache.nodes = Self::build(&raw, self.policy);
                cache.fetched_at = Some(Instant::now());
                debug!(count = cache.nodes.len(), "refreshed node list");
                Ok(NodeSnapshot {
                    nodes: cache.nodes.clone(),
                    stale: false,
                })
            }
            Err(err) if cutoff.is_none() && !cache.nodes.is_empty() => {
                warn!(error = %err, "node list refresh failed, serving stale list");
                Ok(NodeSnapshot {
                    nodes: cache.nodes.clone(),
                    stale: true,
                })
            }
            Err(err) => Err(err),
        }
    }

    /// One-shot lookup of a single node, no cache involved.
    pub async fn get(&self, name: &str) -> Result<RawNode, ClientError> {
        self.client.get_node(name).await
    }

    /// The cached list without any RPC, for display surfaces that must never
    /// block on the cluster API.
    pub async fn cached(&self) -> Vec<NodeRecord> {
        self.cache.read().await.nodes.clone()
    }

    /// Record a probe outcome against the cached entry for `name`.
    pub async fn mark_checked(&self, name: &str, healthy: bool, checked_at: DateTime<Utc>) {
        let mut cache = self.cache.write().await;
        for record in cache.nodes.iter_mut() {
            if record.name == name {
                record.last_checked = checked_at;
                record.health = if healthy {
                    NodeHealth::Healthy
                } else {
                    NodeHealth::Unhealthy
                };
                break;
            }
        }
    }

    fn after_cutoff(cache: &Cache, cutoff: Option<Instant>) -> bool {
        match (cutoff, cache.fetched_at) {
            (Some(cutoff), Some(fetched_at)) => fetched_at >= cutoff,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }

    fn build(raw: &[RawNode], policy: AddressPolicy) -> Vec<NodeRecord> {
        let now = Utc::now();
        let mut nodes: Vec<NodeRecord> = raw
            .iter()
            .filter_map(|r| NodeRecord::from_raw(r, policy, now))
            .collect();
        nodes.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        nodes
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cluster::testutil::{raw_node, MockCluster};

    fn registry(cluster: Arc<MockCluster>) -> NodeRegistry {
        NodeRegistry::new(cluster, AddressPolicy::Internal)
    }

    #[tokio::test]
    async fn test_list_sorted_oldest_first() {
        let cluster = Arc::new(MockCluster::new(vec![
            raw_node("young", "10.0.1.3", 1, Some(true)),
            raw_node("old", "10.0.1.1", 24, Some(true)),
            raw_node("mid", "10.0.1.2", 12, Some(true)),
        ]));

        let snapshot = registry(cluster).list().await.unwrap();
        let names: Vec<_> = snapshot.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["old", "mid", "young"]);
        assert!(!snapshot.stale);
    }

    #[tokio::test]
    async fn test_list_skips_nodes_without_address() {
        let mut bare = raw_node("bare", "", 2, Some(true));
        bare.internal_ip = None;
        let cluster = Arc::new(MockCluster::new(vec![
            bare,
            raw_node("ok", "10.0.1.1", 1, Some(true)),
        ]));

        let snapshot = registry(cluster).list().await.unwrap();
        assert_eq!(snapshot.nodes.len(), 1);
        assert_eq!(snapshot.nodes[0].name, "ok");
    }

    #[tokio::test]
    async fn test_list_served_from_cache_within_ttl() {
        let cluster = Arc::new(MockCluster::new(vec![raw_node(
            "a", "10.0.1.1", 1,
            Some(true),
        )]));
        let registry = registry(cluster.clone());

        registry.list().await.unwrap();
        registry.list().await.unwrap();
        registry.list().await.unwrap();

        assert_eq!(cluster.list_count(), 1);
    }

    #[tokio::test]
    async fn test_expired_ttl_refetches() {
        let cluster = Arc::new(MockCluster::new(vec![raw_node(
            "a", "10.0.1.1", 1,
            Some(true),
        )]));
        let registry =
            NodeRegistry::new(cluster.clone(), AddressPolicy::Internal).with_ttl(Duration::ZERO);

        registry.list().await.unwrap();
        registry.list().await.unwrap();

        assert_eq!(cluster.list_count(), 2);
    }

    #[tokio::test]
    async fn test_stale_list_served_on_api_failure() {
        let cluster = Arc::new(MockCluster::new(vec![raw_node(
            "a", "10.0.1.1", 1,
            Some(true),
        )]));
        let registry =
            NodeRegistry::new(cluster.clone(), AddressPolicy::Internal).with_ttl(Duration::ZERO);

        registry.list().await.unwrap();
        cluster.set_fail_lists(true);

        let snapshot = registry.list().await.unwrap();
        assert!(snapshot.stale);
        assert_eq!(snapshot.nodes[0].name, "a");
    }

    #[tokio::test]
    async fn test_api_failure_with_empty_cache_is_an_error() {
        let cluster = Arc::new(MockCluster::new(vec![]));
        cluster.set_fail_lists(true);

        let result = registry(cluster).list().await;
        assert!(matches!(result, Err(ClientError::Api(_))));
    }

    #[tokio::test]
    async fn test_cutoff_forces_refetch_and_no_stale_fallback() {
        let cluster = Arc::new(MockCluster::new(vec![raw_node(
            "a", "10.0.1.1", 1,
            Some(true),
        )]));
        let registry = registry(cluster.clone());

        registry.list().await.unwrap();
        assert_eq!(cluster.list_count(), 1);

        // Cache is fresh by TTL but predates the cutoff: must refetch.
        let cutoff = Instant::now();
        registry.list_no_older_than(Some(cutoff)).await.unwrap();
        assert_eq!(cluster.list_count(), 2);

        // On this path an API failure is an error, never a stale list.
        cluster.set_fail_lists(true);
        let result = registry.list_no_older_than(Some(Instant::now())).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_mark_checked_updates_cached_record() {
        let cluster = Arc::new(MockCluster::new(vec![raw_node(
            "a", "10.0.1.1", 1,
            Some(true),
        )]));
        let registry = registry(cluster);
        registry.list().await.unwrap();

        let checked_at = Utc::now();
        registry.mark_checked("a", false, checked_at).await;

        let cached = registry.cached().await;
        assert_eq!(cached[0].health, NodeHealth::Unhealthy);
        assert_eq!(cached[0].last_checked, checked_at);
    }
}
