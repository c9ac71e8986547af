//! Management HTTP surface.
//!
//! Served on the management port only: an HTML status page at `/`, a JSON
//! health probe at `/health`, and a JSON summary at `/info`. Every other
//! path is a 404 — requests on the management port are never forwarded, so
//! the proxy cannot recurse into itself.
//!
//! All three endpoints answer from cached state; none of them performs a
//! cluster RPC.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use super::homepage::{self, StatusSnapshot};
use crate::cluster::{ClusterDetails, NodeRegistry, NodeSelector};
use crate::config::Platform;
use crate::discovery::ServiceRecord;

/// Shared state for the management router.
#[derive(Clone)]
pub struct ManagementState {
    selector: Arc<NodeSelector>,
    registry: Arc<NodeRegistry>,
    cluster: ClusterDetails,
    namespace: String,
    platform: Platform,
    /// Filled once discovery has run; empty until then.
    services: Arc<RwLock<Vec<ServiceRecord>>>,
    /// Ports the proxy actually listens on; filled after boot.
    proxy_ports: Arc<RwLock<Vec<u16>>>,
}

impl ManagementState {
    pub fn new(
        selector: Arc<NodeSelector>,
        registry: Arc<NodeRegistry>,
        cluster: ClusterDetails,
        namespace: impl Into<String>,
        platform: Platform,
    ) -> Self {
        Self {
            selector,
            registry,
            cluster,
            namespace: namespace.into(),
            platform,
            services: Arc::new(RwLock::new(Vec::new())),
            proxy_ports: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn set_services(&self, services: Vec<ServiceRecord>) {
        *self.services.write().await = services;
    }

    pub async fn set_proxy_ports(&self, ports: Vec<u16>) {
        *self.proxy_ports.write().await = ports;
    }
}

/// The router bound to the management port.
pub fn router(state: ManagementState) -> Router {
    Router::new()
        .route("/", get(status_page))
        .route("/health", get(health))
        .route("/info", get(info))
        .fallback(not_found)
        .with_state(state)
}

async fn status_page(State(state): State<ManagementState>) -> Html<String> {
    let snapshot = StatusSnapshot {
        platform: state.platform,
        cluster: state.cluster.clone(),
        namespace: state.namespace.clone(),
        current: state.selector.current_view(),
        nodes: state.registry.cached().await,
        services: state.services.read().await.clone(),
    };
    Html(homepage::render(&snapshot))
}

/// Liveness of the proxy itself. Reads only the selection slot, so it
/// answers immediately even when the cluster API is unresponsive.
async fn health(State(state): State<ManagementState>) -> Json<Value> {
    Json(json!({
        "proxy_server": "healthy",
        "current_node_name": state.selector.current_name(),
    }))
}

async fn info(State(state): State<ManagementState>) -> Json<Value> {
    let current = state.selector.current_view();
    let nodes = state.registry.cached().await;
    let services = state.services.read().await;
    let ports = state.proxy_ports.read().await;

    Json(json!({
        "cluster": {
            "name": state.cluster.name,
            "location": state.cluster.location,
            "endpoint": state.cluster.endpoint,
        },
        "platform": state.platform.to_string(),
        "namespace": state.namespace,
        "current_node": {
            "name": current.name,
            "ip": current.ip,
            "status": current.status(),
        },
        "node_count": nodes.len(),
        "service_count": services.len(),
        "proxy_ports": *ports,
    }))
}

async fn not_found() -> (StatusCode, &'static str) {
    (
        StatusCode::NOT_FOUND,
        "not found: the management port serves only /, /health, and /info\n",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::testutil::{raw_node, MockCluster};
    use crate::cluster::{AddressPolicy, ClusterClient};

    fn state_over(cluster: Arc<MockCluster>) -> ManagementState {
        let info = cluster.cluster_info();
        let registry = Arc::new(NodeRegistry::new(cluster, AddressPolicy::Internal));
        let selector = Arc::new(NodeSelector::new(registry.clone()));
        ManagementState::new(selector, registry, info, "apps", Platform::Generic)
    }

    #[tokio::test]
    async fn test_health_reports_cached_selection() {
        let cluster = Arc::new(MockCluster::new(vec![raw_node(
            "a", "10.0.1.1", 24,
            Some(true),
        )]));
        let state = state_over(cluster);

        // Unselected: empty name, still healthy.
        let Json(body) = health(State(state.clone())).await;
        assert_eq!(body["proxy_server"], "healthy");
        assert_eq!(body["current_node_name"], "");

        state.selector.current_ip().await.unwrap();
        let Json(body) = health(State(state)).await;
        assert_eq!(body["current_node_name"], "a");
    }

    #[tokio::test]
    async fn test_info_counts() {
        let cluster = Arc::new(MockCluster::new(vec![
            raw_node("a", "10.0.1.1", 24, Some(true)),
            raw_node("b", "10.0.1.2", 12, Some(true)),
        ]));
        let state = state_over(cluster);
        state.selector.current_ip().await.unwrap();
        state
            .set_services(vec![ServiceRecord {
                name: "web".to_string(),
                namespace: "apps".to_string(),
                node_port: 30001,
                target_port: 8080,
                protocol: "TCP".to_string(),
            }])
            .await;
        state.set_proxy_ports(vec![30001]).await;

        let Json(body) = info(State(state)).await;
        assert_eq!(body["node_count"], 2);
        assert_eq!(body["service_count"], 1);
        assert_eq!(body["proxy_ports"][0], 30001);
        assert_eq!(body["current_node"]["name"], "a");
        assert_eq!(body["current_node"]["status"], "Healthy");
    }
}
