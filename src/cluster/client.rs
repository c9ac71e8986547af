//! Cluster client contract
//!
//! Everything the core needs from a Kubernetes cluster, reduced to four
//! operations. Concrete adapters (kubeconfig/in-cluster, cloud-specific
//! skins) implement this trait; the registry, selector, and discovery layers
//! only ever see it. Credentials and token refresh are the adapter's problem.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by a cluster adapter.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("node '{0}' not found")]
    NodeNotFound(String),

    #[error("cluster API request failed: {0}")]
    Api(String),
}

/// A cluster node as the adapter reports it, before any policy is applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawNode {
    /// Node name, unique within the cluster.
    pub name: String,

    /// Internal (cluster network) address, if the node has one.
    pub internal_ip: Option<String>,

    /// External address, if the node has one.
    pub external_ip: Option<String>,

    /// The node's `Ready` condition: `Some(true)` ready, `Some(false)`
    /// explicitly not ready, `None` when the condition is absent or unknown.
    pub ready: Option<bool>,

    /// Creation timestamp assigned by the cluster.
    pub created_at: DateTime<Utc>,
}

/// One port of a service as the adapter reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawServicePort {
    /// NodePort number; 0 when the port has none allocated.
    pub node_port: i32,

    /// Backend target port, display only.
    pub target_port: i32,

    /// Protocol name ("TCP", "UDP"), display only.
    pub protocol: String,
}

/// A service as the adapter reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawService {
    pub name: String,
    pub namespace: String,

    /// Service type ("NodePort", "ClusterIP", ...).
    pub service_type: String,

    pub ports: Vec<RawServicePort>,
}

/// Identity of the cluster, display only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterDetails {
    pub name: String,
    pub location: String,
    pub endpoint: String,
}

/// List/get primitives over cluster nodes and services.
///
/// Shared read-only across the registry, selector, and discovery. Calls must
/// honor the caller's cancellation: dropping the returned future must abort
/// the underlying request.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// All nodes in the cluster.
    async fn list_nodes(&self) -> Result<Vec<RawNode>, ClientError>;

    /// One node by name.
    async fn get_node(&self, name: &str) -> Result<RawNode, ClientError>;

    /// All services in `namespace`.
    async fn list_services(&self, namespace: &str) -> Result<Vec<RawService>, ClientError>;

    /// Cluster identity for the management surface.
    fn cluster_info(&self) -> ClusterDetails;
}
