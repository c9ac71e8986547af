//! NodePort service discovery.
//!
//! One-shot enumeration of NodePort services in the configured namespace at
//! startup. The port set is not refreshed at runtime: ports added or removed
//! after boot require a restart.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::cluster::{ClientError, ClusterClient};

#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// Refusing to enumerate without a namespace: an empty selector would
    /// claim ports for every NodePort service in the cluster.
    #[error("namespace must not be empty")]
    EmptyNamespace,

    #[error(transparent)]
    Cluster(#[from] ClientError),
}

/// One NodePort service entry, for port binding and display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    pub namespace: String,
    pub node_port: u16,
    pub target_port: i32,
    pub protocol: String,
}

/// Enumerates NodePort services in a single namespace.
pub struct ServiceDiscovery {
    client: Arc<dyn ClusterClient>,
    namespace: String,
}

impl ServiceDiscovery {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        namespace: impl Into<String>,
    ) -> Result<Self, DiscoveryError> {
        let namespace = namespace.into();
        if namespace.trim().is_empty() {
            return Err(DiscoveryError::EmptyNamespace);
        }
        Ok(Self { client, namespace })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// All NodePort service entries in the namespace. Services of other
    /// types, and ports with no allocated NodePort, are skipped.
    pub async fn discover_services(&self) -> Result<Vec<ServiceRecord>, DiscoveryError> {
        let services = self.client.list_services(&self.namespace).await?;

        let mut records = Vec::new();
        for service in &services {
            if service.service_type != "NodePort" {
                debug!(
                    service = %service.name,
                    kind = %service.service_type,
                    "skipping non-NodePort service"
                );
                continue;
            }
            for port in &service.ports {
                let Ok(node_port) = u16::try_from(port.node_port) else {
                    continue;
                };
                if node_port == 0 {
                    continue;
                }
                info!(
                    service = %service.name,
                    namespace = %service.namespace,
                    node_port,
                    target_port = port.target_port,
                    "found NodePort service"
                );
                records.push(ServiceRecord {
                    name: service.name.clone(),
                    namespace: service.namespace.clone(),
                    node_port,
                    target_port: port.target_port,
                    protocol: port.protocol.clone(),
                });
            }
        }

        info!(
            namespace = %self.namespace,
            count = records.len(),
            "NodePort discovery completed"
        );
        Ok(records)
    }

    /// The port numbers to listen on, de-duplicated, preserving the order
    /// the cluster returned them in.
    pub async fn discover_ports(&self) -> Result<Vec<u16>, DiscoveryError> {
        let services = self.discover_services().await?;

        let mut seen = HashSet::new();
        let mut ports = Vec::new();
        for record in services {
            if seen.insert(record.node_port) {
                ports.push(record.node_port);
            }
        }
        Ok(ports)
    }
}
