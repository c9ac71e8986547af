//! Kubernetes API adapter.
//!
//! Connects with inferred configuration: the in-cluster service account when
//! running inside a pod, the local kubeconfig otherwise. Covers the
//! `generic` and `in-cluster` platform tags.

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::{Node, Service};
use kube::api::ListParams;
use kube::{Api, Client, Config};

use crate::cluster::client::{
    ClientError, ClusterClient, ClusterDetails, RawNode, RawService, RawServicePort,
};

pub struct KubeClusterClient {
    client: Client,
    details: ClusterDetails,
}

impl KubeClusterClient {
    /// Connect using inferred configuration.
    pub async fn new() -> Result<Self, ClientError> {
        let config = Config::infer()
            .await
            .map_err(|err| ClientError::Api(err.to_string()))?;
        let endpoint = config.cluster_url.to_string();
        let client =
            Client::try_from(config).map_err(|err| ClientError::Api(err.to_string()))?;

        Ok(Self {
            client,
            details: ClusterDetails {
                name: String::new(),
                location: String::new(),
                endpoint,
            },
        })
    }

    /// Label the cluster for the management surface.
    pub fn with_identity(mut self, name: impl Into<String>, location: impl Into<String>) -> Self {
        self.details.name = name.into();
        self.details.location = location.into();
        self
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn list_nodes(&self) -> Result<Vec<RawNode>, ClientError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api
            .list(&ListParams::default())
            .await
            .map_err(|err| ClientError::Api(err.to_string()))?;
        Ok(nodes.items.iter().map(map_node).collect())
    }

    async fn get_node(&self, name: &str) -> Result<RawNode, ClientError> {
        let api: Api<Node> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(node) => Ok(map_node(&node)),
            Err(kube::Error::Api(response)) if response.code == 404 => {
                Err(ClientError::NodeNotFound(name.to_string()))
            }
            Err(err) => Err(ClientError::Api(err.to_string())),
        }
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<RawService>, ClientError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let services = api
            .list(&ListParams::default())
            .await
            .map_err(|err| ClientError::Api(err.to_string()))?;
        Ok(services.items.iter().map(map_service).collect())
    }

    fn cluster_info(&self) -> ClusterDetails {
        self.details.clone()
    }
}

fn map_node(node: &Node) -> RawNode {
    let status = node.status.as_ref();

    let mut internal_ip = None;
    let mut external_ip = None;
    if let Some(addresses) = status.and_then(|s| s.addresses.as_ref()) {
        for address in addresses {
            match address.type_.as_str() {
                "InternalIP" if internal_ip.is_none() => {
                    internal_ip = Some(address.address.clone());
                }
                "ExternalIP" if external_ip.is_none() => {
                    external_ip = Some(address.address.clone());
                }
                _ => {}
            }
        }
    }

    let ready = status
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
        .and_then(|condition| match condition.status.as_str() {
            "True" => Some(true),
            "False" => Some(false),
            _ => None,
        });

    RawNode {
        name: node.metadata.name.clone().unwrap_or_default(),
        internal_ip,
        external_ip,
        ready,
        created_at: node
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|time| time.0)
            .unwrap_or_else(Utc::now),
    }
}

fn map_service(service: &Service) -> RawService {
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

    let spec = service.spec.as_ref();
    let ports = spec
        .and_then(|s| s.ports.as_ref())
        .map(|ports| {
            ports
                .iter()
                .map(|port| RawServicePort {
                    node_port: port.node_port.unwrap_or(0),
                    target_port: match port.target_port {
                        Some(IntOrString::Int(value)) => value,
                        _ => 0,
                    },
                    protocol: port.protocol.clone().unwrap_or_else(|| "TCP".to_string()),
                })
                .collect()
        })
        .unwrap_or_default();

    RawService {
        name: service.metadata.name.clone().unwrap_or_default(),
        namespace: service.metadata.namespace.clone().unwrap_or_default(),
        service_type: spec.and_then(|s| s.type_.clone()).unwrap_or_default(),
        ports,
    }
}
