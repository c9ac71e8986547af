//! Supervisor: boots the proxy, traps termination signals, and orchestrates
//! shutdown.
//!
//! Boot order: registry and selector are built first (monitor not yet
//! running), the management listener comes up so the status surface exists
//! while the rest initializes, an initial node selection runs best-effort,
//! then the monitor starts, NodePort services are discovered once, and one
//! proxy listener opens per discovered port.
//!
//! Shutdown order matters: the monitor stops (and is joined) before any
//! listener drains, so no in-flight forward observes a mid-shutdown
//! selection change.

pub mod homepage;
pub mod management;
pub mod portmanager;

pub use management::ManagementState;
pub use portmanager::{ListenerError, PortManager, DRAIN_TIMEOUT};

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::cluster::{ClientError, ClusterClient, NodeRegistry, NodeSelector};
use crate::config::{ConfigError, ProxyConfig};
use crate::discovery::{DiscoveryError, ServiceDiscovery};
use crate::proxy::{self, ProxyState};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("service discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("listener error: {0}")]
    Listener(#[from] ListenerError),

    #[error("cluster error: {0}")]
    Cluster(#[from] ClientError),

    #[error("signal handler error: {0}")]
    Signal(#[from] std::io::Error),
}

/// The assembled proxy process.
pub struct ProxyServer {
    config: ProxyConfig,
    selector: Arc<NodeSelector>,
    discovery: ServiceDiscovery,
    ports: PortManager,
    management: ManagementState,
}

impl ProxyServer {
    /// Wire the components around a ready cluster client. Validates the
    /// configuration; nothing binds or talks to the cluster yet.
    pub fn new(config: ProxyConfig, client: Arc<dyn ClusterClient>) -> Result<Self, ServerError> {
        config.validate()?;

        let registry = Arc::new(NodeRegistry::new(client.clone(), config.address_policy()));
        let selector = Arc::new(NodeSelector::new(registry.clone()));
        let discovery = ServiceDiscovery::new(client.clone(), config.namespace.clone())?;
        let management = ManagementState::new(
            selector.clone(),
            registry,
            client.cluster_info(),
            config.namespace.clone(),
            config.platform,
        );

        Ok(Self {
            config,
            selector,
            discovery,
            ports: PortManager::new(),
            management,
        })
    }

    /// Boot, wait for SIGINT/SIGTERM, shut down.
    pub async fn run(self) -> Result<(), ServerError> {
        self.start().await?;
        wait_for_shutdown_signal().await?;
        info!("shutdown signal received");
        self.shutdown().await;
        Ok(())
    }

    /// Bring every listener up. Separate from [`run`](Self::run) so callers
    /// without a signal loop (tests, embedders) can drive the lifecycle.
    pub async fn start(&self) -> Result<(), ServerError> {
        self.ports
            .start_port(
                self.config.management_port,
                management::router(self.management.clone()),
            )
            .await?;
        info!(port = self.config.management_port, "management interface up");

        // Best-effort: a cluster that is briefly unreachable must not block
        // boot, the monitor keeps retrying.
        match self.selector.current_ip().await {
            Ok(ip) => info!(%ip, "initial node selected"),
            Err(err) => warn!(error = %err, "initial node selection failed, monitor will retry"),
        }

        self.selector.start().await;

        let services = self.discovery.discover_services().await?;
        self.management.set_services(services.clone()).await;

        let mut seen = HashSet::new();
        let proxy_state = ProxyState::new(self.selector.clone());
        for record in &services {
            let port = record.node_port;
            if !seen.insert(port) {
                continue;
            }
            if port == self.config.management_port {
                info!(
                    port,
                    "NodePort equals the management port, keeping the management handler"
                );
                continue;
            }
            if let Err(err) = self
                .ports
                .start_port(port, proxy::router(proxy_state.clone()))
                .await
            {
                // One conflicted port must not take down ingress for the
                // rest of the namespace.
                error!(port, error = %err, "failed to start proxy listener");
            }
        }

        let listening = self.ports.listening_ports();
        info!(count = listening.len().saturating_sub(1), "proxy listeners started");
        self.management
            .set_proxy_ports(
                listening
                    .into_iter()
                    .filter(|&p| p != self.config.management_port)
                    .collect(),
            )
            .await;

        Ok(())
    }

    /// Stop the monitor, then drain all listeners in parallel.
    pub async fn shutdown(&self) {
        info!("shutting down");
        self.selector.stop().await;
        self.ports.stop_all().await;
        info!("all listeners stopped");
    }

    /// Ports currently bound, management port included.
    pub fn listening_ports(&self) -> Vec<u16> {
        self.ports.listening_ports()
    }
}

async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::client::{RawService, RawServicePort};
    use crate::cluster::testutil::{raw_node, MockCluster};

    fn find_available_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .expect("failed to bind")
            .local_addr()
            .expect("failed to get local address")
            .port()
    }

    #[test]
    fn test_empty_namespace_fails_construction() {
        let cluster = Arc::new(MockCluster::new(vec![]));
        let result = ProxyServer::new(ProxyConfig::new(""), cluster);
        assert!(matches!(
            result,
            Err(ServerError::Config(ConfigError::EmptyNamespace))
        ));
    }

    #[tokio::test]
    async fn test_boot_opens_management_and_proxy_ports() {
        let cluster = Arc::new(MockCluster::new(vec![raw_node(
            "a", "127.0.0.1", 24,
            Some(true),
        )]));
        let node_port = find_available_port();
        *cluster.services.lock().unwrap() = vec![RawService {
            name: "web".to_string(),
            namespace: "apps".to_string(),
            service_type: "NodePort".to_string(),
            ports: vec![RawServicePort {
                node_port: node_port as i32,
                target_port: 8080,
                protocol: "TCP".to_string(),
            }],
        }];

        let management_port = find_available_port();
        let config = ProxyConfig::new("apps").with_management_port(management_port);
        let server = ProxyServer::new(config, cluster).unwrap();

        server.start().await.unwrap();
        let mut expected = vec![management_port, node_port];
        expected.sort_unstable();
        assert_eq!(server.listening_ports(), expected);

        server.shutdown().await;
        assert!(server.listening_ports().is_empty());
    }

    #[tokio::test]
    async fn test_nodeport_equal_to_management_port_is_skipped() {
        let cluster = Arc::new(MockCluster::new(vec![raw_node(
            "a", "127.0.0.1", 24,
            Some(true),
        )]));
        let management_port = find_available_port();
        *cluster.services.lock().unwrap() = vec![RawService {
            name: "clash".to_string(),
            namespace: "apps".to_string(),
            service_type: "NodePort".to_string(),
            ports: vec![RawServicePort {
                node_port: management_port as i32,
                target_port: 8080,
                protocol: "TCP".to_string(),
            }],
        }];

        let config = ProxyConfig::new("apps").with_management_port(management_port);
        let server = ProxyServer::new(config, cluster).unwrap();

        server.start().await.unwrap();
        // Only the management listener owns the slot.
        assert_eq!(server.listening_ports(), vec![management_port]);

        let body = reqwest::get(format!("http://127.0.0.1:{}/health", management_port))
            .await
            .unwrap()
            .json::<serde_json::Value>()
            .await
            .unwrap();
        assert_eq!(body["proxy_server"], "healthy");

        server.shutdown().await;
    }
}
