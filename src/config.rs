//! Proxy configuration
//!
//! The core is configured with a target namespace, a management port, and a
//! platform tag. Platform detection itself happens outside the core; the tag
//! only selects which cluster adapter is wired and which node address policy
//! applies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cluster::AddressPolicy;

/// Default port for the management interface (homepage, health, info).
pub const DEFAULT_MANAGEMENT_PORT: u16 = 80;

/// Errors produced while validating configuration. All of these are fatal at
/// boot.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("namespace must not be empty")]
    EmptyNamespace,

    #[error("management port must be non-zero")]
    InvalidManagementPort,

    #[error("unknown platform '{0}' (expected gke, eks, generic, or in-cluster)")]
    UnknownPlatform(String),
}

/// Which environment the proxy runs against.
///
/// Only affects adapter wiring and the node address policy; the core never
/// reads cloud credentials itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    Gke,
    Eks,
    Generic,
    InCluster,
}

impl Platform {
    /// The node address policy this platform uses. GKE/EKS nodes are reached
    /// over internal addresses; a generic cluster may only be reachable on
    /// external ones.
    pub fn address_policy(&self) -> AddressPolicy {
        match self {
            Platform::Generic => AddressPolicy::PreferExternal,
            Platform::Gke | Platform::Eks | Platform::InCluster => AddressPolicy::Internal,
        }
    }
}

impl FromStr for Platform {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gke" => Ok(Platform::Gke),
            "eks" => Ok(Platform::Eks),
            "generic" => Ok(Platform::Generic),
            "in-cluster" | "incluster" => Ok(Platform::InCluster),
            other => Err(ConfigError::UnknownPlatform(other.to_string())),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Platform::Gke => "gke",
            Platform::Eks => "eks",
            Platform::Generic => "generic",
            Platform::InCluster => "in-cluster",
        };
        f.write_str(name)
    }
}

/// Validated configuration for a proxy instance.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Namespace whose NodePort services are proxied. Required: an empty
    /// namespace would claim ports cluster-wide.
    pub namespace: String,

    /// Port for the management interface. Never used for forwarding.
    pub management_port: u16,

    /// Platform tag, display and address policy only.
    pub platform: Platform,
}

impl ProxyConfig {
    /// Create a config with defaults (management port 80, generic platform).
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            management_port: DEFAULT_MANAGEMENT_PORT,
            platform: Platform::Generic,
        }
    }

    /// Set the management port.
    pub fn with_management_port(mut self, port: u16) -> Self {
        self.management_port = port;
        self
    }

    /// Set the platform tag.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Validate the configuration. Called by the supervisor before anything
    /// binds or talks to the cluster.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::EmptyNamespace);
        }
        if self.management_port == 0 {
            return Err(ConfigError::InvalidManagementPort);
        }
        Ok(())
    }

    /// Node address policy derived from the platform tag.
    pub fn address_policy(&self) -> AddressPolicy {
        self.platform.address_policy()
    }
}
