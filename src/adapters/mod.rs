//! Concrete cluster adapters.
//!
//! The core only consumes the [`ClusterClient`](crate::cluster::ClusterClient)
//! trait; adapters translate it onto a real control plane. Cloud-specific
//! credential wiring (GKE/EKS token exchange) is deliberately not handled
//! here — point a kubeconfig at the cluster instead.

pub mod kubernetes;

pub use kubernetes::KubeClusterClient;
