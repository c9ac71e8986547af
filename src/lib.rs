//! # nodegate
//!
//! Stable ingress for Kubernetes NodePort services.
//!
//! NodePort ports are fixed (30000-32767) but the node IPs behind them churn
//! during autoscaling, upgrades, and replacement. nodegate presents one stable
//! network address: for every NodePort service in a configured namespace it
//! opens a listener on the same port number and forwards traffic to a single
//! currently-healthy cluster node, failing over when that node degrades.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     nodegate process                     │
//! │  ┌────────────┐  ┌──────────────┐  ┌──────────────────┐  │
//! │  │ Management │  │ PortManager  │  │ NodeSelector     │  │
//! │  │ :80        │  │ :30001 ...   │  │ + monitor (15s)  │  │
//! │  └────────────┘  └──────┬───────┘  └────────┬─────────┘  │
//! │                         │ forward            │ probe      │
//! └─────────────────────────┼────────────────────┼────────────┘
//!                           ▼                    ▼
//!                   http://<node-ip>:<port>   cluster API
//! ```
//!
//! The `cluster` module owns node knowledge: a [`cluster::ClusterClient`]
//! adapter, a TTL-cached [`cluster::NodeRegistry`], and the
//! [`cluster::NodeSelector`] that keeps exactly one node current. The `proxy`
//! module rewrites each inbound request toward that node on the port the
//! request arrived on. The `server` module supervises listeners and shutdown.
//!
//! NodePort services are enumerated once at startup; ports added or removed
//! afterwards are not picked up until a restart.

pub mod adapters;
pub mod cluster;
pub mod config;
pub mod discovery;
pub mod proxy;
pub mod server;

pub use config::{Platform, ProxyConfig};
pub use server::ProxyServer;
