use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use nodegate::adapters::KubeClusterClient;
use nodegate::cluster::ClusterClient;
use nodegate::config::{Platform, ProxyConfig};
use nodegate::server::ProxyServer;

#[derive(Parser, Debug)]
#[command(
    name = "nodegate",
    version,
    about = "Stable ingress proxy for Kubernetes NodePort services"
)]
struct Args {
    /// Namespace whose NodePort services are proxied
    #[arg(long, env = "NODEGATE_NAMESPACE")]
    namespace: String,

    /// Port for the management interface (homepage, health, info)
    #[arg(long, env = "NODEGATE_MANAGEMENT_PORT", default_value_t = 80)]
    management_port: u16,

    /// Platform tag: gke, eks, generic, or in-cluster
    #[arg(long, env = "NODEGATE_PLATFORM", default_value = "generic")]
    platform: String,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let platform = match args.platform.parse::<Platform>() {
        Ok(platform) => platform,
        Err(err) => {
            error!("{}", err);
            process::exit(1);
        }
    };

    let config = ProxyConfig::new(args.namespace)
        .with_management_port(args.management_port)
        .with_platform(platform);
    if let Err(err) = config.validate() {
        error!("invalid configuration: {}", err);
        process::exit(1);
    }

    info!(
        namespace = %config.namespace,
        management_port = config.management_port,
        platform = %config.platform,
        "starting nodegate"
    );

    let client: Arc<dyn ClusterClient> = match KubeClusterClient::new().await {
        Ok(client) => Arc::new(client),
        Err(err) => {
            error!("failed to connect to the cluster: {}", err);
            process::exit(1);
        }
    };

    let server = match ProxyServer::new(config, client) {
        Ok(server) => server,
        Err(err) => {
            error!("failed to initialize the proxy: {}", err);
            process::exit(1);
        }
    };

    if let Err(err) = server.run().await {
        error!("proxy server error: {}", err);
        process::exit(1);
    }
}
