//! Port listener manager.
//!
//! Owns the exclusive `port -> listener` mapping. Each listener is a
//! background task serving an axum router until told to shut down; draining
//! is graceful with a hard deadline, after which the task is aborted.

use std::time::Duration;

use axum::Router;
use dashmap::DashMap;
use futures::future::join_all;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// How long a listener gets to finish in-flight requests before it is
/// force-closed.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("port {0} already has a listener")]
    DuplicatePort(u16),

    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

struct PortListener {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Exclusive mapping of ports to running HTTP listeners.
#[derive(Default)]
pub struct PortManager {
    listeners: DashMap<u16, PortListener>,
}

impl PortManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `port` and serve `app` on it until [`stop_port`](Self::stop_port)
    /// or [`stop_all`](Self::stop_all). A port with a live listener is
    /// refused; a live listener also holds the socket, so a racing second
    /// start fails at bind.
    pub async fn start_port(&self, port: u16, app: Router) -> Result<(), ListenerError> {
        if self.listeners.contains_key(&port) {
            return Err(ListenerError::DuplicatePort(port));
        }

        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|source| ListenerError::Bind { port, source })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(serve_until_shutdown(port, listener, app, shutdown_rx));
        self.listeners.insert(
            port,
            PortListener {
                shutdown: shutdown_tx,
                task,
            },
        );
        info!(port, "listening");
        Ok(())
    }

    /// Drain and remove one listener. Returns false when the port has none.
    pub async fn stop_port(&self, port: u16) -> bool {
        match self.listeners.remove(&port) {
            Some((port, listener)) => {
                drain(port, listener).await;
                true
            }
            None => false,
        }
    }

    /// Drain every listener concurrently and wait until all are stopped.
    pub async fn stop_all(&self) {
        let ports: Vec<u16> = self.listeners.iter().map(|entry| *entry.key()).collect();
        let drains = ports
            .into_iter()
            .filter_map(|port| self.listeners.remove(&port))
            .map(|(port, listener)| drain(port, listener));
        join_all(drains).await;
    }

    /// Currently bound ports, ascending.
    pub fn listening_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.listeners.iter().map(|entry| *entry.key()).collect();
        ports.sort_unstable();
        ports
    }
}

async fn serve_until_shutdown(
    port: u16,
    listener: TcpListener,
    app: Router,
    mut shutdown: watch::Receiver<bool>,
) {
    let graceful = async move {
        let _ = shutdown.changed().await;
    };
    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(graceful)
        .await
    {
        error!(port, error = %err, "listener failed");
    }
}

async fn drain(port: u16, listener: PortListener) {
    let _ = listener.shutdown.send(true);
    let mut task = listener.task;
    match tokio::time::timeout(DRAIN_TIMEOUT, &mut task).await {
        Ok(Ok(())) => info!(port, "listener stopped"),
        Ok(Err(err)) => error!(port, error = %err, "listener task ended abnormally"),
        Err(_) => {
            warn!(port, deadline = ?DRAIN_TIMEOUT, "listener did not drain in time, closing");
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::routing::get;

    use super::*;

    fn find_available_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .expect("failed to bind")
            .local_addr()
            .expect("failed to get local address")
            .port()
    }

    fn test_router() -> Router {
        Router::new().route("/", get(|| async { "ok" }))
    }

    #[tokio::test]
    async fn test_duplicate_port_rejected() {
        let manager = PortManager::new();
        let port = find_available_port();

        manager.start_port(port, test_router()).await.unwrap();
        let second = manager.start_port(port, test_router()).await;
        assert!(matches!(second, Err(ListenerError::DuplicatePort(p)) if p == port));
        assert_eq!(manager.listening_ports(), vec![port]);

        manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_stop_all_drains_every_listener() {
        let manager = PortManager::new();
        let first = find_available_port();
        let second = find_available_port();

        manager.start_port(first, test_router()).await.unwrap();
        manager.start_port(second, test_router()).await.unwrap();
        assert_eq!(manager.listening_ports().len(), 2);

        manager.stop_all().await;
        assert!(manager.listening_ports().is_empty());

        // The port is released and can be claimed again.
        manager.start_port(first, test_router()).await.unwrap();
        manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_stop_port_is_idempotent() {
        let manager = PortManager::new();
        let port = find_available_port();

        manager.start_port(port, test_router()).await.unwrap();
        assert!(manager.stop_port(port).await);
        assert!(!manager.stop_port(port).await);
    }

    #[tokio::test]
    async fn test_listener_actually_serves() {
        let manager = PortManager::new();
        let port = find_available_port();
        manager.start_port(port, test_router()).await.unwrap();

        let body = reqwest::get(format!("http://127.0.0.1:{}/", port))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "ok");

        manager.stop_all().await;
        assert!(reqwest::get(format!("http://127.0.0.1:{}/", port))
            .await
            .is_err());
    }
}
