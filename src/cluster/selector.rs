//! Node selector and health monitor.
//!
//! Keeps one, and only one, node "current" so that forwarding is
//! deterministic. A background monitor probes the current node every
//! [`MONITOR_INTERVAL`](super::MONITOR_INTERVAL); after
//! [`FAILURE_THRESHOLD`](super::FAILURE_THRESHOLD) consecutive failed probes
//! it fails over to the oldest healthy alternative. Worst-case detection of a
//! silent node death is therefore `3 x 15s` before the failover fetch starts.
//!
//! Concurrency contract: the selection slot is read by every request-serving
//! task and written only by the monitor and the initial on-demand selection.
//! The slot lock is held for field swaps only, never across an RPC; on-demand
//! selections coalesce behind a separate async mutex so concurrent
//! `current_ip` calls trigger at most one cluster fetch.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::client::ClientError;
use super::node::{format_age, oldest_healthy};
use super::registry::NodeRegistry;
use super::{FAILOVER_TIMEOUT, FAILURE_THRESHOLD, IP_CACHE_VALIDITY, MONITOR_INTERVAL, PROBE_TIMEOUT};

/// Errors surfaced to callers asking for the current node.
#[derive(Error, Debug)]
pub enum SelectorError {
    #[error("no healthy node available")]
    NoHealthyNode,

    #[error("node selection did not complete in time")]
    DeadlineExceeded,

    #[error(transparent)]
    Cluster(#[from] ClientError),
}

/// The single mutable slot shared between the monitor and request handlers.
#[derive(Debug, Default)]
struct CurrentSelection {
    /// Selected node name; empty means unselected.
    name: String,
    ip: String,
    consecutive_failures: u32,
    /// When the node was last confirmed (selection or Ready probe).
    last_checked: Option<Instant>,
    /// When the current failure streak started. Failover refuses node lists
    /// fetched before this point.
    first_failure: Option<Instant>,
}

impl CurrentSelection {
    fn is_fresh(&self) -> bool {
        !self.name.is_empty()
            && self
                .last_checked
                .map(|at| at.elapsed() < IP_CACHE_VALIDITY)
                .unwrap_or(false)
    }
}

/// Read-only view of the selection slot for display surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct SelectionView {
    pub name: String,
    pub ip: String,
    pub consecutive_failures: u32,
}

impl SelectionView {
    pub fn is_selected(&self) -> bool {
        !self.name.is_empty()
    }

    pub fn status(&self) -> &'static str {
        if !self.is_selected() {
            "None"
        } else if self.consecutive_failures > 0 {
            "Degraded"
        } else {
            "Healthy"
        }
    }
}

struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Maintains the current node and runs the periodic liveness check.
pub struct NodeSelector {
    registry: Arc<NodeRegistry>,
    slot: RwLock<CurrentSelection>,
    /// Coalesces on-demand selections; held across the registry fetch.
    select_lock: Mutex<()>,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl NodeSelector {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self {
            registry,
            slot: RwLock::new(CurrentSelection::default()),
            select_lock: Mutex::new(()),
            monitor: Mutex::new(None),
        }
    }

    /// Non-blocking read of the current node name; empty if unselected.
    pub fn current_name(&self) -> String {
        self.slot().name.clone()
    }

    /// Snapshot of the slot for the management surface. Never touches the
    /// cluster API.
    pub fn current_view(&self) -> SelectionView {
        let slot = self.slot();
        SelectionView {
            name: slot.name.clone(),
            ip: slot.ip.clone(),
            consecutive_failures: slot.consecutive_failures,
        }
    }

    /// The current node IP. Served from the slot when the node was confirmed
    /// within the last 30 s; otherwise a bounded on-demand selection runs.
    pub async fn current_ip(&self) -> Result<String, SelectorError> {
        {
            let slot = self.slot();
            if slot.is_fresh() {
                return Ok(slot.ip.clone());
            }
        }

        match timeout(PROBE_TIMEOUT, self.select_if_needed()).await {
            Ok(result) => result,
            Err(_) => Err(SelectorError::DeadlineExceeded),
        }
    }

    /// Start the monitor loop. Idempotent: a second call while the monitor
    /// runs is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut monitor = self.monitor.lock().await;
        if monitor.is_some() {
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let selector = Arc::clone(self);
        let task = tokio::spawn(async move {
            selector.run_monitor(shutdown_rx).await;
        });

        *monitor = Some(MonitorHandle {
            shutdown: shutdown_tx,
            task,
        });
        info!(interval = ?MONITOR_INTERVAL, "started node health monitor");
    }

    /// Stop the monitor, aborting any in-flight probe, and wait for the loop
    /// to exit. Idempotent.
    pub async fn stop(&self) {
        let handle = self.monitor.lock().await.take();
        let Some(handle) = handle else {
            return;
        };

        let _ = handle.shutdown.send(true);
        if let Err(err) = handle.task.await {
            if !err.is_cancelled() {
                error!(error = %err, "monitor task ended abnormally");
            }
        }
        info!("stopped node health monitor");
    }

    async fn run_monitor(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(MONITOR_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // An interval's first tick is immediate; the first probe belongs one
        // full period after start.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = self.probe_current() => {}
                        // Dropping the probe future aborts the in-flight fetch.
                        _ = shutdown.changed() => break,
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("monitor loop exited");
    }

    /// One monitor iteration: select when unselected, otherwise probe the
    /// current node and count failures.
    async fn probe_current(&self) {
        let current = self.slot().name.clone();
        if current.is_empty() {
            match timeout(PROBE_TIMEOUT, self.select_if_needed()).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => debug!(error = %err, "no node selected yet"),
                Err(_) => debug!("initial selection timed out, will retry"),
            }
            return;
        }

        let ready = match timeout(PROBE_TIMEOUT, self.registry.get(&current)).await {
            Ok(Ok(node)) => node.ready == Some(true),
            Ok(Err(err)) => {
                warn!(node = %current, error = %err, "node probe failed");
                false
            }
            Err(_) => {
                warn!(node = %current, "node probe timed out");
                false
            }
        };

        self.registry.mark_checked(&current, ready, Utc::now()).await;

        if ready {
            let mut slot = self.slot_mut();
            if slot.name != current {
                return;
            }
            if slot.consecutive_failures > 0 {
                info!(node = %current, "node recovered");
            }
            slot.consecutive_failures = 0;
            slot.first_failure = None;
            slot.last_checked = Some(Instant::now());
        } else {
            let failures = {
                let mut slot = self.slot_mut();
                if slot.name != current {
                    return;
                }
                slot.consecutive_failures += 1;
                if slot.first_failure.is_none() {
                    slot.first_failure = Some(Instant::now());
                }
                slot.consecutive_failures
            };
            warn!(
                node = %current,
                failures,
                threshold = FAILURE_THRESHOLD,
                "node health check failed"
            );
            if failures >= FAILURE_THRESHOLD {
                self.failover(&current).await;
            }
        }
    }

    /// Replace the current node with the oldest healthy alternative. The
    /// candidate list must be at least as new as the first failure of the
    /// streak. When no candidate exists the slot is left untouched: the
    /// system is degraded, but an empty selection would turn a possibly
    /// transient outage into hard 503s. The failure count stays at the
    /// threshold, so the next failed probe retries.
    async fn failover(&self, failing: &str) {
        let cutoff = self.slot().first_failure;
        info!(node = %failing, "initiating failover");

        let snapshot = match timeout(
            FAILOVER_TIMEOUT,
            self.registry.list_no_older_than(cutoff),
        )
        .await
        {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(err)) => {
                error!(error = %err, "failed to fetch nodes for failover");
                return;
            }
            Err(_) => {
                error!("failover candidate fetch timed out");
                return;
            }
        };

        match oldest_healthy(&snapshot.nodes, Some(failing)) {
            Some(candidate) => {
                let mut slot = self.slot_mut();
                if slot.name != failing {
                    return;
                }
                info!(
                    old = %failing,
                    new = %candidate.name,
                    ip = %candidate.ip,
                    "failover completed"
                );
                slot.name = candidate.name.clone();
                slot.ip = candidate.ip.clone();
                slot.consecutive_failures = 0;
                slot.first_failure = None;
                slot.last_checked = Some(Instant::now());
            }
            None => {
                warn!(
                    node = %failing,
                    "no healthy replacement node found, keeping current selection"
                );
            }
        }
    }

    /// Select a node when none is current or the current one is stale.
    /// Coalesced: concurrent callers wait for the first one's result instead
    /// of issuing their own fetch.
    async fn select_if_needed(&self) -> Result<String, SelectorError> {
        let _guard = self.select_lock.lock().await;

        // A selection may have completed while this task waited for the lock.
        {
            let slot = self.slot();
            if slot.is_fresh() {
                return Ok(slot.ip.clone());
            }
        }

        let snapshot = self.registry.list().await?;
        let candidate =
            oldest_healthy(&snapshot.nodes, None).ok_or(SelectorError::NoHealthyNode)?;

        info!(
            node = %candidate.name,
            ip = %candidate.ip,
            age = %format_age(candidate.age(Utc::now())),
            "selected node for forwarding"
        );

        let mut slot = self.slot_mut();
        slot.name = candidate.name.clone();
        slot.ip = candidate.ip.clone();
        slot.consecutive_failures = 0;
        slot.first_failure = None;
        slot.last_checked = Some(Instant::now());
        Ok(slot.ip.clone())
    }

    fn slot(&self) -> RwLockReadGuard<'_, CurrentSelection> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot_mut(&self) -> RwLockWriteGuard<'_, CurrentSelection> {
        self.slot.write().unwrap_or_else(PoisonError::into_inner)
    }
}
