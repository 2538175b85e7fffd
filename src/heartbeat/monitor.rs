//! Heartbeat Monitor
//!
//! Periodically pings active peers and feeds the outcome into the
//! registry's liveness state machine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{watch, RwLock};

use super::ping::HeartbeatPing;
use crate::error::Error;
use crate::state::{LocalNodeIdentity, Node, NodeRegistry};
use crate::transport::{call_with_timeout, PeerRequest, Transport};

/// Outcome of one heartbeat cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub pinged: usize,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

/// Sends heartbeats to every active peer on a fixed interval
pub struct HeartbeatMonitor {
    identity: Arc<LocalNodeIdentity>,
    registry: Arc<NodeRegistry>,
    transport: Arc<dyn Transport>,
    interval: Duration,
    timeout: Duration,
    /// Consecutive missed cycles per peer
    missed_cycles: RwLock<HashMap<String, u32>>,
    shutdown: watch::Sender<bool>,
}

impl HeartbeatMonitor {
    pub fn new(
        identity: Arc<LocalNodeIdentity>,
        transport: Arc<dyn Transport>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let registry = identity.registry().clone();
        Self {
            identity,
            registry,
            transport,
            interval,
            timeout,
            missed_cycles: RwLock::new(HashMap::new()),
            shutdown,
        }
    }

    /// Build a signed ping for this node
    pub fn build_payload(&self) -> HeartbeatPing {
        HeartbeatPing::new(self.identity.node_id())
    }

    /// Missed cycles per peer since its last successful ping
    pub async fn missed_cycles(&self) -> HashMap<String, u32> {
        self.missed_cycles.read().await.clone()
    }

    async fn ping_node(&self, node: Node) -> bool {
        let request = PeerRequest::Heartbeat(self.build_payload());
        let started = tokio::time::Instant::now();
        let result = call_with_timeout(self.transport.as_ref(), &node.address, &request, self.timeout).await;

        let outcome = match result {
            Ok(true) => {
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                self.registry
                    .record_heartbeat(&node.node_id, Some(latency_ms), Utc::now())
                    .await
                    .map(|_| 0)
            }
            Ok(false) | Err(_) => {
                if let Err(e) = &result {
                    tracing::warn!(node_id = %node.node_id, address = %node.address, "Heartbeat failed: {}", e);
                } else {
                    tracing::warn!(node_id = %node.node_id, address = %node.address, "Heartbeat refused");
                }
                self.registry
                    .mark_failure(&node.node_id)
                    .await
                    .map(|updated| updated.consecutive_failures)
            }
        };

        match outcome {
            Ok(missed) => {
                self.missed_cycles.write().await.insert(node.node_id.clone(), missed);
                missed == 0
            }
            Err(Error::NotFound(_)) => {
                // Removed while the ping was in flight
                self.missed_cycles.write().await.remove(&node.node_id);
                false
            }
            Err(e) => {
                tracing::error!(node_id = %node.node_id, "Failed to update registry: {}", e);
                false
            }
        }
    }

    /// Ping every active peer concurrently
    pub async fn send_cycle(&self) -> CycleReport {
        let peers = self.identity.active_peers().await;
        if peers.is_empty() {
            return CycleReport::default();
        }

        let ids: Vec<String> = peers.iter().map(|p| p.node_id.clone()).collect();
        let results = futures::future::join_all(peers.into_iter().map(|peer| self.ping_node(peer))).await;

        let mut report = CycleReport {
            pinged: ids.len(),
            ..Default::default()
        };
        for (id, ok) in ids.into_iter().zip(results) {
            if ok {
                report.succeeded.push(id);
            } else {
                report.failed.push(id);
            }
        }

        tracing::debug!(
            pinged = report.pinged,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "heartbeat cycle complete"
        );
        report
    }

    /// Run cycles until [`stop`](Self::stop) is called
    pub async fn run(&self) {
        let mut shutdown_rx = self.shutdown.subscribe();
        if *shutdown_rx.borrow() {
            return;
        }
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Heartbeat monitor started");

        loop {
            self.send_cycle().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Heartbeat monitor stopped");
    }

    /// Stop the monitor after the current cycle
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}
