//! Local Node Identity
//!
//! This node's own registration, operational status and
//! reconnect-with-backoff behaviour.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::registry::{Node, NodeRegistration, NodeRegistry, NodeStatus};
use crate::error::{Error, Result};

/// Retry schedule for reconnection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl ReconnectPolicy {
    /// Delay slept after failed attempt number `attempt` (zero-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Snapshot of the local node's liveness
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pulse {
    pub node_id: String,
    pub status: NodeStatus,
    pub timestamp: DateTime<Utc>,
    pub boot_time: DateTime<Utc>,
}

/// "This" node as seen by the coordinator and the heartbeat monitor
pub struct LocalNodeIdentity {
    node_id: String,
    registry: Arc<NodeRegistry>,
    address: RwLock<Option<String>>,
    status: RwLock<NodeStatus>,
    boot_time: DateTime<Utc>,
}

impl LocalNodeIdentity {
    pub fn new(node_id: impl Into<String>, registry: Arc<NodeRegistry>) -> Self {
        Self {
            node_id: node_id.into(),
            registry,
            address: RwLock::new(None),
            status: RwLock::new(NodeStatus::Active),
            boot_time: Utc::now(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Last address this node registered with
    pub async fn address(&self) -> Option<String> {
        self.address.read().await.clone()
    }

    /// Locally tracked operational status
    pub async fn status(&self) -> NodeStatus {
        *self.status.read().await
    }

    /// Register this node as active at `address`
    pub async fn register_self(&self, address: &str) -> Result<Node> {
        let node = self
            .registry
            .register(NodeRegistration::new(self.node_id.clone(), address).with_status(NodeStatus::Active))
            .await?;
        *self.address.write().await = Some(node.address.clone());
        *self.status.write().await = NodeStatus::Active;
        Ok(node)
    }

    /// Update the local status, mirroring it into the registry when registered
    pub async fn update_status(&self, status: NodeStatus) {
        *self.status.write().await = status;
        match self.registry.set_status(&self.node_id, status).await {
            Ok(_) | Err(Error::NotFound(_)) => {}
            Err(e) => tracing::warn!(node_id = %self.node_id, "Failed to update local status: {}", e),
        }
    }

    /// Switch isolation on or off for this node
    pub async fn set_isolated(&self, isolated: bool) {
        match self.registry.set_isolated(&self.node_id, isolated).await {
            Ok(node) => *self.status.write().await = node.status,
            Err(Error::NotFound(_)) => {
                let mut status = self.status.write().await;
                if isolated {
                    *status = NodeStatus::Isolated;
                } else if *status == NodeStatus::Isolated {
                    *status = NodeStatus::Active;
                }
            }
            Err(e) => tracing::warn!(node_id = %self.node_id, "Failed to toggle isolation: {}", e),
        }
    }

    /// Active peers, excluding this node
    pub async fn active_peers(&self) -> Vec<Node> {
        self.registry.get_active_nodes(Some(&self.node_id)).await
    }

    /// Local liveness snapshot
    pub async fn pulse(&self) -> Pulse {
        Pulse {
            node_id: self.node_id.clone(),
            status: self.status().await,
            timestamp: Utc::now(),
            boot_time: self.boot_time,
        }
    }

    async fn reregister(&self) -> Result<bool> {
        let address = self
            .address()
            .await
            .ok_or_else(|| Error::Validation("no address configured for this node".into()))?;
        self.register_self(&address).await?;
        Ok(true)
    }

    /// Reconnect by re-registering at the last known address
    pub async fn reconnect(&self, policy: ReconnectPolicy) -> bool {
        self.reconnect_with_backoff(None::<fn() -> futures::future::Ready<Result<bool>>>, policy)
            .await
    }

    /// Retry `action` (default: re-register self) with exponential backoff.
    ///
    /// Sleeps `base_delay * 2^attempt` between attempts, never after the
    /// last one. Reports the outcome instead of failing.
    pub async fn reconnect_with_backoff<F, Fut>(
        &self,
        mut action: Option<F>,
        policy: ReconnectPolicy,
    ) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        for attempt in 0..policy.attempts {
            let outcome = match action.as_mut() {
                Some(action) => action().await,
                None => self.reregister().await,
            };

            match outcome {
                Ok(true) => {
                    self.update_status(NodeStatus::Active).await;
                    self.set_isolated(false).await;
                    tracing::info!(node_id = %self.node_id, attempt = attempt + 1, "Reconnected");
                    return true;
                }
                Ok(false) => {
                    tracing::debug!(node_id = %self.node_id, attempt = attempt + 1, "Reconnect attempt declined");
                }
                Err(e) => {
                    tracing::debug!(node_id = %self.node_id, attempt = attempt + 1, "Reconnect attempt failed: {}", e);
                }
            }

            if attempt + 1 < policy.attempts {
                tokio::time::sleep(policy.delay_for(attempt)).await;
            }
        }

        tracing::warn!(
            node_id = %self.node_id,
            attempts = policy.attempts,
            "Reconnection failed, marking node unreachable"
        );
        self.update_status(NodeStatus::Unreachable).await;
        false
    }
}
