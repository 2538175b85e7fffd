//! Fleet Node
//!
//! Assembles one process: registry, identity, transport, gossip sync,
//! consensus coordinator and heartbeat monitor, all sharing a single
//! registry instance.

use std::sync::Arc;

use crate::api::HttpServer;
use crate::config::FleetConfig;
use crate::consensus::{ConsensusCoordinator, ConsensusHistory, CoordinatorConfig};
use crate::error::{Error, Result};
use crate::heartbeat::HeartbeatMonitor;
use crate::state::{LocalNodeIdentity, NodeRegistration, NodeRegistry, ReconnectPolicy};
use crate::sync::GossipSyncProtocol;
use crate::transport::{HttpTransport, Transport};

/// One running fleet member
pub struct FleetNode {
    config: FleetConfig,
    registry: Arc<NodeRegistry>,
    identity: Arc<LocalNodeIdentity>,
    sync: Arc<GossipSyncProtocol>,
    coordinator: Arc<ConsensusCoordinator>,
    monitor: Arc<HeartbeatMonitor>,
}

impl FleetNode {
    /// Build a node that talks to peers over HTTP
    pub fn new(config: FleetConfig) -> Result<Self> {
        let timeout = config.call_timeout().max(config.heartbeat_timeout());
        let transport = Arc::new(HttpTransport::new(timeout)?);
        Ok(Self::with_transport(config, transport))
    }

    /// Build a node over an arbitrary transport
    pub fn with_transport(config: FleetConfig, transport: Arc<dyn Transport>) -> Self {
        let registry = Arc::new(NodeRegistry::new());
        let identity = Arc::new(LocalNodeIdentity::new(config.node.id.clone(), registry.clone()));
        let sync = Arc::new(GossipSyncProtocol::new(
            config.node.id.clone(),
            registry.clone(),
            config.sync.clone(),
        ));

        let history = match config.history_path() {
            Some(path) => ConsensusHistory::load(path, config.consensus.history_limit),
            None => ConsensusHistory::in_memory(config.consensus.history_limit),
        };
        let coordinator = Arc::new(ConsensusCoordinator::new(
            identity.clone(),
            transport.clone(),
            sync.clone(),
            CoordinatorConfig {
                call_timeout: config.call_timeout(),
                default_quorum: config.consensus.quorum,
                isolation_threshold: config.consensus.isolation_threshold,
            },
            history,
        ));

        let monitor = Arc::new(HeartbeatMonitor::new(
            identity.clone(),
            transport,
            config.heartbeat_interval(),
            config.heartbeat_timeout(),
        ));

        Self {
            config,
            registry,
            identity,
            sync,
            coordinator,
            monitor,
        }
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn identity(&self) -> &Arc<LocalNodeIdentity> {
        &self.identity
    }

    pub fn sync(&self) -> &Arc<GossipSyncProtocol> {
        &self.sync
    }

    pub fn coordinator(&self) -> &Arc<ConsensusCoordinator> {
        &self.coordinator
    }

    pub fn monitor(&self) -> &Arc<HeartbeatMonitor> {
        &self.monitor
    }

    /// Reconnection schedule from the heartbeat section
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            attempts: self.config.heartbeat.reconnect_attempts,
            base_delay: self.config.reconnect_base_delay(),
        }
    }

    /// Register this node and the statically configured peers.
    ///
    /// Conflicting or invalid self registrations are returned as is; only
    /// retryable failures go through the reconnect backoff. Peers that
    /// fail to register are logged and skipped.
    pub async fn bootstrap(&self) -> Result<()> {
        let address = self.config.node.address.as_str();
        match self.identity.register_self(address).await {
            Ok(_) => {}
            Err(e) if e.is_retryable() => {
                tracing::warn!("Self registration failed, reconnecting: {}", e);
                let identity = &self.identity;
                let reconnected = identity
                    .reconnect_with_backoff(
                        Some(|| async move { identity.register_self(address).await.map(|_| true) }),
                        self.reconnect_policy(),
                    )
                    .await;
                if !reconnected {
                    return Err(e);
                }
            }
            Err(e) => {
                tracing::error!("Self registration rejected: {}", e);
                return Err(e);
            }
        }

        for peer in &self.config.node.peers {
            if peer.id == self.config.node.id {
                tracing::debug!("Skipping peer {} (that's us)", peer.id);
                continue;
            }
            match self
                .registry
                .register(NodeRegistration::new(peer.id.clone(), peer.address.clone()))
                .await
            {
                Ok(node) => tracing::info!(node_id = %node.node_id, address = %node.address, "Peer registered"),
                Err(e) => tracing::warn!(node_id = %peer.id, "Skipping configured peer: {}", e),
            }
        }

        tracing::info!(
            node_id = %self.config.node.id,
            nodes = self.registry.list_nodes().await.len(),
            "Fleet node bootstrapped"
        );
        Ok(())
    }

    /// Run the API server and heartbeat loop until Ctrl-C
    pub async fn run(&self) -> Result<()> {
        self.bootstrap().await?;

        let monitor = Arc::clone(&self.monitor);
        let heartbeat = tokio::spawn(async move { monitor.run().await });

        let server = HttpServer::new(
            self.config.api.clone(),
            Arc::clone(&self.identity),
            Arc::clone(&self.coordinator),
            Arc::clone(&self.sync),
        );

        let result = tokio::select! {
            result = server.start() => result,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal");
                Ok(())
            }
        };

        self.monitor.stop();
        if let Err(e) = heartbeat.await {
            tracing::error!("Heartbeat task failed: {}", e);
            return Err(Error::Internal(format!("heartbeat task: {}", e)));
        }

        tracing::info!("Fleet node shutdown complete");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeerConfig;
    use crate::state::NodeStatus;
    use crate::transport::{SimConfig, SimulatedTransport};

    fn config() -> FleetConfig {
        let mut config = FleetConfig::new("node-1", "http://node-1.local:8080");
        config.consensus.history_file = None;
        config.node.peers = vec![
            PeerConfig {
                id: "node-2".into(),
                address: "http://node-2.local:8080".into(),
            },
            PeerConfig {
                id: "node-1".into(),
                address: "http://node-1.local:8080".into(),
            },
            PeerConfig {
                id: "node-3".into(),
                address: "http://node-2.local:8080".into(),
            },
        ];
        config
    }

    #[tokio::test]
    async fn test_bootstrap_registers_self_and_peers() {
        let node = FleetNode::with_transport(config(), Arc::new(SimulatedTransport::new(SimConfig::instant())));
        node.bootstrap().await.unwrap();

        let nodes = node.registry().list_nodes().await;
        let ids: Vec<&str> = nodes.iter().map(|n| n.node_id.as_str()).collect();
        // node-3 reuses node-2's address and is rejected
        assert_eq!(ids, vec!["node-1", "node-2"]);
        assert_eq!(node.identity().status().await, NodeStatus::Active);
    }

    #[tokio::test]
    async fn test_broadcast_through_wired_node() {
        let node = FleetNode::with_transport(config(), Arc::new(SimulatedTransport::new(SimConfig::instant())));
        node.bootstrap().await.unwrap();

        let record = node.coordinator().broadcast("node-1", "abcd", None).await;
        assert!(record.approved);
        assert_eq!(record.validators, vec!["node-2".to_string()]);
        assert!(node.sync().contains("abcd").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_surfaces_conflict_without_retry() {
        let node = FleetNode::with_transport(config(), Arc::new(SimulatedTransport::new(SimConfig::instant())));
        node.registry()
            .register(NodeRegistration::new("squatter", "http://node-1.local:8080"))
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        let result = node.bootstrap().await;
        assert!(matches!(result, Err(Error::Conflict { ref owner, .. }) if owner == "squatter"));
        assert_eq!(started.elapsed(), std::time::Duration::ZERO);
        assert!(node.registry().get("node-2").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_surfaces_invalid_address_without_retry() {
        let mut config = config();
        config.node.address = "not an address".into();
        let node = FleetNode::with_transport(config, Arc::new(SimulatedTransport::new(SimConfig::instant())));

        let started = tokio::time::Instant::now();
        assert!(matches!(node.bootstrap().await, Err(Error::Validation(_))));
        assert_eq!(started.elapsed(), std::time::Duration::ZERO);
        assert_eq!(node.identity().status().await, NodeStatus::Active);
        assert!(node.identity().address().await.is_none());
    }

    #[test]
    fn test_reconnect_policy_from_config() {
        let mut config = config();
        config.heartbeat.reconnect_attempts = 2;
        config.heartbeat.reconnect_base_delay_ms = 250;
        let node = FleetNode::with_transport(config, Arc::new(SimulatedTransport::new(SimConfig::instant())));
        let policy = node.reconnect_policy();
        assert_eq!(policy.attempts, 2);
        assert_eq!(policy.base_delay, std::time::Duration::from_millis(250));
    }
}
