//! Node Registry
//!
//! Tracks fleet peers, their liveness and gossip scores.
//! Every mutation replaces the stored record under the write lock and
//! hands back a snapshot, so callers never hold a reference into the table.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Error, Result};

/// Consecutive failures after which a node is considered unreachable
pub const UNREACHABLE_THRESHOLD: u32 = 3;

/// Maximum length of a node identifier
pub const MAX_NODE_ID_LEN: usize = 64;

/// Liveness status of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Node answers heartbeats and takes part in rounds
    Active,
    /// Node explicitly rejected a validation request
    Unknown,
    /// Node failed three consecutive calls
    Unreachable,
    /// Node was switched out of autonomous operation
    Isolated,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Active => write!(f, "active"),
            NodeStatus::Unknown => write!(f, "unknown"),
            NodeStatus::Unreachable => write!(f, "unreachable"),
            NodeStatus::Isolated => write!(f, "isolated"),
        }
    }
}

impl FromStr for NodeStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        // Legacy deployments still send the localized names
        match s.trim().to_ascii_lowercase().as_str() {
            "active" | "activo" => Ok(NodeStatus::Active),
            "unknown" | "inactivo" => Ok(NodeStatus::Unknown),
            "unreachable" | "desconectado" => Ok(NodeStatus::Unreachable),
            "isolated" | "aislado" => Ok(NodeStatus::Isolated),
            other => Err(Error::Validation(format!("invalid node status: {}", other))),
        }
    }
}

/// State of a single fleet peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier
    pub node_id: String,
    /// Base URL of the node
    pub address: String,
    /// Current liveness status
    pub status: NodeStatus,
    /// Time of the last successful heartbeat
    pub last_activity: Option<DateTime<Utc>>,
    /// Running average of heartbeat round-trip latency
    pub avg_latency_ms: Option<f64>,
    /// Successful heartbeats observed
    pub heartbeat_count: u64,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Last gossip overlap ratio with this peer
    pub sync_score: Option<f64>,
    /// Voting weight, read by governance outside the core
    pub reliability: f64,
}

impl Node {
    /// Create a fresh node record
    pub fn new(node_id: String, address: String, status: NodeStatus) -> Self {
        Self {
            node_id,
            address,
            status,
            last_activity: None,
            avg_latency_ms: None,
            heartbeat_count: 0,
            consecutive_failures: 0,
            sync_score: None,
            reliability: 1.0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }
}

/// Registration input as received at the boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRegistration {
    pub node_id: String,
    pub address: String,
    #[serde(default)]
    pub status: Option<String>,
}

impl NodeRegistration {
    pub fn new(node_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            address: address.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: NodeStatus) -> Self {
        self.status = Some(status.to_string());
        self
    }

    /// Validate and normalize the payload
    pub fn validate(&self) -> Result<(String, String, NodeStatus)> {
        let node_id = self.node_id.trim();
        if node_id.is_empty() || node_id.chars().count() > MAX_NODE_ID_LEN {
            return Err(Error::Validation(format!(
                "node_id must be between 1 and {} characters",
                MAX_NODE_ID_LEN
            )));
        }

        let address = normalize_address(&self.address)?;
        let status = match &self.status {
            Some(raw) => raw.parse()?,
            None => NodeStatus::Active,
        };

        Ok((node_id.to_string(), address, status))
    }
}

/// Parse an http(s) URL and strip any trailing slash
pub fn normalize_address(raw: &str) -> Result<String> {
    let url = reqwest::Url::parse(raw.trim())
        .map_err(|e| Error::Validation(format!("invalid address {:?}: {}", raw, e)))?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(Error::Validation(format!(
            "address must be an absolute http(s) URL: {}",
            raw
        )));
    }

    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// Registry summary information
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySummary {
    pub total_nodes: usize,
    pub active_nodes: usize,
    pub unknown_nodes: usize,
    pub unreachable_nodes: usize,
    pub isolated_nodes: usize,
}

/// In-memory table of fleet peers
#[derive(Default)]
pub struct NodeRegistry {
    nodes: RwLock<HashMap<String, Node>>,
}

impl NodeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or merge a node, rejecting addresses owned by another node
    pub async fn register(&self, registration: NodeRegistration) -> Result<Node> {
        let (node_id, address, status) = registration.validate()?;

        let mut nodes = self.nodes.write().await;

        if let Some(owner) = nodes
            .values()
            .find(|n| n.address == address && n.node_id != node_id)
        {
            return Err(Error::Conflict {
                address,
                owner: owner.node_id.clone(),
            });
        }

        let node = match nodes.get(&node_id) {
            Some(previous) => Node {
                address,
                status,
                ..previous.clone()
            },
            None => Node::new(node_id.clone(), address, status),
        };

        tracing::debug!(node_id = %node.node_id, address = %node.address, status = %node.status, "node registered");
        nodes.insert(node_id, node.clone());
        Ok(node)
    }

    /// Replace a node's record with the result of `f`
    async fn update<F>(&self, node_id: &str, f: F) -> Result<Node>
    where
        F: FnOnce(&Node) -> Node,
    {
        let mut nodes = self.nodes.write().await;
        let current = nodes
            .get(node_id)
            .ok_or_else(|| Error::NotFound(node_id.to_string()))?;
        let updated = f(current);
        nodes.insert(node_id.to_string(), updated.clone());
        Ok(updated)
    }

    /// Set a node's status
    pub async fn set_status(&self, node_id: &str, status: NodeStatus) -> Result<Node> {
        self.update(node_id, |node| Node {
            status,
            ..node.clone()
        })
        .await
    }

    /// Toggle isolation. Leaving isolation only reactivates isolated nodes.
    pub async fn set_isolated(&self, node_id: &str, isolated: bool) -> Result<Node> {
        self.update(node_id, |node| {
            let status = match (isolated, node.status) {
                (true, _) => NodeStatus::Isolated,
                (false, NodeStatus::Isolated) => NodeStatus::Active,
                (false, current) => current,
            };
            Node {
                status,
                ..node.clone()
            }
        })
        .await
    }

    /// Record a successful heartbeat from a node
    pub async fn record_heartbeat(
        &self,
        node_id: &str,
        latency_ms: Option<f64>,
        timestamp: DateTime<Utc>,
    ) -> Result<Node> {
        self.update(node_id, |node| {
            let avg_latency_ms = match (latency_ms, node.avg_latency_ms) {
                (Some(sample), Some(avg)) => Some(round3(
                    (avg * node.heartbeat_count as f64 + sample) / (node.heartbeat_count + 1) as f64,
                )),
                (Some(sample), None) => Some(round3(sample)),
                (None, avg) => avg,
            };

            Node {
                last_activity: Some(timestamp),
                avg_latency_ms,
                heartbeat_count: node.heartbeat_count + 1,
                consecutive_failures: 0,
                status: NodeStatus::Active,
                ..node.clone()
            }
        })
        .await
    }

    /// Count a failed call against a node
    pub async fn mark_failure(&self, node_id: &str) -> Result<Node> {
        let node = self
            .update(node_id, |node| {
                let consecutive_failures = node.consecutive_failures.saturating_add(1);
                let status = if consecutive_failures >= UNREACHABLE_THRESHOLD {
                    NodeStatus::Unreachable
                } else {
                    node.status
                };
                Node {
                    consecutive_failures,
                    status,
                    ..node.clone()
                }
            })
            .await?;

        if node.consecutive_failures == UNREACHABLE_THRESHOLD {
            tracing::warn!(node_id = %node.node_id, "node marked unreachable");
        }
        Ok(node)
    }

    /// Store the last gossip overlap ratio for a node
    pub async fn update_sync_score(&self, node_id: &str, score: f64) -> Result<Node> {
        let score = round3(score.clamp(0.0, 1.0));
        self.update(node_id, |node| Node {
            sync_score: Some(score),
            ..node.clone()
        })
        .await
    }

    /// Set a node's voting weight
    pub async fn set_reliability(&self, node_id: &str, reliability: f64) -> Result<Node> {
        if !reliability.is_finite() || reliability < 0.0 {
            return Err(Error::Validation(format!("invalid reliability: {}", reliability)));
        }
        self.update(node_id, |node| Node {
            reliability,
            ..node.clone()
        })
        .await
    }

    /// Get a node's state
    pub async fn get(&self, node_id: &str) -> Option<Node> {
        self.nodes.read().await.get(node_id).cloned()
    }

    /// Get all active nodes, optionally excluding one
    pub async fn get_active_nodes(&self, exclude: Option<&str>) -> Vec<Node> {
        let nodes = self.nodes.read().await;
        let mut active: Vec<Node> = nodes
            .values()
            .filter(|n| n.is_active() && Some(n.node_id.as_str()) != exclude)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        active
    }

    pub async fn count_active(&self) -> usize {
        self.nodes.read().await.values().filter(|n| n.is_active()).count()
    }

    /// Remove a node
    pub async fn remove(&self, node_id: &str) -> Result<Node> {
        self.nodes
            .write()
            .await
            .remove(node_id)
            .ok_or_else(|| Error::NotFound(node_id.to_string()))
    }

    /// All nodes, ordered by id
    pub async fn list_nodes(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.nodes.read().await.values().cloned().collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    pub async fn clear(&self) {
        self.nodes.write().await.clear();
    }

    /// Get registry summary
    pub async fn summary(&self) -> RegistrySummary {
        let nodes = self.nodes.read().await;
        let mut summary = RegistrySummary {
            total_nodes: nodes.len(),
            ..Default::default()
        };

        for node in nodes.values() {
            match node.status {
                NodeStatus::Active => summary.active_nodes += 1,
                NodeStatus::Unknown => summary.unknown_nodes += 1,
                NodeStatus::Unreachable => summary.unreachable_nodes += 1,
                NodeStatus::Isolated => summary.isolated_nodes += 1,
            }
        }

        summary
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn registry_with(ids: &[&str]) -> NodeRegistry {
        let registry = NodeRegistry::new();
        for id in ids {
            registry
                .register(NodeRegistration::new(*id, format!("http://{}.local", id)))
                .await
                .unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn test_register_defaults_to_active() {
        let registry = registry_with(&["node-a"]).await;
        let node = registry.get("node-a").await.unwrap();
        assert_eq!(node.status, NodeStatus::Active);
        assert_eq!(node.address, "http://node-a.local");
        assert_eq!(node.reliability, 1.0);
        assert!(node.last_activity.is_none());
    }

    #[tokio::test]
    async fn test_reregister_same_address_is_idempotent() {
        let registry = registry_with(&["node-a"]).await;
        registry.record_heartbeat("node-a", Some(10.0), Utc::now()).await.unwrap();

        let node = registry
            .register(NodeRegistration::new("node-a", "http://node-a.local/"))
            .await
            .unwrap();
        assert_eq!(node.heartbeat_count, 1);
        assert_eq!(node.avg_latency_ms, Some(10.0));
        assert_eq!(registry.list_nodes().await.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_address_conflicts() {
        let registry = registry_with(&["node-a"]).await;
        let result = registry
            .register(NodeRegistration::new("node-b", "http://node-a.local"))
            .await;
        assert!(matches!(result, Err(Error::Conflict { ref owner, .. }) if owner == "node-a"));
    }

    #[tokio::test]
    async fn test_register_validation() {
        let registry = NodeRegistry::new();
        let bad_address = registry.register(NodeRegistration::new("node-a", "not a url")).await;
        assert!(matches!(bad_address, Err(Error::Validation(_))));

        let bad_scheme = registry.register(NodeRegistration::new("node-a", "ftp://host")).await;
        assert!(matches!(bad_scheme, Err(Error::Validation(_))));

        let long_id = "x".repeat(65);
        let bad_id = registry.register(NodeRegistration::new(long_id, "http://host")).await;
        assert!(matches!(bad_id, Err(Error::Validation(_))));

        let mut payload = NodeRegistration::new("node-a", "http://host");
        payload.status = Some("sleeping".into());
        assert!(matches!(registry.register(payload).await, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_legacy_status_aliases() {
        assert_eq!("activo".parse::<NodeStatus>().unwrap(), NodeStatus::Active);
        assert_eq!("aislado".parse::<NodeStatus>().unwrap(), NodeStatus::Isolated);
        assert_eq!("desconectado".parse::<NodeStatus>().unwrap(), NodeStatus::Unreachable);
        assert_eq!("inactivo".parse::<NodeStatus>().unwrap(), NodeStatus::Unknown);
    }

    #[tokio::test]
    async fn test_three_failures_make_unreachable() {
        let registry = registry_with(&["node-a"]).await;

        let node = registry.mark_failure("node-a").await.unwrap();
        assert_eq!(node.status, NodeStatus::Active);
        registry.mark_failure("node-a").await.unwrap();
        let node = registry.mark_failure("node-a").await.unwrap();
        assert_eq!(node.status, NodeStatus::Unreachable);
        assert_eq!(node.consecutive_failures, 3);

        let node = registry.record_heartbeat("node-a", None, Utc::now()).await.unwrap();
        assert_eq!(node.status, NodeStatus::Active);
        assert_eq!(node.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_latency_running_average() {
        let registry = registry_with(&["node-a"]).await;
        registry.record_heartbeat("node-a", Some(100.0), Utc::now()).await.unwrap();
        registry.record_heartbeat("node-a", None, Utc::now()).await.unwrap();
        let node = registry.record_heartbeat("node-a", Some(40.0), Utc::now()).await.unwrap();

        // (100 * 2 + 40) / 3
        assert_eq!(node.avg_latency_ms, Some(80.0));
        assert_eq!(node.heartbeat_count, 3);
    }

    #[tokio::test]
    async fn test_isolation_does_not_resurrect_unreachable() {
        let registry = registry_with(&["node-a", "node-b"]).await;

        let node = registry.set_isolated("node-a", true).await.unwrap();
        assert_eq!(node.status, NodeStatus::Isolated);
        let node = registry.set_isolated("node-a", false).await.unwrap();
        assert_eq!(node.status, NodeStatus::Active);

        registry.set_status("node-b", NodeStatus::Unreachable).await.unwrap();
        let node = registry.set_isolated("node-b", false).await.unwrap();
        assert_eq!(node.status, NodeStatus::Unreachable);
    }

    #[tokio::test]
    async fn test_unknown_node_operations() {
        let registry = NodeRegistry::new();
        assert!(matches!(registry.mark_failure("ghost").await, Err(Error::NotFound(_))));
        assert!(matches!(
            registry.record_heartbeat("ghost", None, Utc::now()).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            registry.set_status("ghost", NodeStatus::Active).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(registry.remove("ghost").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_active_nodes_exclude_and_summary() {
        let registry = registry_with(&["a", "b", "c"]).await;
        registry.set_status("c", NodeStatus::Unknown).await.unwrap();

        let active = registry.get_active_nodes(Some("a")).await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].node_id, "b");
        assert_eq!(registry.count_active().await, 2);

        let summary = registry.summary().await;
        assert_eq!(summary.total_nodes, 3);
        assert_eq!(summary.unknown_nodes, 1);
    }

    #[tokio::test]
    async fn test_sync_score_and_reliability() {
        let registry = registry_with(&["a"]).await;
        let node = registry.update_sync_score("a", 2.0 / 3.0).await.unwrap();
        assert_eq!(node.sync_score, Some(0.667));
        let node = registry.set_reliability("a", 0.5).await.unwrap();
        assert_eq!(node.reliability, 0.5);
        assert!(registry.set_reliability("a", -1.0).await.is_err());
    }
}
