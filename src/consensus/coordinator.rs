//! Consensus Coordinator
//!
//! Broadcasts a hash to every active peer, counts the answers against a
//! quorum and keeps track of whether this node is still fit to act
//! autonomously.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::history::{ConsensusHistory, ConsensusMode, ConsensusRecord};
use crate::error::{Error, Result};
use crate::state::{LocalNodeIdentity, Node, NodeRegistry, NodeStatus};
use crate::sync::GossipSyncProtocol;
use crate::transport::{call_with_timeout, PeerRequest, Transport, ValidationRequest};

/// Coordinator settings
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Per-validator call timeout
    pub call_timeout: Duration,
    /// Quorum used when a broadcast does not supply one
    pub default_quorum: Option<usize>,
    /// Failed rounds tolerated before isolation
    pub isolation_threshold: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
            default_quorum: None,
            isolation_threshold: 3,
        }
    }
}

/// Broadcast outcome as reported to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastResult {
    pub approved: bool,
    pub validators: Vec<String>,
    pub failed: Vec<String>,
    pub required: usize,
    pub total: usize,
}

impl From<&ConsensusRecord> for BroadcastResult {
    fn from(record: &ConsensusRecord) -> Self {
        Self {
            approved: record.approved,
            validators: record.validators.clone(),
            failed: record.failed.clone(),
            required: record.required,
            total: record.total,
        }
    }
}

/// `ceil(2 * total / 3)`
pub fn two_thirds_quorum(total: usize) -> usize {
    (2 * total).div_ceil(3)
}

/// Answer of one validator within a round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Accepted,
    Rejected,
    Failed,
    /// Left the registry while the call was in flight
    Removed,
}

#[derive(Debug, Clone, Default)]
struct RoundOutcome {
    validators: Vec<String>,
    failed: Vec<String>,
    required: usize,
    total: usize,
    approved: bool,
}

impl RoundOutcome {
    /// Fewer than two thirds of the candidates accepted
    fn needs_retry(&self) -> bool {
        self.total > 0 && self.validators.len() * 3 < self.total * 2
    }
}

#[derive(Debug, Clone, Copy)]
struct Autonomy {
    failure_streak: u32,
    mode: ConsensusMode,
}

/// Orchestrates broadcast-and-decide cycles
pub struct ConsensusCoordinator {
    identity: Arc<LocalNodeIdentity>,
    registry: Arc<NodeRegistry>,
    transport: Arc<dyn Transport>,
    sync: Arc<GossipSyncProtocol>,
    config: CoordinatorConfig,
    autonomy: RwLock<Autonomy>,
    history: ConsensusHistory,
}

impl ConsensusCoordinator {
    pub fn new(
        identity: Arc<LocalNodeIdentity>,
        transport: Arc<dyn Transport>,
        sync: Arc<GossipSyncProtocol>,
        config: CoordinatorConfig,
        history: ConsensusHistory,
    ) -> Self {
        let registry = identity.registry().clone();
        Self {
            identity,
            registry,
            transport,
            sync,
            config,
            autonomy: RwLock::new(Autonomy {
                failure_streak: 0,
                mode: ConsensusMode::Autonomous,
            }),
            history,
        }
    }

    pub async fn mode(&self) -> ConsensusMode {
        self.autonomy.read().await.mode
    }

    pub async fn failure_streak(&self) -> u32 {
        self.autonomy.read().await.failure_streak
    }

    /// Most recent records, oldest first
    pub async fn history(&self, limit: Option<usize>) -> Vec<ConsensusRecord> {
        self.history.recent(limit).await
    }

    /// Ask every active peer except `origin` to validate `hash`.
    ///
    /// Peer failures are folded into the record; this never errors.
    pub async fn broadcast(&self, origin: &str, hash: &str, quorum: Option<usize>) -> ConsensusRecord {
        let quorum = quorum.or(self.config.default_quorum);

        let mut outcome = self.run_round(origin, hash, quorum).await;
        let mut attempts = 1;

        if outcome.needs_retry() {
            self.resync().await;
            let retry = self.run_round(origin, hash, Some(outcome.required)).await;
            attempts = 2;
            if retry.validators.len() >= outcome.validators.len() {
                outcome = retry;
            }
        }

        let mode = self.update_autonomy(outcome.approved).await;
        if outcome.approved {
            self.sync.update_local_ledger(&[hash.to_string()]).await;
        }

        let record = ConsensusRecord {
            hash: hash.to_string(),
            approved: outcome.approved,
            validators: outcome.validators,
            failed: outcome.failed,
            required: outcome.required,
            total: outcome.total,
            mode,
            attempts,
            sync_score: self.sync.sync_score().await,
            timestamp: Utc::now(),
        };

        tracing::info!(
            hash = %record.hash,
            approved = record.approved,
            ok = record.validators.len(),
            failed = record.failed.len(),
            required = record.required,
            total = record.total,
            attempts = record.attempts,
            mode = %record.mode,
            "consensus result"
        );

        self.history.append(record.clone()).await;
        record
    }

    /// Run one round against the current candidate set.
    ///
    /// `required_override` is honoured except when there are no
    /// candidates, in which case nothing can be approved.
    async fn run_round(&self, origin: &str, hash: &str, required_override: Option<usize>) -> RoundOutcome {
        let candidates = self.registry.get_active_nodes(Some(origin)).await;
        let total = candidates.len();
        if total == 0 {
            return RoundOutcome::default();
        }
        let required = required_override.unwrap_or_else(|| two_thirds_quorum(total));

        let request = PeerRequest::Validate(ValidationRequest {
            hash: hash.to_string(),
            origin: origin.to_string(),
        });

        let verdicts = futures::future::join_all(
            candidates.iter().map(|node| self.ask_validator(node, &request)),
        )
        .await;

        let mut outcome = RoundOutcome {
            required,
            ..Default::default()
        };
        for (node, verdict) in candidates.into_iter().zip(verdicts) {
            match verdict {
                Verdict::Accepted => outcome.validators.push(node.node_id),
                Verdict::Rejected | Verdict::Failed => outcome.failed.push(node.node_id),
                Verdict::Removed => {}
            }
        }
        outcome.total = outcome.validators.len() + outcome.failed.len();
        outcome.approved = outcome.validators.len() >= required && required > 0;
        outcome
    }

    async fn ask_validator(&self, node: &Node, request: &PeerRequest) -> Verdict {
        let result =
            call_with_timeout(self.transport.as_ref(), &node.address, request, self.config.call_timeout).await;

        let (verdict, update) = match result {
            Ok(true) => (
                Verdict::Accepted,
                self.registry.set_status(&node.node_id, NodeStatus::Active).await,
            ),
            // The peer answered, so this is not a liveness failure
            Ok(false) => (
                Verdict::Rejected,
                self.registry.set_status(&node.node_id, NodeStatus::Unknown).await,
            ),
            Err(e) => {
                tracing::warn!(node_id = %node.node_id, address = %node.address, "Validator call failed: {}", e);
                (Verdict::Failed, self.registry.mark_failure(&node.node_id).await)
            }
        };

        match update {
            Ok(_) => verdict,
            Err(Error::NotFound(_)) => {
                tracing::debug!(node_id = %node.node_id, "Validator removed during round");
                Verdict::Removed
            }
            Err(e) => {
                tracing::error!(node_id = %node.node_id, "Failed to update registry: {}", e);
                verdict
            }
        }
    }

    /// Pull-only resync through the gossip protocol
    async fn resync(&self) {
        self.sync.update_local_ledger(&[]).await;
        let status = self.sync.status().await;
        tracing::info!(
            ledger_size = status.ledger_size,
            sync_score = status.sync_score,
            "consensus resync"
        );
    }

    async fn update_autonomy(&self, approved: bool) -> ConsensusMode {
        let (mode, switched) = {
            let mut autonomy = self.autonomy.write().await;
            let before = autonomy.mode;
            if approved {
                autonomy.failure_streak = 0;
                autonomy.mode = ConsensusMode::Autonomous;
            } else {
                autonomy.failure_streak += 1;
                if autonomy.failure_streak > self.config.isolation_threshold {
                    autonomy.mode = ConsensusMode::Isolated;
                }
            }
            (autonomy.mode, before != autonomy.mode)
        };

        if approved {
            self.identity.set_isolated(false).await;
        } else if mode == ConsensusMode::Isolated {
            self.identity.set_isolated(true).await;
        }

        if switched {
            tracing::warn!(node_id = %self.identity.node_id(), mode = %mode, "consensus mode changed");
        }
        mode
    }

    /// Answer a validation request from a peer
    pub async fn answer_validation(&self, request: &ValidationRequest) -> Result<bool> {
        if self.mode().await == ConsensusMode::Isolated {
            return Ok(false);
        }
        super::validator::check_hash(&request.hash)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::error::TransportError;
    use crate::state::NodeRegistration;
    use crate::transport::{SimConfig, SimResponse, SimulatedTransport};
    use async_trait::async_trait;

    struct Fleet {
        identity: Arc<LocalNodeIdentity>,
        transport: Arc<SimulatedTransport>,
        coordinator: ConsensusCoordinator,
    }

    fn address(id: &str) -> String {
        format!("http://{}.local", id)
    }

    /// Origin plus `peers` validators, all accepting unless scripted
    async fn fleet(peers: usize) -> Fleet {
        let registry = Arc::new(NodeRegistry::new());
        let identity = Arc::new(LocalNodeIdentity::new("origin", registry.clone()));
        identity.register_self(&address("origin")).await.unwrap();
        for i in 1..=peers {
            let id = format!("validator-{}", i);
            registry.register(NodeRegistration::new(id.clone(), address(&id))).await.unwrap();
        }

        let transport = Arc::new(SimulatedTransport::new(SimConfig::instant()));
        let sync = Arc::new(GossipSyncProtocol::new("origin", registry, SyncConfig::default()));
        let coordinator = ConsensusCoordinator::new(
            identity.clone(),
            transport.clone(),
            sync,
            CoordinatorConfig {
                call_timeout: Duration::from_millis(200),
                ..Default::default()
            },
            ConsensusHistory::in_memory(200),
        );

        Fleet {
            identity,
            transport,
            coordinator,
        }
    }

    #[test]
    fn test_two_thirds_quorum() {
        assert_eq!(two_thirds_quorum(0), 0);
        assert_eq!(two_thirds_quorum(1), 1);
        assert_eq!(two_thirds_quorum(3), 2);
        assert_eq!(two_thirds_quorum(4), 3);
        assert_eq!(two_thirds_quorum(5), 4);
        for total in 1..50 {
            assert!(two_thirds_quorum(total) > 0);
        }
    }

    #[tokio::test]
    async fn test_three_of_four_approves() {
        let fleet = fleet(4).await;
        fleet.transport.script(address("validator-4"), SimResponse::Reject).await;

        let record = fleet.coordinator.broadcast("origin", "hash-ok", None).await;
        assert_eq!(record.total, 4);
        assert_eq!(record.required, 3);
        assert!(record.approved);
        assert_eq!(record.validators.len(), 3);
        assert_eq!(record.failed, vec!["validator-4".to_string()]);
        assert_eq!(record.attempts, 1);

        let node = fleet.identity.registry().get("validator-4").await.unwrap();
        assert_eq!(node.status, NodeStatus::Unknown);
        assert_eq!(node.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_two_of_four_rejects_after_retry() {
        let fleet = fleet(4).await;
        fleet.transport.script(address("validator-3"), SimResponse::Reject).await;
        fleet.transport.script(address("validator-4"), SimResponse::Reject).await;

        let record = fleet.coordinator.broadcast("origin", "hash-low", None).await;
        assert!(!record.approved);
        assert_eq!(record.required, 3);
        assert_eq!(record.attempts, 2);
        // Rejecting peers dropped to unknown, so the retry only reached two
        assert_eq!(record.validators.len(), 2);
        assert!(record.failed.is_empty());
        assert_eq!(record.total, 2);
        assert_eq!(fleet.coordinator.failure_streak().await, 1);
    }

    #[tokio::test]
    async fn test_no_candidates_never_approves() {
        let fleet = fleet(0).await;
        let record = fleet.coordinator.broadcast("origin", "hash-none", None).await;
        assert!(!record.approved);
        assert_eq!(record.total, 0);
        assert_eq!(record.required, 0);
        assert_eq!(record.attempts, 1);

        let record = fleet.coordinator.broadcast("origin", "hash-none", Some(2)).await;
        assert!(!record.approved);
        assert_eq!(record.required, 0);
    }

    #[tokio::test]
    async fn test_explicit_quorum() {
        let fleet = fleet(3).await;
        fleet.transport.script(address("validator-2"), SimResponse::Reject).await;
        fleet.transport.script(address("validator-3"), SimResponse::Reject).await;

        let record = fleet.coordinator.broadcast("origin", "hash-q", Some(1)).await;
        assert!(record.approved);
        assert_eq!(record.required, 1);
        // 1/3 accepted is below two thirds, so the retry still runs
        assert_eq!(record.attempts, 2);
    }

    #[tokio::test]
    async fn test_zero_quorum_never_approves() {
        let fleet = fleet(3).await;
        let record = fleet.coordinator.broadcast("origin", "hash-zero", Some(0)).await;
        assert!(!record.approved);
        assert_eq!(record.required, 0);
        assert_eq!(record.total, 3);
        assert_eq!(record.validators.len(), 3);
        assert_eq!(record.attempts, 1);
        assert!(!fleet.coordinator.sync.contains("hash-zero").await);
        assert_eq!(fleet.coordinator.failure_streak().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_validators_bounded_by_call_timeout() {
        let fleet = fleet(6).await;
        for i in 1..=6 {
            fleet.transport.script(address(&format!("validator-{}", i)), SimResponse::Hang).await;
        }

        let started = tokio::time::Instant::now();
        let record = fleet.coordinator.broadcast("origin", "hash-slow", None).await;
        // Calls run concurrently: one timeout per round, two rounds at most
        assert!(started.elapsed() <= Duration::from_millis(2 * 200));
        assert_eq!(record.attempts, 2);
        assert_eq!(record.failed.len(), 6);
        assert!(!record.approved);
    }

    #[tokio::test]
    async fn test_failed_round_keeps_external_isolation() {
        let fleet = fleet(2).await;
        fleet.transport.script(address("validator-1"), SimResponse::Refuse).await;
        fleet.transport.script(address("validator-2"), SimResponse::Refuse).await;
        fleet.identity.set_isolated(true).await;

        let record = fleet.coordinator.broadcast("origin", "hash-iso", None).await;
        assert!(!record.approved);
        assert_eq!(record.mode, ConsensusMode::Autonomous);
        assert_eq!(fleet.identity.status().await, NodeStatus::Isolated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_count_toward_unreachable() {
        let fleet = fleet(4).await;
        fleet.transport.script(address("validator-4"), SimResponse::Hang).await;

        for round in 1..=3 {
            let record = fleet.coordinator.broadcast("origin", &format!("hash-{}", round), None).await;
            assert!(record.approved);
            assert_eq!(record.validators.len(), 3);
            assert_eq!(record.failed, vec!["validator-4".to_string()]);
            assert_eq!(record.attempts, 1);
        }

        let node = fleet.identity.registry().get("validator-4").await.unwrap();
        assert_eq!(node.status, NodeStatus::Unreachable);

        let record = fleet.coordinator.broadcast("origin", "hash-4", None).await;
        assert_eq!(record.total, 3);
        assert_eq!(record.required, 2);
        assert!(record.failed.is_empty());
    }

    #[tokio::test]
    async fn test_repeated_failures_isolate_local_node() {
        let fleet = fleet(2).await;
        fleet.transport.script(address("validator-1"), SimResponse::Refuse).await;
        fleet.transport.script(address("validator-2"), SimResponse::Refuse).await;

        for _ in 0..3 {
            fleet.coordinator.broadcast("origin", "hash-x", None).await;
        }
        assert_eq!(fleet.coordinator.mode().await, ConsensusMode::Autonomous);

        let record = fleet.coordinator.broadcast("origin", "hash-x", None).await;
        assert_eq!(record.mode, ConsensusMode::Isolated);
        assert_eq!(fleet.coordinator.failure_streak().await, 4);
        let me = fleet.identity.registry().get("origin").await.unwrap();
        assert_eq!(me.status, NodeStatus::Isolated);

        // Recovery once peers come back
        fleet.identity.registry().record_heartbeat("validator-1", None, Utc::now()).await.unwrap();
        fleet.identity.registry().record_heartbeat("validator-2", None, Utc::now()).await.unwrap();
        fleet.transport.unscript(&address("validator-1")).await;
        fleet.transport.unscript(&address("validator-2")).await;

        let record = fleet.coordinator.broadcast("origin", "hash-y", None).await;
        assert!(record.approved);
        assert_eq!(record.mode, ConsensusMode::Autonomous);
        assert_eq!(fleet.coordinator.failure_streak().await, 0);
        let me = fleet.identity.registry().get("origin").await.unwrap();
        assert_eq!(me.status, NodeStatus::Active);
    }

    #[tokio::test]
    async fn test_history_and_ledger_updated() {
        let fleet = fleet(1).await;
        fleet.coordinator.broadcast("origin", "hash-a", None).await;
        fleet.coordinator.broadcast("origin", "hash-b", None).await;

        let history = fleet.coordinator.history(None).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].hash, "hash-b");
        assert_eq!(BroadcastResult::from(&history[0]).validators, vec!["validator-1".to_string()]);
        assert!(fleet.coordinator.sync.contains("hash-a").await);
    }

    /// Removes the peer it is asked about before answering
    struct VanishingTransport {
        registry: Arc<NodeRegistry>,
    }

    #[async_trait]
    impl Transport for VanishingTransport {
        async fn call(&self, address: &str, _request: &PeerRequest) -> std::result::Result<bool, TransportError> {
            if address.contains("validator-2") {
                let _ = self.registry.remove("validator-2").await;
            }
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_peer_removed_mid_round_is_excluded() {
        let registry = Arc::new(NodeRegistry::new());
        let identity = Arc::new(LocalNodeIdentity::new("origin", registry.clone()));
        identity.register_self(&address("origin")).await.unwrap();
        for id in ["validator-1", "validator-2", "validator-3"] {
            registry.register(NodeRegistration::new(id, address(id))).await.unwrap();
        }
        let coordinator = ConsensusCoordinator::new(
            identity,
            Arc::new(VanishingTransport {
                registry: registry.clone(),
            }),
            Arc::new(GossipSyncProtocol::new("origin", registry, SyncConfig::default())),
            CoordinatorConfig::default(),
            ConsensusHistory::in_memory(10),
        );

        let record = coordinator.broadcast("origin", "hash-z", None).await;
        assert_eq!(record.validators, vec!["validator-1".to_string(), "validator-3".to_string()]);
        assert!(record.failed.is_empty());
        assert_eq!(record.total, 2);
        assert_eq!(record.required, 2);
        assert!(record.approved);
    }

    #[tokio::test]
    async fn test_answer_validation() {
        let fleet = fleet(1).await;
        let good = ValidationRequest {
            hash: "ab".repeat(32),
            origin: "validator-1".into(),
        };
        assert!(fleet.coordinator.answer_validation(&good).await.unwrap());

        let bad = ValidationRequest {
            hash: "not-a-hash".into(),
            origin: "validator-1".into(),
        };
        assert!(matches!(
            fleet.coordinator.answer_validation(&bad).await,
            Err(Error::Validation(_))
        ));
    }
}
