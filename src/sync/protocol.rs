//! Gossip Sync Protocol
//!
//! Pairwise anti-entropy over the local hash ledger:
//! - Compare: which hashes both sides hold, which only one side holds
//! - Merge: pull in records a peer pushed along with its report
//! - Prune: evict local entries the peer does not report (policy permitting)
//!
//! Each exchange yields a [`SyncOutcome`] and updates the peer's overlap
//! score both here and in the registry.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::{PruningPolicy, SyncConfig};
use crate::error::Error;
use crate::state::NodeRegistry;

/// Result of one pairwise exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub peer_id: String,
    /// Hashes both sides hold
    pub matched: Vec<String>,
    /// Hashes the peer holds and we don't
    pub missing_here: Vec<String>,
    /// Hashes we held and the peer didn't report
    pub dropped: Vec<String>,
    /// Records merged into the local ledger
    pub added: Vec<String>,
    pub sync_score: f64,
    pub timestamp: DateTime<Utc>,
}

/// Inbound exchange as received from a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncUpdateRequest {
    pub peer_id: String,
    pub hashes: Vec<String>,
    #[serde(default)]
    pub records: Option<Vec<String>>,
}

/// Reply to an exchange; `request_pull` tells the peer what to send us
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncUpdateResponse {
    pub peer: String,
    pub matched: Vec<String>,
    pub missing: Vec<String>,
    pub added: Vec<String>,
    pub dropped: Vec<String>,
    pub sync_score: f64,
    pub request_pull: Vec<String>,
}

impl From<SyncOutcome> for SyncUpdateResponse {
    fn from(outcome: SyncOutcome) -> Self {
        Self {
            peer: outcome.peer_id,
            matched: outcome.matched,
            request_pull: outcome.missing_here.clone(),
            missing: outcome.missing_here,
            added: outcome.added,
            dropped: outcome.dropped,
            sync_score: outcome.sync_score,
        }
    }
}

/// Snapshot of the protocol state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub node_id: String,
    pub ledger_size: usize,
    pub sync_score: f64,
    pub history: Vec<SyncOutcome>,
}

#[derive(Default)]
struct SyncState {
    ledger: BTreeSet<String>,
    history: VecDeque<SyncOutcome>,
    peer_scores: HashMap<String, f64>,
}

impl SyncState {
    /// Mean of per-peer scores, 1.0 before the first exchange
    fn aggregate_score(&self) -> f64 {
        if self.peer_scores.is_empty() {
            return 1.0;
        }
        round3(self.peer_scores.values().sum::<f64>() / self.peer_scores.len() as f64)
    }
}

/// Owner of the local hash ledger
pub struct GossipSyncProtocol {
    node_id: String,
    registry: Arc<NodeRegistry>,
    config: SyncConfig,
    state: RwLock<SyncState>,
}

impl GossipSyncProtocol {
    pub fn new(node_id: impl Into<String>, registry: Arc<NodeRegistry>, config: SyncConfig) -> Self {
        Self {
            node_id: node_id.into(),
            registry,
            config,
            state: RwLock::new(SyncState::default()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Reconcile the local ledger against one peer's report
    pub async fn process_update(
        &self,
        peer_id: &str,
        remote_hashes: &[String],
        remote_records: Option<&[String]>,
    ) -> SyncOutcome {
        let remote: BTreeSet<String> = remote_hashes.iter().cloned().collect();

        let outcome = {
            let mut state = self.state.write().await;

            let matched: Vec<String> = state.ledger.intersection(&remote).cloned().collect();
            let missing_here: Vec<String> = remote.difference(&state.ledger).cloned().collect();
            let dropped: Vec<String> = state.ledger.difference(&remote).cloned().collect();

            let denominator = state.ledger.len().max(remote.len()).max(1);
            let score = matched.len() as f64 / denominator as f64;
            state.peer_scores.insert(peer_id.to_string(), score);

            let mut added = Vec::new();
            for record in remote_records.unwrap_or_default() {
                if state.ledger.insert(record.clone()) {
                    added.push(record.clone());
                }
            }

            // A single peer's report is enough to evict an entry.
            // TODO: require agreement from several peers before pruning.
            if self.config.pruning == PruningPolicy::SinglePeer {
                for hash in &dropped {
                    state.ledger.remove(hash);
                }
            }

            let outcome = SyncOutcome {
                peer_id: peer_id.to_string(),
                matched,
                missing_here,
                dropped,
                added,
                sync_score: round3(score),
                timestamp: Utc::now(),
            };

            state.history.push_back(outcome.clone());
            while state.history.len() > self.config.history_limit {
                state.history.pop_front();
            }

            outcome
        };

        match self.registry.update_sync_score(peer_id, outcome.sync_score).await {
            Ok(_) | Err(Error::NotFound(_)) => {}
            Err(e) => tracing::warn!(peer_id, "Failed to store sync score: {}", e),
        }

        tracing::info!(
            peer_id,
            matched = outcome.matched.len(),
            missing = outcome.missing_here.len(),
            dropped = outcome.dropped.len(),
            added = outcome.added.len(),
            sync_score = outcome.sync_score,
            "sync exchange processed"
        );

        outcome
    }

    /// Handle an exchange received over the API
    pub async fn handle_request(&self, request: &SyncUpdateRequest) -> SyncUpdateResponse {
        self.process_update(&request.peer_id, &request.hashes, request.records.as_deref())
            .await
            .into()
    }

    /// Merge confirmed records into the ledger, returning the new ones
    pub async fn update_local_ledger(&self, records: &[String]) -> Vec<String> {
        let mut state = self.state.write().await;
        records
            .iter()
            .filter(|record| state.ledger.insert((*record).clone()))
            .cloned()
            .collect()
    }

    pub async fn contains(&self, hash: &str) -> bool {
        self.state.read().await.ledger.contains(hash)
    }

    pub async fn ledger_snapshot(&self) -> Vec<String> {
        self.state.read().await.ledger.iter().cloned().collect()
    }

    pub async fn sync_score(&self) -> f64 {
        self.state.read().await.aggregate_score()
    }

    pub async fn peer_scores(&self) -> HashMap<String, f64> {
        self.state.read().await.peer_scores.clone()
    }

    /// Current ledger size, aggregate score and retained exchanges
    pub async fn status(&self) -> SyncStatus {
        let state = self.state.read().await;
        SyncStatus {
            node_id: self.node_id.clone(),
            ledger_size: state.ledger.len(),
            sync_score: state.aggregate_score(),
            history: state.history.iter().cloned().collect(),
        }
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
