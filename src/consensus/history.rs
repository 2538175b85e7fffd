//! Consensus History
//!
//! Bounded record of resolved broadcasts, mirrored to a JSON file on a
//! best-effort basis.

use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Autonomy mode of the local coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusMode {
    Autonomous,
    Isolated,
}

impl std::fmt::Display for ConsensusMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsensusMode::Autonomous => write!(f, "autonomous"),
            ConsensusMode::Isolated => write!(f, "isolated"),
        }
    }
}

/// One resolved broadcast. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusRecord {
    pub hash: String,
    pub approved: bool,
    /// Nodes that accepted
    pub validators: Vec<String>,
    /// Nodes that rejected, timed out or errored
    pub failed: Vec<String>,
    pub required: usize,
    pub total: usize,
    pub mode: ConsensusMode,
    /// Rounds run: 1, or 2 when a resync retry happened
    pub attempts: u8,
    /// Aggregate gossip score when the record was written
    pub sync_score: f64,
    pub timestamp: DateTime<Utc>,
}

/// Bounded, append-only consensus history
pub struct ConsensusHistory {
    entries: Mutex<VecDeque<ConsensusRecord>>,
    limit: usize,
    path: Option<PathBuf>,
}

impl ConsensusHistory {
    /// Memory-only history
    pub fn in_memory(limit: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            limit: limit.max(1),
            path: None,
        }
    }

    /// History backed by `path`. A missing or unreadable file starts empty.
    pub fn load(path: PathBuf, limit: usize) -> Self {
        let mut entries: VecDeque<ConsensusRecord> = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Vec<ConsensusRecord>>(&raw) {
                Ok(records) => records.into(),
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Ignoring corrupt consensus history: {}", e);
                    VecDeque::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => VecDeque::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), "Could not read consensus history: {}", e);
                VecDeque::new()
            }
        };

        let limit = limit.max(1);
        while entries.len() > limit {
            entries.pop_front();
        }

        Self {
            entries: Mutex::new(entries),
            limit,
            path: Some(path),
        }
    }

    /// Append a record, trim to the window and persist
    pub async fn append(&self, record: ConsensusRecord) {
        // The lock is held through the file write so appends land in order
        let mut entries = self.entries.lock().await;
        entries.push_back(record);
        while entries.len() > self.limit {
            entries.pop_front();
        }

        if let Some(path) = &self.path {
            let result = match serde_json::to_vec_pretty(&*entries) {
                Ok(bytes) => persist(path, &bytes).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = result {
                tracing::warn!(path = %path.display(), "Failed to persist consensus history: {}", e);
            }
        }
    }

    /// Most recent `limit` records, oldest first
    pub async fn recent(&self, limit: Option<usize>) -> Vec<ConsensusRecord> {
        let entries = self.entries.lock().await;
        let skip = limit.map_or(0, |n| entries.len().saturating_sub(n));
        entries.iter().skip(skip).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

async fn persist(path: &std::path::Path, bytes: &[u8]) -> crate::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
