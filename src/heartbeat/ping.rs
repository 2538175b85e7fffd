//! Heartbeat Ping
//!
//! Signed liveness payload and the receiving side of a ping.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::state::NodeRegistry;

/// SHA-256 over `node_id:timestamp`, lowercase hex
pub fn build_signature(node_id: &str, timestamp: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(node_id.as_bytes());
    hasher.update(b":");
    hasher.update(timestamp.as_bytes());
    hex::encode(hasher.finalize())
}

/// Liveness probe sent to peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatPing {
    pub node_id: String,
    /// RFC 3339 timestamp, signed verbatim
    pub timestamp: String,
    pub signature: String,
}

impl HeartbeatPing {
    /// Build a ping for `node_id` stamped with the current time
    pub fn new(node_id: &str) -> Self {
        Self::at(node_id, Utc::now())
    }

    pub fn at(node_id: &str, at: DateTime<Utc>) -> Self {
        let timestamp = at.to_rfc3339_opts(SecondsFormat::Micros, true);
        let signature = build_signature(node_id, &timestamp);
        Self {
            node_id: node_id.to_string(),
            timestamp,
            signature,
        }
    }

    /// Check the timestamp format and the signature
    pub fn verify(&self) -> Result<DateTime<Utc>> {
        let sent_at = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| Error::Validation(format!("invalid heartbeat timestamp: {}", e)))?
            .with_timezone(&Utc);

        if build_signature(&self.node_id, &self.timestamp) != self.signature {
            return Err(Error::Validation("heartbeat signature mismatch".into()));
        }

        Ok(sent_at)
    }
}

/// Acknowledgement returned for an accepted ping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatAck {
    pub status: String,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub latency_ms: Option<f64>,
}

/// Handle an inbound ping: verify it and record the sender's activity
pub async fn receive_ping(registry: &NodeRegistry, ping: &HeartbeatPing) -> Result<HeartbeatAck> {
    ping.verify()?;
    let now = Utc::now();
    registry.record_heartbeat(&ping.node_id, None, now).await?;
    tracing::trace!(node_id = %ping.node_id, "heartbeat received");

    Ok(HeartbeatAck {
        status: "ack".to_string(),
        received_at: now,
        latency_ms: None,
    })
}
