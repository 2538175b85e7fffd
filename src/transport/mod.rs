//! Transport Module
//!
//! The single capability the core needs from the network: call a peer and
//! learn whether it accepted, rejected or failed to answer.

mod http;
mod sim;

pub use http::HttpTransport;
pub use sim::{SimConfig, SimResponse, SimulatedTransport};

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::heartbeat::HeartbeatPing;

/// Request asking a peer to validate a content hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub hash: String,
    #[serde(default)]
    pub origin: String,
}

/// Validator answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResponse {
    pub valid: bool,
}

/// Payload carried by a peer call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PeerRequest {
    /// Ask the peer to validate a hash
    Validate(ValidationRequest),
    /// Liveness probe
    Heartbeat(HeartbeatPing),
}

impl PeerRequest {
    pub fn type_name(&self) -> &'static str {
        match self {
            PeerRequest::Validate(_) => "Validate",
            PeerRequest::Heartbeat(_) => "Heartbeat",
        }
    }
}

/// A way of reaching peers.
///
/// `Ok(true)` means the peer accepted, `Ok(false)` that it answered and
/// rejected. Implementations need not enforce timeouts themselves; callers
/// wrap every call with [`call_with_timeout`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, address: &str, request: &PeerRequest) -> Result<bool, TransportError>;
}

/// Issue a call bounded by `limit`
pub async fn call_with_timeout(
    transport: &dyn Transport,
    address: &str,
    request: &PeerRequest,
    limit: Duration,
) -> Result<bool, TransportError> {
    match tokio::time::timeout(limit, transport.call(address, request)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(address.to_string())),
    }
}
