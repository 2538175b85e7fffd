//! Simulated Transport
//!
//! In-process transport that injects latency and dropped calls.
//! Per-address scripts override the random behaviour for deterministic runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::RwLock;

use super::{PeerRequest, Transport};
use crate::error::TransportError;

/// Fault injection parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    /// Probability in `[0, 1]` that a call is dropped
    pub drop_rate: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            min_latency_ms: 40.0,
            max_latency_ms: 250.0,
            drop_rate: 0.1,
        }
    }
}

impl SimConfig {
    /// No latency, no drops
    pub fn instant() -> Self {
        Self {
            min_latency_ms: 0.0,
            max_latency_ms: 0.0,
            drop_rate: 0.0,
        }
    }

    /// Read `SIM_LATENCY_MS_MIN`, `SIM_LATENCY_MS_MAX` and `SIM_DROP_RATE`,
    /// falling back to defaults on missing or malformed values
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let min_latency_ms = env_f64("SIM_LATENCY_MS_MIN", defaults.min_latency_ms).max(0.0);
        let max_latency_ms = env_f64("SIM_LATENCY_MS_MAX", defaults.max_latency_ms).max(min_latency_ms);
        let drop_rate = env_f64("SIM_DROP_RATE", defaults.drop_rate).clamp(0.0, 1.0);
        Self {
            min_latency_ms,
            max_latency_ms,
            drop_rate,
        }
    }
}

fn env_f64(name: &str, default: f64) -> f64 {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(name, value = %raw, "invalid simulation setting");
            default
        }),
        Err(_) => default,
    }
}

/// Scripted outcome for one address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimResponse {
    Accept,
    Reject,
    /// Never answers; the caller's timeout fires
    Hang,
    /// Fails immediately with a timeout error
    Drop,
    /// Fails immediately with a connection error
    Refuse,
}

/// Fault-injecting transport
pub struct SimulatedTransport {
    config: SimConfig,
    scripts: RwLock<HashMap<String, SimResponse>>,
    calls: AtomicU64,
}

impl SimulatedTransport {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            scripts: RwLock::new(HashMap::new()),
            calls: AtomicU64::new(0),
        }
    }

    /// Fix the outcome of every call to `address`
    pub async fn script(&self, address: impl Into<String>, response: SimResponse) {
        self.scripts.write().await.insert(address.into(), response);
    }

    /// Return `address` to random behaviour
    pub async fn unscript(&self, address: &str) {
        self.scripts.write().await.remove(address);
    }

    /// Number of calls issued so far
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn sample(&self) -> (Duration, bool) {
        let mut rng = rand::thread_rng();
        let latency_ms = if self.config.max_latency_ms > self.config.min_latency_ms {
            rng.gen_range(self.config.min_latency_ms..self.config.max_latency_ms)
        } else {
            self.config.min_latency_ms
        };
        let dropped = rng.gen::<f64>() < self.config.drop_rate;
        (Duration::from_secs_f64(latency_ms / 1000.0), dropped)
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn call(&self, address: &str, request: &PeerRequest) -> Result<bool, TransportError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let scripted = self.scripts.read().await.get(address).copied();

        if let Some(response) = scripted {
            return match response {
                SimResponse::Accept => Ok(true),
                SimResponse::Reject => Ok(false),
                SimResponse::Hang => {
                    std::future::pending::<()>().await;
                    Ok(false)
                }
                SimResponse::Drop => Err(TransportError::Timeout(address.to_string())),
                SimResponse::Refuse => Err(TransportError::Connection {
                    address: address.to_string(),
                    reason: "connection refused".to_string(),
                }),
            };
        }

        let (latency, dropped) = self.sample();
        tokio::time::sleep(latency).await;

        if dropped {
            tracing::info!(address, latency_ms = latency.as_millis() as u64, "simulated drop");
            return Err(TransportError::Timeout(address.to_string()));
        }

        tracing::debug!(
            address,
            request = request.type_name(),
            latency_ms = latency.as_millis() as u64,
            "simulated call ok"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ValidationRequest;

    fn validate() -> PeerRequest {
        PeerRequest::Validate(ValidationRequest {
            hash: "h".into(),
            origin: "o".into(),
        })
    }

    #[tokio::test]
    async fn test_scripted_responses() {
        let transport = SimulatedTransport::new(SimConfig::instant());
        transport.script("http://a", SimResponse::Reject).await;
        transport.script("http://b", SimResponse::Refuse).await;

        assert_eq!(transport.call("http://a", &validate()).await, Ok(false));
        assert!(matches!(
            transport.call("http://b", &validate()).await,
            Err(TransportError::Connection { .. })
        ));
        assert_eq!(transport.call("http://c", &validate()).await, Ok(true));
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn test_full_drop_rate_always_fails() {
        let transport = SimulatedTransport::new(SimConfig {
            drop_rate: 1.0,
            ..SimConfig::instant()
        });
        for _ in 0..5 {
            assert!(matches!(
                transport.call("http://x", &validate()).await,
                Err(TransportError::Timeout(_))
            ));
        }
    }
}
