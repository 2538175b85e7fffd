//! HTTP Transport
//!
//! Reaches peers through their HTTP API.

use std::time::Duration;

use async_trait::async_trait;

use super::{PeerRequest, Transport, ValidationResponse};
use crate::error::TransportError;

/// Production transport backed by a shared reqwest client
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport whose requests give up after `request_timeout`
    pub fn new(request_timeout: Duration) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| crate::Error::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    fn endpoint(address: &str, request: &PeerRequest) -> String {
        let path = match request {
            PeerRequest::Validate(_) => "verify",
            PeerRequest::Heartbeat(_) => "nodes/heartbeat",
        };
        format!("{}/{}", address.trim_end_matches('/'), path)
    }
}

fn map_error(address: &str, err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(address.to_string())
    } else {
        TransportError::Connection {
            address: address.to_string(),
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, address: &str, request: &PeerRequest) -> Result<bool, TransportError> {
        let url = Self::endpoint(address, request);
        tracing::trace!("Sending {} to {}", request.type_name(), url);

        let builder = match request {
            PeerRequest::Validate(body) => self.client.post(&url).json(body),
            PeerRequest::Heartbeat(ping) => self.client.post(&url).json(ping),
        };

        let response = builder.send().await.map_err(|e| map_error(address, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Rejected {
                address: address.to_string(),
                status: status.as_u16(),
            });
        }

        match request {
            PeerRequest::Validate(_) => {
                let body: ValidationResponse =
                    response.json().await.map_err(|e| map_error(address, e))?;
                Ok(body.valid)
            }
            PeerRequest::Heartbeat(_) => Ok(true),
        }
    }
}
