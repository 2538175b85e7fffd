//! FleetQuorum Error Types

use thiserror::Error;

/// Result type alias for FleetQuorum operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single peer call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("call to {0} timed out")]
    Timeout(String),

    #[error("connection to {address} failed: {reason}")]
    Connection { address: String, reason: String },

    #[error("peer {address} answered with status {status}")]
    Rejected { address: String, status: u16 },
}

/// FleetQuorum error types
#[derive(Error, Debug)]
pub enum Error {
    // Registry errors
    #[error("Node not found: {0}")]
    NotFound(String),

    #[error("Address {address} is already registered to node {owner}")]
    Conflict { address: String, owner: String },

    #[error("Validation error: {0}")]
    Validation(String),

    // Network errors
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("Network error: {0}")]
    Network(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Configuration serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport(TransportError::Timeout(_))
                | Error::Transport(TransportError::Connection { .. })
                | Error::Network(_)
        )
    }

    /// Short machine-readable code used in API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::Conflict { .. } => "conflict",
            Error::Validation(_) => "validation",
            Error::Transport(_) | Error::Network(_) => "transport",
            Error::Config(_) | Error::ConfigParse(_) | Error::ConfigSerialize(_) => "config",
            Error::Io(_) | Error::Serialization(_) | Error::Internal(_) => "internal",
        }
    }
}
