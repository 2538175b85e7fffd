//! FleetQuorum Configuration
//!
//! This module provides configuration structures for a fleet node:
//! identity, heartbeat cadence, consensus rounds and gossip sync.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable that overrides `node.id`
pub const NODE_ID_ENV: &str = "FLEETQUORUM_NODE_ID";

/// Main FleetQuorum configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Heartbeat and reconnection configuration
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Consensus round configuration
    #[serde(default)]
    pub consensus: ConsensusConfig,

    /// Gossip sync configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier (generated when left empty)
    #[serde(default)]
    pub id: String,

    /// URL other nodes use to reach this node
    pub address: String,

    /// Data directory for consensus history
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Peers to register at startup
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

/// A statically configured peer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: String,
    pub address: String,
}

/// Heartbeat configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval between heartbeat cycles in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub interval_ms: u64,

    /// Per-ping timeout in milliseconds
    #[serde(default = "default_call_timeout_ms")]
    pub timeout_ms: u64,

    /// Reconnection attempts before giving up
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,

    /// Base reconnection delay in milliseconds (doubled per attempt)
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
}

/// Consensus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Per-validator call timeout in milliseconds
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Fixed quorum (unset = ceil(2/3) of active peers)
    #[serde(default)]
    pub quorum: Option<usize>,

    /// Failed rounds tolerated before switching to isolated mode
    #[serde(default = "default_isolation_threshold")]
    pub isolation_threshold: u32,

    /// Number of consensus records retained
    #[serde(default = "default_consensus_history_limit")]
    pub history_limit: usize,

    /// History file name inside the data directory (unset = memory only)
    #[serde(default = "default_history_file")]
    pub history_file: Option<String>,
}

/// Ledger pruning policy applied on divergence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruningPolicy {
    /// Entries missing from a single peer's report are evicted locally
    SinglePeer,
    /// Local entries are never evicted by an exchange
    Disabled,
}

/// Gossip sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Number of exchanges retained
    #[serde(default = "default_sync_history_limit")]
    pub history_limit: usize,

    /// Divergence pruning policy
    #[serde(default = "default_pruning")]
    pub pruning: PruningPolicy,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable HTTP API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP API bind address
    #[serde(default = "default_api_address")]
    pub bind_address: String,

    /// Enable CORS
    #[serde(default)]
    pub cors_enabled: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/fleetquorum")
}

fn default_heartbeat_interval_ms() -> u64 {
    15_000
}

fn default_call_timeout_ms() -> u64 {
    5_000
}

fn default_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}

fn default_isolation_threshold() -> u32 {
    3
}

fn default_consensus_history_limit() -> usize {
    200
}

fn default_history_file() -> Option<String> {
    Some("consensus_history.json".to_string())
}

fn default_sync_history_limit() -> usize {
    500
}

fn default_pruning() -> PruningPolicy {
    PruningPolicy::SinglePeer
}

fn default_true() -> bool {
    true
}

fn default_api_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval_ms(),
            timeout_ms: default_call_timeout_ms(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
        }
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout_ms(),
            quorum: None,
            isolation_threshold: default_isolation_threshold(),
            history_limit: default_consensus_history_limit(),
            history_file: default_history_file(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            history_limit: default_sync_history_limit(),
            pruning: default_pruning(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_api_address(),
            cors_enabled: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl FleetConfig {
    /// Build a minimal configuration for a node reachable at `address`
    pub fn new(node_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            node: NodeConfig {
                id: node_id.into(),
                address: address.into(),
                data_dir: default_data_dir(),
                peers: Vec::new(),
            },
            heartbeat: HeartbeatConfig::default(),
            consensus: ConsensusConfig::default(),
            sync: SyncConfig::default(),
            api: ApiConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let mut config: FleetConfig = toml::from_str(content)?;
        config.apply_env_overrides();
        config.ensure_node_id();
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var(NODE_ID_ENV) {
            if !id.trim().is_empty() {
                self.node.id = id.trim().to_string();
            }
        }
    }

    /// Generate a node id when none was configured
    pub fn ensure_node_id(&mut self) {
        if self.node.id.trim().is_empty() {
            self.node.id = uuid::Uuid::new_v4().to_string();
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.id.is_empty() || self.node.id.len() > 64 {
            return Err(crate::Error::Config(
                "node.id must be between 1 and 64 characters".into(),
            ));
        }

        if self.node.address.is_empty() {
            return Err(crate::Error::Config("node.address cannot be empty".into()));
        }

        if self.heartbeat.interval_ms == 0 {
            return Err(crate::Error::Config(
                "heartbeat.interval_ms must be greater than zero".into(),
            ));
        }

        if self.consensus.call_timeout_ms == 0 || self.heartbeat.timeout_ms == 0 {
            return Err(crate::Error::Config("call timeouts must be greater than zero".into()));
        }

        if self.consensus.quorum == Some(0) {
            return Err(crate::Error::Config("consensus.quorum cannot be zero".into()));
        }

        if self.consensus.history_limit == 0 || self.sync.history_limit == 0 {
            return Err(crate::Error::Config("history limits must be greater than zero".into()));
        }

        Ok(())
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &PathBuf {
        &self.node.data_dir
    }

    /// Path of the persisted consensus history, if enabled
    pub fn history_path(&self) -> Option<PathBuf> {
        self.consensus
            .history_file
            .as_ref()
            .map(|name| self.node.data_dir.join(name))
    }

    /// Get heartbeat interval as Duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat.interval_ms)
    }

    /// Get heartbeat ping timeout as Duration
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat.timeout_ms)
    }

    /// Get base reconnection delay as Duration
    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.heartbeat.reconnect_base_delay_ms)
    }

    /// Get validator call timeout as Duration
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.consensus.call_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[node]
id = "node-1"
address = "http://node-1.local:8080"
data_dir = "/tmp/fleetquorum"

[[node.peers]]
id = "node-2"
address = "http://node-2.local:8080"

[heartbeat]
interval_ms = 1000

[consensus]
quorum = 2

[sync]
pruning = "disabled"
"#;

        let config = FleetConfig::from_str(toml).unwrap();
        assert_eq!(config.node.id, "node-1");
        assert_eq!(config.node.peers.len(), 1);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(1));
        assert_eq!(config.consensus.quorum, Some(2));
        assert_eq!(config.sync.pruning, PruningPolicy::Disabled);
        assert_eq!(config.consensus.history_limit, 200);
    }

    #[test]
    fn test_missing_node_id_is_generated() {
        let toml = r#"
[node]
address = "http://node.local"
"#;
        let config = FleetConfig::from_str(toml).unwrap();
        assert!(uuid::Uuid::parse_str(&config.node.id).is_ok());
    }

    #[test]
    fn test_zero_quorum_rejected() {
        let mut config = FleetConfig::new("node-1", "http://node-1.local");
        config.consensus.quorum = Some(0);
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_roundtrip_toml() {
        let config = FleetConfig::new("node-1", "http://node-1.local");
        let rendered = config.to_toml().unwrap();
        let parsed = FleetConfig::from_str(&rendered).unwrap();
        assert_eq!(parsed.node.address, "http://node-1.local");
        assert_eq!(
            parsed.history_path(),
            Some(PathBuf::from("/var/lib/fleetquorum/consensus_history.json"))
        );
    }
}
