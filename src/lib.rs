//! FleetQuorum - Quorum Coordination for Peer Fleets
//!
//! Keeps a set of loosely synchronized peers in agreement about which
//! content hashes the fleet accepts, and keeps each node's view of peer
//! liveness and ledger membership roughly consistent over an unreliable
//! transport.
//!
//! # Architecture
//!
//! Every process owns one [`state::NodeRegistry`]. The consensus
//! coordinator, the gossip sync protocol and the heartbeat monitor all
//! read and update peer state through it; the network is reached only
//! through the [`transport::Transport`] capability.
//!
//! # Features
//!
//! - Node registry with an active/unknown/unreachable/isolated state machine
//! - Quorum broadcast with a single resync retry and autonomy tracking
//! - Gossip ledger reconciliation with configurable pruning
//! - Signed heartbeats and reconnect with exponential backoff
//! - HTTP API and a fault-injecting simulated transport

pub mod config;
pub mod error;
pub mod state;
pub mod transport;
pub mod heartbeat;
pub mod sync;
pub mod consensus;
pub mod api;
pub mod node;

pub use config::FleetConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::FleetConfig;
    pub use crate::error::{Error, Result};
    pub use crate::state::{LocalNodeIdentity, Node, NodeRegistry, NodeStatus};
    pub use crate::consensus::{ConsensusCoordinator, ConsensusRecord};
    pub use crate::sync::GossipSyncProtocol;
    pub use crate::heartbeat::HeartbeatMonitor;
    pub use crate::transport::Transport;
    pub use crate::node::FleetNode;
}
