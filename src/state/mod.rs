//! State Management Module
//!
//! Peer registry with its liveness state machine, and the local
//! node's own identity.

mod registry;
mod identity;

pub use registry::{
    normalize_address, Node, NodeRegistration, NodeRegistry, NodeStatus, RegistrySummary,
    MAX_NODE_ID_LEN, UNREACHABLE_THRESHOLD,
};
pub use identity::{LocalNodeIdentity, Pulse, ReconnectPolicy};
