//! Sync Module
//!
//! Gossip reconciliation of the local hash ledger against peers.

mod protocol;

pub use protocol::{
    GossipSyncProtocol, SyncOutcome, SyncStatus, SyncUpdateRequest, SyncUpdateResponse,
};
