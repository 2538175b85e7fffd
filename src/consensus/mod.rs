//! Consensus Module
//!
//! Quorum broadcast of content hashes, autonomy tracking and the bounded
//! decision history.

mod coordinator;
mod history;
mod validator;

pub use coordinator::{two_thirds_quorum, BroadcastResult, ConsensusCoordinator, CoordinatorConfig};
pub use history::{ConsensusHistory, ConsensusMode, ConsensusRecord};
pub use validator::{check_hash, MAX_HASH_LEN};
