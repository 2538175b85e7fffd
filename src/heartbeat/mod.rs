//! Heartbeat Module
//!
//! Signed liveness pings between fleet nodes.

mod ping;
mod monitor;

pub use ping::{build_signature, receive_ping, HeartbeatAck, HeartbeatPing};
pub use monitor::{CycleReport, HeartbeatMonitor};
