//! HTTP API Module
//!
//! Provides a REST API for registration, heartbeats, consensus and sync.

mod http;

pub use http::{
    AppState, BroadcastRequest, ErrorResponse, HealthResponse, HistoryResponse, HttpServer,
    NodesResponse,
};
