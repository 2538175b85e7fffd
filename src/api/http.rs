//! HTTP API Server
//!
//! Boundary routes for registration, heartbeats, validation, consensus
//! broadcast and gossip sync.

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::ApiConfig;
use crate::consensus::{check_hash, BroadcastResult, ConsensusCoordinator, ConsensusMode, ConsensusRecord};
use crate::error::{Error, Result};
use crate::heartbeat::{receive_ping, HeartbeatAck, HeartbeatPing};
use crate::state::{LocalNodeIdentity, Node, NodeRegistration, NodeRegistry, NodeStatus, RegistrySummary};
use crate::sync::{GossipSyncProtocol, SyncStatus, SyncUpdateRequest, SyncUpdateResponse};
use crate::transport::{ValidationRequest, ValidationResponse};

/// Shared application state
pub struct AppState {
    pub identity: Arc<LocalNodeIdentity>,
    pub registry: Arc<NodeRegistry>,
    pub coordinator: Arc<ConsensusCoordinator>,
    pub sync: Arc<GossipSyncProtocol>,
    pub started_at: DateTime<Utc>,
}

/// HTTP API server
pub struct HttpServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(
        config: ApiConfig,
        identity: Arc<LocalNodeIdentity>,
        coordinator: Arc<ConsensusCoordinator>,
        sync: Arc<GossipSyncProtocol>,
    ) -> Self {
        let registry = identity.registry().clone();
        let state = Arc::new(AppState {
            identity,
            registry,
            coordinator,
            sync,
            started_at: Utc::now(),
        });

        Self { config, state }
    }

    /// Get the state for sharing with other components
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Create the router
    pub fn router(&self) -> Router {
        let router = Router::new()
            // Registry
            .route("/nodes", get(handle_list_nodes))
            .route("/nodes/register", post(handle_register))
            .route("/nodes/heartbeat", post(handle_heartbeat))
            .route("/nodes/:node_id", delete(handle_remove_node))
            // Validation and consensus
            .route("/verify", post(handle_verify))
            .route("/consensus/broadcast", post(handle_broadcast))
            .route("/consensus/history", get(handle_history))
            // Gossip
            .route("/sync/update", post(handle_sync_update))
            .route("/sync/status", get(handle_sync_status))
            .route("/health", get(handle_health))
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.state));

        if self.config.cors_enabled {
            router.layer(CorsLayer::permissive())
        } else {
            router
        }
    }

    /// Start the HTTP server
    pub async fn start(&self) -> Result<()> {
        if !self.config.enabled {
            tracing::info!("HTTP API disabled");
            // Keep the caller's select! waiting on the other branches
            std::future::pending::<()>().await;
            return Ok(());
        }

        let app = self.router();
        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!("HTTP API listening on {}", self.config.bind_address);

        axum::serve(listener, app)
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

// ============ Request/Response Types ============

/// Consensus broadcast request
#[derive(Debug, Deserialize, Serialize)]
pub struct BroadcastRequest {
    pub hash: String,
    /// Originating node (defaults to this node)
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub quorum: Option<usize>,
}

/// History query parameters
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// Consensus history response
#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub mode: ConsensusMode,
    pub failure_streak: u32,
    pub records: Vec<ConsensusRecord>,
}

/// Node listing response
#[derive(Debug, Serialize, Deserialize)]
pub struct NodesResponse {
    pub summary: RegistrySummary,
    pub nodes: Vec<Node>,
}

/// Health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub node_id: String,
    pub status: NodeStatus,
    pub mode: ConsensusMode,
    pub active_peers: usize,
    pub uptime_seconds: i64,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Error wrapper mapping crate errors onto HTTP statuses
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Transport(_) | Error::Network(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("API request failed: {}", self.0);
        }

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: self.0.code().to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ============ Handlers ============

async fn handle_register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NodeRegistration>,
) -> ApiResult<(StatusCode, Json<Node>)> {
    let node = state.registry.register(req).await?;
    tracing::info!(node_id = %node.node_id, address = %node.address, "Node registered via API");
    Ok((StatusCode::CREATED, Json(node)))
}

async fn handle_list_nodes(State(state): State<Arc<AppState>>) -> Json<NodesResponse> {
    Json(NodesResponse {
        summary: state.registry.summary().await,
        nodes: state.registry.list_nodes().await,
    })
}

async fn handle_remove_node(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.registry.remove(&node_id).await?;
    tracing::info!(node_id = %node_id, "Node removed via API");
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_heartbeat(
    State(state): State<Arc<AppState>>,
    Json(ping): Json<HeartbeatPing>,
) -> ApiResult<Json<HeartbeatAck>> {
    Ok(Json(receive_ping(&state.registry, &ping).await?))
}

async fn handle_verify(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ValidationRequest>,
) -> ApiResult<Json<ValidationResponse>> {
    let valid = state.coordinator.answer_validation(&req).await?;
    tracing::debug!(hash = %req.hash, origin = %req.origin, valid, "Validation answered");
    Ok(Json(ValidationResponse { valid }))
}

async fn handle_broadcast(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BroadcastRequest>,
) -> ApiResult<Json<BroadcastResult>> {
    check_hash(&req.hash)?;
    if req.quorum == Some(0) {
        return Err(Error::Validation("quorum must be at least 1".into()).into());
    }
    let origin = req
        .origin
        .unwrap_or_else(|| state.identity.node_id().to_string());

    let record = state.coordinator.broadcast(&origin, &req.hash, req.quorum).await;
    Ok(Json(BroadcastResult::from(&record)))
}

async fn handle_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Json<HistoryResponse> {
    Json(HistoryResponse {
        mode: state.coordinator.mode().await,
        failure_streak: state.coordinator.failure_streak().await,
        records: state.coordinator.history(query.limit).await,
    })
}

async fn handle_sync_update(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SyncUpdateRequest>,
) -> ApiResult<Json<SyncUpdateResponse>> {
    if req.peer_id.trim().is_empty() {
        return Err(Error::Validation("peer_id cannot be empty".into()).into());
    }
    Ok(Json(state.sync.handle_request(&req).await))
}

async fn handle_sync_status(State(state): State<Arc<AppState>>) -> Json<SyncStatus> {
    Json(state.sync.status().await)
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let status = state.identity.status().await;
    let mode = state.coordinator.mode().await;
    Json(HealthResponse {
        healthy: status == NodeStatus::Active && mode == ConsensusMode::Autonomous,
        node_id: state.identity.node_id().to_string(),
        status,
        mode,
        active_peers: state.identity.active_peers().await.len(),
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
    })
}
