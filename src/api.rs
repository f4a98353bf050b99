//! REST API server for the market analysis orchestrator
//!
//! Runs sessions on request and serves stored sessions and provider status.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::Orchestrator;
use crate::error::OrchestrationError;
use crate::models::SessionRequest;

const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 100;

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn ok<T: Serialize>(data: T) -> ApiResult {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

fn fail(status: StatusCode, message: String) -> ApiResult {
    (status, Json(ApiResponse::error(message)))
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    /// Cancelled on server shutdown; each session runs on a child token
    pub shutdown: CancellationToken,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

/// =============================
/// Endpoints
/// =============================

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "providers_connected": state.orchestrator.manager().connected_count().await,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn list_providers(State(state): State<ApiState>) -> ApiResult {
    ok(state.orchestrator.manager().status().await)
}

async fn create_session(
    State(state): State<ApiState>,
    Json(req): Json<SessionRequest>,
) -> ApiResult {
    if req.query.trim().is_empty() {
        return fail(StatusCode::BAD_REQUEST, "Query must not be empty".to_string());
    }

    info!(query = %req.query, entities = ?req.entities, "Received session request");

    match state
        .orchestrator
        .run(req, state.shutdown.child_token())
        .await
    {
        Ok(session) => ok(session),
        Err(e @ OrchestrationError::NoProvidersAvailable(_)) => {
            warn!(error = %e, "Session could not start");
            fail(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
        Err(e) => {
            warn!(error = %e, "Session failed");
            fail(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Session failed: {}", e),
            )
        }
    }
}

async fn list_sessions(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> ApiResult {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    match state.orchestrator.store().get_recent(limit).await {
        Ok(sessions) => ok(sessions),
        Err(e) => fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn get_session(State(state): State<ApiState>, Path(id): Path<Uuid>) -> ApiResult {
    match state.orchestrator.store().get_by_id(id).await {
        Ok(Some(session)) => ok(session),
        Ok(None) => fail(StatusCode::NOT_FOUND, format!("Session {} not found", id)),
        Err(e) => fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>, shutdown: CancellationToken) -> Router {
    let state = ApiState {
        orchestrator,
        shutdown,
    };

    Router::new()
        .route("/health", get(health))
        .route("/providers", get(list_providers))
        .route("/sessions", get(list_sessions).post(create_session))
        .route("/sessions/:id", get(get_session))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

/// Serve until `shutdown` is cancelled.
pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    port: u16,
    shutdown: CancellationToken,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator, shutdown.clone());

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
