//! HTTP routes for the loopback transport.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use kiln_core::BuildService;

use crate::protocol::{BuildRequest, BuildResponse};
use crate::server::dispatch;
use crate::transport::NAMESPACE;

/// Application state shared across handlers.
pub struct AppState {
    pub service: Arc<dyn BuildService>,
    /// Owner this server belongs to; requests for other owners are 404.
    pub owner: u32,
}

/// Create the router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(&format!("/{NAMESPACE}/{{owner}}"), post(build_handler))
        .with_state(state)
}

/// Health check endpoint.
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "owner": state.owner,
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Run one build.
async fn build_handler(
    State(state): State<Arc<AppState>>,
    Path(owner): Path<u32>,
    Json(request): Json<BuildRequest>,
) -> Result<Json<BuildResponse>, StatusCode> {
    if owner != state.owner {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(dispatch(Arc::clone(&state.service), request).await))
}
