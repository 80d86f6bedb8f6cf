//! Localhost REST API for companion UIs
//!
//! Reads come from the engine's latest published view. Mutations are queued
//! on the engine and answered with `202 Accepted` plus the command sequence
//! number; completion shows up as `last_ack` in `/api/state`.
//! Default port: 8127

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

use crate::engine::{EngineHandle, EngineStopped, GainUpdate};
use crate::mode::Selection;
use crate::presets::{PresetId, PresetList};
use crate::store::{GainState, RuntimeState};

/// Default API port
pub const DEFAULT_API_PORT: u16 = 8127;

/// Shared state for API handlers
pub struct ApiState {
    pub engine: EngineHandle,
}

/// Response for GET /api/state
#[derive(Debug, Serialize)]
pub struct StateResponse {
    #[serde(flatten)]
    pub runtime: RuntimeState,
    pub selection: Selection,
    pub gains: GainState,
}

/// Response for every accepted mutation
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Accepted {
    pub seq: u64,
}

#[derive(Debug, Deserialize)]
pub struct ModeRequest {
    pub mode: String,
}

#[derive(Debug, Deserialize)]
pub struct CreatePresetRequest {
    pub name: String,
    /// Defaults to the live sliders
    #[serde(default)]
    pub gains: Option<GainState>,
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PositionRequest {
    pub position: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct SnapshotRequest {
    #[serde(default)]
    pub gains: Option<GainState>,
}

/// API error response
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    error: String,
}

impl ApiError {
    fn bad_request(error: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: error.into(),
        }
    }
}

impl From<EngineStopped> for ApiError {
    fn from(e: EngineStopped) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            error: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.error }));
        (self.status, body).into_response()
    }
}

type Queued = Result<(StatusCode, Json<Accepted>), ApiError>;

fn accepted(seq: Result<u64, EngineStopped>) -> Queued {
    let seq = seq?;
    debug!("Queued command #{}", seq);
    Ok((StatusCode::ACCEPTED, Json(Accepted { seq })))
}

fn checked_name(name: &str) -> Result<&str, ApiError> {
    if name.trim().is_empty() {
        Err(ApiError::bad_request("preset name cannot be empty"))
    } else {
        Ok(name)
    }
}

/// Build the API router
pub fn build_router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/mode", post(set_mode))
        .route("/api/gains", put(set_gains))
        .route("/api/presets", get(list_presets).post(create_preset))
        .route("/api/presets/:id", delete(delete_preset))
        .route("/api/presets/:id/apply", post(apply_preset))
        .route("/api/presets/:id/name", put(rename_preset))
        .route("/api/presets/:id/position", put(reorder_preset))
        .route("/api/presets/:id/snapshot", put(overwrite_preset))
        .route("/api/mic-setup/ack", post(acknowledge_mic_setup))
        .route("/api/shutdown", post(shutdown))
        .route("/api/health", get(health_check))
        .layer(cors)
        .with_state(state)
}

/// GET /api/state - Runtime state, selection and sliders
async fn get_state(State(state): State<Arc<ApiState>>) -> Json<StateResponse> {
    let view = state.engine.view();
    Json(StateResponse {
        runtime: view.runtime,
        selection: view.selection,
        gains: view.gains,
    })
}

/// POST /api/mode - Select auto, desktop, private or public
async fn set_mode(State(state): State<Arc<ApiState>>, Json(req): Json<ModeRequest>) -> Queued {
    let selection: Selection = req.mode.parse().map_err(ApiError::bad_request)?;
    accepted(state.engine.select_mode(selection))
}

/// PUT /api/gains - Partial slider update
async fn set_gains(State(state): State<Arc<ApiState>>, Json(update): Json<GainUpdate>) -> Queued {
    accepted(state.engine.set_gains(update))
}

/// GET /api/presets - Ordered preset list
async fn list_presets(State(state): State<Arc<ApiState>>) -> Json<PresetList> {
    Json(state.engine.view().presets)
}

/// POST /api/presets - Save a new preset
async fn create_preset(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CreatePresetRequest>,
) -> Queued {
    let name = checked_name(&req.name)?;
    accepted(state.engine.create_preset(name, req.gains))
}

async fn apply_preset(Path(id): Path<PresetId>, State(state): State<Arc<ApiState>>) -> Queued {
    accepted(state.engine.apply_preset(id))
}

async fn rename_preset(
    Path(id): Path<PresetId>,
    State(state): State<Arc<ApiState>>,
    Json(req): Json<RenameRequest>,
) -> Queued {
    let name = checked_name(&req.name)?;
    accepted(state.engine.rename_preset(id, name))
}

async fn reorder_preset(
    Path(id): Path<PresetId>,
    State(state): State<Arc<ApiState>>,
    Json(req): Json<PositionRequest>,
) -> Queued {
    accepted(state.engine.reorder_preset(id, req.position))
}

/// PUT /api/presets/:id/snapshot - Overwrite with the given or live sliders
async fn overwrite_preset(
    Path(id): Path<PresetId>,
    State(state): State<Arc<ApiState>>,
    Json(req): Json<SnapshotRequest>,
) -> Queued {
    accepted(state.engine.overwrite_preset(id, req.gains))
}

async fn delete_preset(Path(id): Path<PresetId>, State(state): State<Arc<ApiState>>) -> Queued {
    accepted(state.engine.delete_preset(id))
}

async fn acknowledge_mic_setup(State(state): State<Arc<ApiState>>) -> Queued {
    accepted(state.engine.acknowledge_mic_setup())
}

/// POST /api/shutdown - Stop the engine (restores desktop routing first)
async fn shutdown(State(state): State<Arc<ApiState>>) -> Queued {
    info!("Shutdown requested over the API");
    accepted(state.engine.shutdown())
}

/// GET /api/health - Health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

/// Start the API server on the loopback interface
pub async fn start_server(state: Arc<ApiState>, port: u16) -> Result<()> {
    let router = build_router(state);

    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
    info!("🌐 Command API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind API server")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
