//! Engine API handlers.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use qrelease_core::{EngineStatus, PollSummary};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::state::AppState;

// ============================================================================
// Response Types
// ============================================================================

/// Engine status response
#[derive(Debug, Serialize)]
pub struct EngineStatusResponse {
    /// Whether the engine is available (ticketing system and gateway configured)
    pub available: bool,
    #[serde(flatten)]
    pub status: EngineStatus,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct EngineErrorResponse {
    pub error: String,
}

fn unavailable() -> (StatusCode, Json<EngineErrorResponse>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(EngineErrorResponse {
            error: "Engine not available. Check that servicenow and gateway are configured."
                .to_string(),
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// Get engine status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<EngineStatusResponse> {
    match state.engine() {
        Some(engine) => Json(EngineStatusResponse {
            available: true,
            status: engine.status().await,
        }),
        None => Json(EngineStatusResponse {
            available: false,
            status: EngineStatus::default(),
        }),
    }
}

/// Run one poll cycle now and return its summary.
pub async fn trigger_poll(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PollSummary>, impl IntoResponse> {
    match state.engine() {
        Some(engine) => {
            info!("Poll cycle triggered through the API");
            Ok(Json(engine.run_once().await))
        }
        None => Err(unavailable()),
    }
}
