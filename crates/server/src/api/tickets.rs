//! Ticket API handlers.
//!
//! Tickets live in the ticketing system; these endpoints expose the engine's
//! progress journal for them and the operator retry.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use qrelease_core::{
    progress::{ProgressFilter, StoreError},
    EngineError, ProgressRecord,
};

use crate::state::AppState;

/// Maximum allowed limit for ticket queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for ticket queries
const DEFAULT_LIMIT: i64 = 100;

/// Actor recorded for retries that do not name one.
const DEFAULT_ACTOR: &str = "operator";

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for listing tickets
#[derive(Debug, Deserialize)]
pub struct ListTicketsParams {
    /// Filter by state type
    pub state: Option<String>,
    /// Maximum number of records to return
    pub limit: Option<i64>,
    /// Pagination offset
    pub offset: Option<i64>,
}

/// Query parameters for a retry
#[derive(Debug, Deserialize)]
pub struct RetryParams {
    /// Who asked for the retry; recorded in the audit log.
    pub actor: Option<String>,
}

/// Response for listing tickets
#[derive(Debug, Serialize)]
pub struct ListTicketsResponse {
    pub tickets: Vec<ProgressRecord>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct TicketErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<TicketErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(TicketErrorResponse {
            error: error.into(),
        }),
    )
}

fn store_error(e: StoreError) -> ApiError {
    api_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Progress journal error: {}", e),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// List journal records
pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListTicketsParams>,
) -> Result<Json<ListTicketsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut base_filter = ProgressFilter::new();
    if let Some(ref state_type) = params.state {
        base_filter = base_filter.with_state(state_type);
    }

    let query_filter = base_filter.clone().with_limit(limit).with_offset(offset);

    let store = state.progress_store();
    let tickets = store.list(&query_filter).map_err(store_error)?;
    let total = store.count(&base_filter).map_err(store_error)?;

    Ok(Json(ListTicketsResponse {
        tickets,
        total,
        limit,
        offset,
    }))
}

/// Get one journal record
pub async fn get_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ProgressRecord>, ApiError> {
    match state.progress_store().get(&id) {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Ticket not found: {}", id),
        )),
        Err(e) => Err(store_error(e)),
    }
}

/// Reopen a failed ticket for the next poll cycle
pub async fn retry_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<RetryParams>,
) -> Result<Json<ProgressRecord>, ApiError> {
    let Some(engine) = state.engine() else {
        return Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Engine not available",
        ));
    };

    let actor = params.actor.as_deref().unwrap_or(DEFAULT_ACTOR);

    match engine.retry_ticket(&id, actor).await {
        Ok(record) => Ok(Json(record)),
        Err(e) => {
            warn!(ticket_id = %id, "Retry refused: {}", e);
            let status = match &e {
                EngineError::TicketNotFound(_) => StatusCode::NOT_FOUND,
                EngineError::InvalidState { .. } | EngineError::TicketBusy(_) => {
                    StatusCode::CONFLICT
                }
                EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            Err(api_error(status, e.to_string()))
        }
    }
}
