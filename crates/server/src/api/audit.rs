//! Audit log query handler.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use qrelease_core::{AuditError, AuditFilter, AuditRecord};

use crate::state::AppState;

/// Query parameters for audit endpoint
#[derive(Debug, Deserialize)]
pub struct AuditQueryParams {
    pub ticket_id: Option<String>,
    /// e.g. `release_completed`, `ticket_retry_requested`
    pub event_type: Option<String>,
    /// Operator that asked for a retry
    pub actor: Option<String>,
    /// Only events at or after this instant (RFC 3339)
    pub from: Option<DateTime<Utc>>,
    /// Only events at or before this instant (RFC 3339)
    pub to: Option<DateTime<Utc>>,
    /// Page size, clamped to 1..=1000 (default 100)
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// One page of audit records plus the unpaged total.
#[derive(Debug, Serialize)]
pub struct AuditQueryResponse {
    pub events: Vec<AuditRecord>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct AuditErrorResponse {
    pub error: String,
}

fn audit_error(action: &str, e: AuditError) -> (StatusCode, Json<AuditErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(AuditErrorResponse {
            error: format!("Failed to {} audit events: {}", action, e),
        }),
    )
}

impl AuditQueryParams {
    /// Filter without paging; shared by the page query and the count.
    fn filter(&self) -> AuditFilter {
        let mut filter = AuditFilter::new();
        if let Some(ref ticket_id) = self.ticket_id {
            filter = filter.with_ticket_id(ticket_id);
        }
        if let Some(ref event_type) = self.event_type {
            filter = filter.with_event_type(event_type);
        }
        if let Some(ref actor) = self.actor {
            filter = filter.with_actor(actor);
        }
        if self.from.is_some() || self.to.is_some() {
            filter = filter.with_time_range(self.from, self.to);
        }
        filter
    }
}

/// Query audit events
pub async fn query_audit(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<AuditQueryResponse>, (StatusCode, Json<AuditErrorResponse>)> {
    let base_filter = params.filter();

    // The filter clamps paging itself.
    let page_filter = base_filter
        .clone()
        .with_limit(params.limit.unwrap_or(100))
        .with_offset(params.offset.unwrap_or(0));

    let store = state.audit_store();
    let events = store
        .query(&page_filter)
        .map_err(|e| audit_error("query", e))?;
    let total = store
        .count(&base_filter)
        .map_err(|e| audit_error("count", e))?;

    Ok(Json(AuditQueryResponse {
        events,
        total,
        limit: page_filter.limit,
        offset: page_filter.offset,
    }))
}
