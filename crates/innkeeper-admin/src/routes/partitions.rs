//! Partition catalog endpoints.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use innkeeper_core::partition::{PartitionRecord, PartitionState};
use innkeeper_event_store::partition::{PrecreateReport, RetireReport};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::error::ApiError;
use crate::state::AppState;

/// One catalog entry as listed by GET /admin/partitions.
#[derive(Debug, Serialize)]
pub struct PartitionView {
    /// Storage name, `audit_events_pYYYYMM`.
    pub name: String,
    /// Inclusive range start.
    pub start: DateTime<Utc>,
    /// Exclusive range end.
    pub end: DateTime<Utc>,
    /// `open` or `read_only`.
    pub state: PartitionState,
    /// When the partition was provisioned.
    pub created_at: DateTime<Utc>,
}

impl From<PartitionRecord> for PartitionView {
    fn from(record: PartitionRecord) -> Self {
        Self {
            start: record.range.start(),
            end: record.range.end(),
            name: record.name,
            state: record.state,
            created_at: record.created_at,
        }
    }
}

/// Request body for POST /admin/partitions/precreate.
#[derive(Debug, Default, Deserialize)]
pub struct PrecreateRequest {
    /// Months ahead of the current one; the configured lookahead if omitted.
    #[serde(default)]
    pub lookahead_months: Option<u32>,
}

/// Request body for POST /admin/partitions/retire.
#[derive(Debug, Deserialize)]
pub struct RetireRequest {
    /// Partitions ending at or before this instant become read-only.
    pub older_than: DateTime<Utc>,
}

/// GET /admin/partitions
async fn list_partitions(
    State(state): State<AppState>,
) -> Result<Json<Vec<PartitionView>>, ApiError> {
    let partitions = state.admin.partitions().await?;
    Ok(Json(partitions.into_iter().map(PartitionView::from).collect()))
}

/// POST /admin/partitions/precreate
#[instrument(skip(state))]
async fn precreate(
    State(state): State<AppState>,
    Json(request): Json<PrecreateRequest>,
) -> Result<Json<PrecreateReport>, ApiError> {
    let report = state.admin.precreate(request.lookahead_months).await?;
    info!(created = report.created.len(), "precreate requested by operator");
    Ok(Json(report))
}

/// POST /admin/partitions/retire
#[instrument(skip(state))]
async fn retire(
    State(state): State<AppState>,
    Json(request): Json<RetireRequest>,
) -> Result<Json<RetireReport>, ApiError> {
    let report = state.admin.retire(request.older_than).await?;
    info!(retired = report.retired.len(), "retire requested by operator");
    Ok(Json(report))
}

/// Returns the router for the partition catalog.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/partitions", get(list_partitions))
        .route("/admin/partitions/precreate", post(precreate))
        .route("/admin/partitions/retire", post(retire))
}
