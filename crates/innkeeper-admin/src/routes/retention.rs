//! Retention sweep endpoint.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use innkeeper_event_store::retention::SweepReport;
use serde::Deserialize;
use tracing::{info, instrument};

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for POST /admin/retention/sweep.
#[derive(Debug, Default, Deserialize)]
pub struct SweepRequest {
    /// Instant retention is evaluated at; the store's clock if omitted.
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
}

/// POST /admin/retention/sweep
#[instrument(skip(state))]
async fn sweep(
    State(state): State<AppState>,
    Json(request): Json<SweepRequest>,
) -> Result<Json<SweepReport>, ApiError> {
    let report = state.admin.sweep(request.now).await?;
    info!(
        dropped = report.partitions_dropped.len(),
        redacted = report.events_redacted,
        "sweep requested by operator"
    );
    Ok(Json(report))
}

/// Returns the router for retention enforcement.
pub fn router() -> Router<AppState> {
    Router::new().route("/admin/retention/sweep", post(sweep))
}
