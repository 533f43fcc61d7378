//! Aggregate inspection endpoint.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use innkeeper_core::event::AggregateKey;
use innkeeper_event_store::replay::Reconstruction;
use tracing::instrument;

use crate::error::ApiError;
use crate::state::AppState;

/// GET /admin/aggregates/{aggregate_type}/{aggregate_id}
#[instrument(skip(state))]
async fn reconstruct(
    State(state): State<AppState>,
    Path((aggregate_type, aggregate_id)): Path<(String, String)>,
) -> Result<Json<Reconstruction>, ApiError> {
    let key = AggregateKey::new(aggregate_type, aggregate_id);
    Ok(Json(state.admin.reconstruct(&key).await?))
}

/// Returns the router for aggregate inspection.
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/admin/aggregates/{aggregate_type}/{aggregate_id}",
        get(reconstruct),
    )
}
