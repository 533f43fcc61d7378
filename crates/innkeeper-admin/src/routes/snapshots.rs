//! Snapshot flush endpoint.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use innkeeper_event_store::store::FlushReport;

use crate::state::AppState;

/// POST /admin/snapshots/flush
///
/// Failed candidates stay queued for the next flush, so this never errors.
async fn flush(State(state): State<AppState>) -> Json<FlushReport> {
    Json(state.admin.flush_snapshots().await)
}

/// Returns the router for snapshot maintenance.
pub fn router() -> Router<AppState> {
    Router::new().route("/admin/snapshots/flush", post(flush))
}
