//! Route modules, one per administrative concern.

use axum::Router;

use crate::state::AppState;

pub mod aggregates;
pub mod health;
pub mod partitions;
pub mod retention;
pub mod snapshots;

/// The full admin router, as served by the daemon.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(partitions::router())
        .merge(retention::router())
        .merge(snapshots::router())
        .merge(aggregates::router())
        .with_state(state)
}
