//! Shared test helpers for admin route tests.
#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use innkeeper_admin::routes;
use innkeeper_admin::state::AppState;
use innkeeper_core::aggregate::SchemaRegistry;
use innkeeper_event_store::snapshot::SnapshotPolicy;
use innkeeper_event_store::{AuditStore, AuditStoreConfig, InMemoryAuditStorage};
use innkeeper_reservation::Reservation;
use innkeeper_test_support::{FaultyStorage, FixedClock, utc};
use tower::ServiceExt;

pub type Storage = FaultyStorage<InMemoryAuditStorage>;

/// An in-memory store whose clock reads 2026-10-14 09:00 UTC.
pub fn test_store() -> Arc<AuditStore<Storage>> {
    Arc::new(AuditStore::with_clock(
        Arc::new(FaultyStorage::new(InMemoryAuditStorage::new())),
        SchemaRegistry::new().with::<Reservation>(),
        AuditStoreConfig {
            lookahead_months: 2,
            snapshot_policy: SnapshotPolicy::EveryEvents(1),
            ..AuditStoreConfig::default()
        },
        Arc::new(FixedClock(utc(2026, 10, 14, 9, 0))),
    ))
}

/// Build the full admin router over `store`. Uses the same route structure
/// as `main.rs`.
pub fn build_test_app(store: Arc<AuditStore<Storage>>) -> Router {
    routes::app(AppState::new(store))
}

/// Send a POST request with a JSON body and return the response.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();

    send(app, request).await
}

/// Send a GET request and return the response.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    send(app, request).await
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body_bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(serde_json::Value::Null)
    };

    (status, json)
}
