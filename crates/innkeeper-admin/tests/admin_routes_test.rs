//! Integration tests for the admin HTTP surface.

mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use innkeeper_core::event::Actor;
use innkeeper_reservation::ReservationEvent;
use innkeeper_reservation::domain::events::GuestCheckedIn;
use innkeeper_test_support::{Fault, utc};
use serde_json::json;

// --- health ---

#[tokio::test]
async fn test_health_returns_200_with_status_ok() {
    let app = common::build_test_app(common::test_store());

    let (status, json) = common::get_json(app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["partitions"], 0);
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let app = common::build_test_app(common::test_store());

    let (status, _) = common::get_json(app, "/admin/nonexistent").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

// --- partitions ---

#[tokio::test]
async fn test_precreate_then_list_partitions() {
    // Arrange
    let store = common::test_store();

    // Act
    let (status, created) = common::post_json(
        common::build_test_app(Arc::clone(&store)),
        "/admin/partitions/precreate",
        &json!({ "lookahead_months": 1 }),
    )
    .await;
    let (list_status, listed) =
        common::get_json(common::build_test_app(store), "/admin/partitions").await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        created["created"],
        json!(["audit_events_p202610", "audit_events_p202611"])
    );
    assert_eq!(list_status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 2);
    assert_eq!(listed[0]["name"], "audit_events_p202610");
    assert_eq!(listed[0]["start"], "2026-10-01T00:00:00Z");
    assert_eq!(listed[0]["end"], "2026-11-01T00:00:00Z");
    assert_eq!(listed[0]["state"], "open");
}

#[tokio::test]
async fn test_precreate_without_lookahead_uses_configured_default() {
    let app = common::build_test_app(common::test_store());

    let (status, report) =
        common::post_json(app, "/admin/partitions/precreate", &json!({})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["created"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_precreate_storage_failure_returns_503() {
    // Arrange
    let store = common::test_store();
    store.storage().arm(Fault::CreatePartition);

    // Act
    let (status, json) = common::post_json(
        common::build_test_app(store),
        "/admin/partitions/precreate",
        &json!({}),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["error"], "storage_unavailable");
    assert!(json["message"].is_string());
}

#[tokio::test]
async fn test_retire_marks_ended_partitions_read_only() {
    // Arrange
    let store = common::test_store();
    store
        .append(
            ReservationEvent::CheckedOut.into_new_event(
                "R1",
                utc(2026, 9, 30, 10, 0),
                Actor::system("pms"),
            )
            .with_recorded_at(utc(2026, 9, 30, 10, 0)),
        )
        .await
        .unwrap();

    // Act
    let (status, report) = common::post_json(
        common::build_test_app(Arc::clone(&store)),
        "/admin/partitions/retire",
        &json!({ "older_than": "2026-10-01T00:00:00Z" }),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["retired"], json!(["audit_events_p202609"]));
    let (_, listed) = common::get_json(common::build_test_app(store), "/admin/partitions").await;
    assert_eq!(listed[0]["state"], "read_only");
}

#[tokio::test]
async fn test_retire_without_cutoff_is_rejected() {
    let app = common::build_test_app(common::test_store());

    let (status, _) = common::post_json(app, "/admin/partitions/retire", &json!({})).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

// --- retention ---

#[tokio::test]
async fn test_sweep_redacts_expired_sensitive_payloads() {
    // Arrange
    let store = common::test_store();
    let checked_in = ReservationEvent::CheckedIn(GuestCheckedIn {
        room_number: "412".into(),
    })
    .into_new_event("R1", utc(2026, 10, 14, 8, 0), Actor::user("clerk-17"))
    .retain_until(utc(2026, 11, 30, 0, 0));
    store.append(checked_in).await.unwrap();

    // Act
    let (status, report) = common::post_json(
        common::build_test_app(Arc::clone(&store)),
        "/admin/retention/sweep",
        &json!({ "now": "2026-12-01T00:00:00Z" }),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["partitions_scanned"], 1);
    assert_eq!(report["events_redacted"], 1);
    assert_eq!(report["partitions_dropped"], json!([]));
}

#[tokio::test]
async fn test_sweep_without_now_uses_store_clock() {
    let app = common::build_test_app(common::test_store());

    let (status, report) = common::post_json(app, "/admin/retention/sweep", &json!({})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["partitions_scanned"], 0);
}

// --- snapshots ---

#[tokio::test]
async fn test_flush_snapshots_reports_written_and_failed() {
    // Arrange
    let store = common::test_store();
    for id in ["R1", "R2"] {
        store
            .append(ReservationEvent::CheckedOut.into_new_event(
                id,
                utc(2026, 10, 14, 8, 0),
                Actor::system("pms"),
            ))
            .await
            .unwrap();
    }
    store.storage().arm(Fault::SaveSnapshot);

    // Act
    let (failed_status, failed) = common::post_json(
        common::build_test_app(Arc::clone(&store)),
        "/admin/snapshots/flush",
        &json!({}),
    )
    .await;
    store.storage().disarm(Fault::SaveSnapshot);
    let (_, retried) = common::post_json(
        common::build_test_app(store),
        "/admin/snapshots/flush",
        &json!({}),
    )
    .await;

    // Assert
    assert_eq!(failed_status, StatusCode::OK);
    assert_eq!(failed, json!({ "examined": 2, "written": 0, "failed": 2 }));
    assert_eq!(retried, json!({ "examined": 2, "written": 2, "failed": 0 }));
}

// --- aggregates ---

#[tokio::test]
async fn test_reconstruct_returns_current_state() {
    // Arrange
    let store = common::test_store();
    store
        .append(
            ReservationEvent::CheckedIn(GuestCheckedIn {
                room_number: "507".into(),
            })
            .into_new_event("R7", utc(2026, 10, 14, 8, 0), Actor::user("clerk-17")),
        )
        .await
        .unwrap();

    // Act
    let (status, json) = common::get_json(
        common::build_test_app(store),
        "/admin/aggregates/reservation/R7",
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["through_sequence"], 1);
    assert_eq!(json["state"]["status"], "checked_in");
    assert_eq!(json["state"]["room_number"], "507");
}

#[tokio::test]
async fn test_reconstruct_unknown_aggregate_returns_404() {
    let app = common::build_test_app(common::test_store());

    let (status, json) = common::get_json(app, "/admin/aggregates/reservation/R404").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "aggregate_not_found");
}
