//! Innkeeper admin error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use innkeeper_core::error::{AuditError, StorageError};
use serde::Serialize;
use thiserror::Error;

/// Startup and runtime errors for the admin server.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The audit store refused a startup operation.
    #[error("audit store error: {0}")]
    Store(#[from] StorageError),

    /// Network binding or I/O error.
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

/// JSON body returned for error responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub error: &'static str,
    /// Human-readable error message.
    pub message: String,
}

/// HTTP-layer wrapper around `AuditError` that implements `IntoResponse`.
#[derive(Debug)]
pub struct ApiError(pub AuditError);

impl From<AuditError> for ApiError {
    fn from(err: AuditError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            AuditError::InvalidEvent { .. } => (StatusCode::BAD_REQUEST, "invalid_event"),
            AuditError::DuplicateEvent(_) => (StatusCode::CONFLICT, "duplicate_event"),
            AuditError::AppendFailed { .. } => (StatusCode::SERVICE_UNAVAILABLE, "append_failed"),
            AuditError::AggregateNotFound(_) => (StatusCode::NOT_FOUND, "aggregate_not_found"),
            AuditError::CorruptAggregate { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "corrupt_aggregate")
            }
            AuditError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            AuditError::Storage(StorageError::Unavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable")
            }
            AuditError::Storage(StorageError::PartitionMissing(_)) => {
                (StatusCode::NOT_FOUND, "partition_missing")
            }
            AuditError::Storage(StorageError::PartitionOverlap { .. }) => {
                (StatusCode::CONFLICT, "partition_overlap")
            }
            AuditError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();
        if status.is_server_error() {
            tracing::warn!(error = %self.0, code = error_code, "admin request failed");
        }

        let body = ErrorBody {
            error: error_code,
            message: self.0.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use innkeeper_core::event::{AggregateKey, EventId};
    use innkeeper_core::validate::ValidationError;

    fn status_of(err: AuditError) -> StatusCode {
        let response = ApiError(err).into_response();
        response.status()
    }

    fn key() -> AggregateKey {
        AggregateKey::new("reservation", "R1")
    }

    #[test]
    fn test_aggregate_not_found_maps_to_404() {
        assert_eq!(
            status_of(AuditError::AggregateNotFound(key())),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_invalid_event_maps_to_400() {
        assert_eq!(
            status_of(AuditError::InvalidEvent {
                event_id: EventId::generate(),
                reason: ValidationError::ZeroVersion,
            }),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_partition_overlap_maps_to_409() {
        assert_eq!(
            status_of(AuditError::Storage(StorageError::PartitionOverlap {
                requested: "[2026-10-15, 2026-11-15)".into(),
                existing: "audit_events_p202610".into(),
            })),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_transient_failures_map_to_503() {
        assert_eq!(
            status_of(AuditError::Storage(StorageError::Unavailable("db down".into()))),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(AuditError::AppendFailed {
                key: key(),
                event_id: EventId::generate(),
                partition: None,
                reason: "db down".into(),
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_timeout_maps_to_504() {
        assert_eq!(
            status_of(AuditError::Timeout {
                operation: "reconstruct",
                key: key(),
            }),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_corrupt_aggregate_maps_to_500() {
        assert_eq!(
            status_of(AuditError::CorruptAggregate {
                key: key(),
                event_id: None,
                reason: "gap after sequence 3".into(),
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
