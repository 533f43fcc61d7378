//! Versioned payload decoding.

use serde::de::DeserializeOwned;
use thiserror::Error;

/// Failure to decode an event payload under its declared type and version.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    /// No decoder exists for this event type.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// The event type is known but not at this schema version.
    #[error("unsupported version {version} for event type {event_type}")]
    UnsupportedVersion {
        /// The event type.
        event_type: String,
        /// The declared version.
        version: u32,
    },

    /// The payload does not match the declared schema.
    #[error("malformed {event_type} v{version} payload: {reason}")]
    Malformed {
        /// The event type.
        event_type: String,
        /// The declared version.
        version: u32,
        /// Decoder message.
        reason: String,
    },
}

/// A sum type of every payload an aggregate understands, with one explicit
/// decoder per `(event_type, event_version)` pair.
pub trait VersionedPayload: Sized + Send + Sync {
    /// Decodes `data` declared as `event_type` at `event_version`.
    ///
    /// # Errors
    ///
    /// Returns `PayloadError` when the pair is unknown or the data is malformed.
    fn decode(
        event_type: &str,
        event_version: u32,
        data: &serde_json::Value,
    ) -> Result<Self, PayloadError>;
}

/// Deserializes `data` into one concrete payload struct, tagging failures with
/// the declared type and version.
///
/// # Errors
///
/// Returns `PayloadError::Malformed` when `data` does not deserialize into `T`.
pub fn decode_as<T: DeserializeOwned>(
    event_type: &str,
    event_version: u32,
    data: &serde_json::Value,
) -> Result<T, PayloadError> {
    T::deserialize(data).map_err(|e| PayloadError::Malformed {
        event_type: event_type.to_owned(),
        version: event_version,
        reason: e.to_string(),
    })
}

/// Shorthand for the `UnsupportedVersion` error.
#[must_use]
pub fn unsupported(event_type: &str, event_version: u32) -> PayloadError {
    PayloadError::UnsupportedVersion {
        event_type: event_type.to_owned(),
        version: event_version,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Paid {
        amount_cents: i64,
    }

    #[test]
    fn test_decode_as_reports_type_and_version() {
        let err = decode_as::<Paid>("payment.captured", 2, &serde_json::json!({"amount": 1}))
            .unwrap_err();
        match err {
            PayloadError::Malformed {
                event_type,
                version,
                ..
            } => {
                assert_eq!(event_type, "payment.captured");
                assert_eq!(version, 2);
            }
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_as_accepts_matching_payload() {
        let paid: Paid =
            decode_as("payment.captured", 1, &serde_json::json!({"amount_cents": 1200})).unwrap();
        assert_eq!(paid, Paid { amount_cents: 1200 });
    }
}
