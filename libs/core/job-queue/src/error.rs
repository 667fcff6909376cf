//! Queue error types
//!
//! Errors fall into three groups:
//! - **Transport**: broker unreachable or a command failed; surfaced to the caller
//! - **Data**: a record could not be encoded or decoded; logged and dropped by readers
//! - **Usage**: invalid arguments or configuration; raised immediately, never retried

use database::DatabaseError;
use thiserror::Error;

/// Server error code returned by `XGROUP CREATE` when the group exists
const BUSYGROUP: &str = "BUSYGROUP";

/// Server error code returned when reading from a group that does not exist
const NOGROUP: &str = "NOGROUP";

/// Job queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    /// Redis command error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Broker handle could not be obtained
    #[error("Connection error: {0}")]
    Connection(#[from] DatabaseError),

    /// Record could not be encoded for the wire
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stream entry could not be decoded into a job record
    #[error("Failed to decode record {record_id}: {reason}")]
    Decode { record_id: String, reason: String },

    /// Empty key, empty list or similar caller mistake
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result alias used throughout the crate
pub type QueueResult<T> = Result<T, QueueError>;

impl QueueError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        QueueError::InvalidArgument(message.into())
    }

    /// Whether the broker reported a missing consumer group
    pub fn is_nogroup(&self) -> bool {
        matches!(self, QueueError::Redis(e) if is_no_group(e))
    }

    /// Whether the failure came from the transport rather than the data
    pub fn is_transport(&self) -> bool {
        matches!(self, QueueError::Redis(_) | QueueError::Connection(_))
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

/// Whether a Redis error is the "group already exists" reply
pub(crate) fn is_busy_group(err: &redis::RedisError) -> bool {
    err.code() == Some(BUSYGROUP)
}

/// The group (or its stream) does not exist
pub(crate) fn is_no_group(err: &redis::RedisError) -> bool {
    err.code() == Some(NOGROUP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_message() {
        let err = QueueError::invalid_argument("key must not be empty");
        assert_eq!(err.to_string(), "Invalid argument: key must not be empty");
        assert!(!err.is_transport());
    }

    #[test]
    fn test_serde_error_maps_to_serialization() {
        let err: QueueError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, QueueError::Serialization(_)));
    }

    #[test]
    fn test_connection_error_is_transport() {
        let err = QueueError::from(DatabaseError::ConnectionFailed {
            attempts: 3,
            reason: "refused".to_string(),
        });
        assert!(err.is_transport());
        assert!(!err.is_nogroup());
    }
}
