//! Error types for the key-value API, the transaction log and recovery.
//!
//! [`StoreError`] is the HTTP-facing error type: each variant maps to a
//! status code and structured JSON error response. [`LogError`] covers the
//! durability layer, and [`RecoveryError`] is what the startup replay
//! driver returns when the log cannot be reapplied.

use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 1001,
///     "message": "key exceeds maximum size of 256 bytes"
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Failures of the transaction log.
///
/// Construction-time resource failures (`Open`, `Connect`, `Schema`) are
/// returned synchronously. Persistence failures (`Write`, `Query`) travel
/// on the logger's error channel. Replay corruption (`Parse`, `InvalidKind`,
/// `OutOfSequence`) is the terminal item of a replay stream.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The log file could not be opened or created.
    #[error("cannot open transaction log file {}: {source}", .path.display())]
    Open {
        /// Path that was being opened.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The database could not be reached.
    #[error("cannot connect to transaction database: {0}")]
    Connect(#[source] sqlx::Error),

    /// The `transactions` table could not be created.
    #[error("cannot initialize transactions table: {0}")]
    Schema(#[source] sqlx::Error),

    /// Appending a record to the log file failed.
    #[error("transaction log write error: {0}")]
    Write(#[source] std::io::Error),

    /// Reading the log file back failed.
    #[error("transaction log read error: {0}")]
    Read(#[source] std::io::Error),

    /// A database statement failed.
    #[error("transaction database query error: {0}")]
    Query(#[source] sqlx::Error),

    /// A persisted record could not be decoded.
    #[error("input parse error on record {record}: {reason}")]
    Parse {
        /// 1-based position of the record in storage order.
        record: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// A record carried an event kind outside the known set.
    #[error("invalid event kind {0}")]
    InvalidKind(i16),

    /// The database returned an identity value that is not a valid sequence.
    #[error("invalid sequence number {0}")]
    InvalidSequence(i64),

    /// A record's sequence number did not exceed its predecessor's.
    #[error("transaction numbers out of sequence: {found} does not follow {previous}")]
    OutOfSequence {
        /// Last sequence number accepted.
        previous: u64,
        /// Offending sequence number.
        found: u64,
    },

    /// The configured backend name is not recognised.
    #[error("unknown transaction log backend: {0}")]
    UnknownBackend(String),

    /// A mutation was recorded before `start`.
    #[error("transaction logger has not been started")]
    NotStarted,

    /// `start` was called a second time.
    #[error("transaction logger is already started")]
    AlreadyStarted,

    /// `replay` was called more than once, or after `start`.
    #[error("transaction log replay was already requested")]
    ReplayAlreadyTaken,

    /// `start` was called before a replay stream was drained cleanly.
    #[error("transaction log replay must be drained to completion before start")]
    ReplayIncomplete,

    /// The logger was closed.
    #[error("transaction logger is closed")]
    Closed,

    /// The writer halted after a persistence failure and accepts no more events.
    #[error("transaction log writer has stopped")]
    WriterStopped,

    /// The writer task panicked or was aborted.
    #[error("transaction log writer task failed: {0}")]
    WriterTask(String),
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                  |
/// |-----------|-----------------|------------------------------|
/// | 1000–1999 | Validation      | 400 Bad Request              |
/// | 2000–2999 | Not Found       | 404 Not Found                |
/// | 3000–3999 | Server          | 503 Service Unavailable      |
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Key longer than the configured limit.
    #[error("key exceeds maximum size of {max} bytes")]
    KeyTooLarge {
        /// Configured maximum.
        max: usize,
    },

    /// Value longer than the configured limit.
    #[error("value exceeds maximum size of {max} bytes")]
    ValueTooLarge {
        /// Configured maximum.
        max: usize,
    },

    /// No value is stored under the requested key.
    #[error("no such key")]
    NoSuchKey,

    /// The transaction log refused the mutation.
    #[error("transaction log unavailable: {0}")]
    Log(#[from] LogError),
}

impl StoreError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::KeyTooLarge { .. } => 1001,
            Self::ValueTooLarge { .. } => 1002,
            Self::NoSuchKey => 2001,
            Self::Log(_) => 3001,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::KeyTooLarge { .. } | Self::ValueTooLarge { .. } => StatusCode::BAD_REQUEST,
            Self::NoSuchKey => StatusCode::NOT_FOUND,
            Self::Log(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

/// Startup recovery failure. Either the log could not be read back, or the
/// store rejected one of its events.
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    /// The transaction log failed during replay.
    #[error("transaction log replay failed: {0}")]
    Log(#[from] LogError),

    /// The store rejected a replayed event.
    #[error("cannot apply event {sequence} during replay: {source}")]
    Apply {
        /// Sequence number of the rejected event.
        sequence: u64,
        /// Store-side failure.
        #[source]
        source: StoreError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_bad_request() {
        let err = StoreError::KeyTooLarge { max: 256 };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_code(), 1001);
        assert_eq!(err.to_string(), "key exceeds maximum size of 256 bytes");
    }

    #[test]
    fn missing_key_is_not_found() {
        assert_eq!(StoreError::NoSuchKey.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn log_errors_map_to_service_unavailable() {
        let err = StoreError::from(LogError::WriterStopped);
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.error_code(), 3001);
    }

    #[test]
    fn out_of_sequence_message() {
        let err = LogError::OutOfSequence {
            previous: 7,
            found: 7,
        };
        assert!(
            err.to_string()
                .starts_with("transaction numbers out of sequence")
        );
    }
}
