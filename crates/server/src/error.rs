//! Upload error taxonomy.
//!
//! Every failure surfaced by the coordinator is one of these kinds. The
//! HTTP layer renders them as `{ "code": <kind>, "message": <text> }`.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use stowage_metadata::MetadataError;
use stowage_storage::StorageError;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Stable error kind for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// Upload coordinator error type.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// State machine violation, including races lost to another actor.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// The chunk store has not received every declared byte yet.
    #[error("upload incomplete: {received} of {declared} bytes received")]
    UploadIncomplete { received: u64, declared: u64 },

    /// I/O, length or checksum failure while promoting. The session has
    /// been moved to `failed` before this is returned.
    #[error("promotion failed: {0}")]
    ChecksumOrStoreFailure(String),

    #[error("chunk store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl UploadError {
    /// Stable snake_case identifier of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::NotFound(_) => "not_found",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::UploadIncomplete { .. } => "upload_incomplete",
            Self::ChecksumOrStoreFailure(_) => "checksum_or_store_failure",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidTransition(_) => StatusCode::CONFLICT,
            Self::UploadIncomplete { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ChecksumOrStoreFailure(_) => StatusCode::BAD_GATEWAY,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether retrying the same call later may succeed without any other
    /// action from the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Map an error reported by the chunk store.
    ///
    /// Backend failures become `StoreUnavailable`; a missing or malformed
    /// handle is `NotFound`.
    pub fn from_chunk_store(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) | StorageError::InvalidKey(id) => {
                Self::NotFound(format!("chunk upload {id}"))
            }
            StorageError::NotComplete(id) => {
                Self::InvalidTransition(format!("chunk upload {id} is not complete"))
            }
            StorageError::Io(e) => Self::StoreUnavailable(e.to_string()),
            StorageError::Unavailable(msg) => Self::StoreUnavailable(msg),
            other => Self::Internal(other.to_string()),
        }
    }

    /// Message safe to return to callers. Internal details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<MetadataError> for UploadError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::NotFound(what) => Self::NotFound(what),
            MetadataError::Constraint(msg) => Self::InvalidTransition(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<stowage_core::Error> for UploadError {
    fn from(err: stowage_core::Error) -> Self {
        use stowage_core::Error;
        match err {
            Error::InvalidTransition { from, to } => {
                Self::InvalidTransition(format!("session cannot move from {from} to {to}"))
            }
            Error::InvalidArgument(_)
            | Error::InvalidSessionId(_)
            | Error::InvalidChunkUploadId(_) => Self::InvalidArgument(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<JsonRejection> for UploadError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidArgument(rejection.body_text())
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.kind(), error = %self, "request failed");
        }
        crate::metrics::record_upload_error(self.kind());

        let body = ErrorResponse {
            code: self.kind().to_string(),
            message: self.public_message(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for coordinator operations and handlers.
pub type UploadResult<T> = std::result::Result<T, UploadError>;

#[cfg(test)]
mod tests {
    use super::*;
    use stowage_core::UploadStatus;

    #[test]
    fn test_kinds_are_stable() {
        assert_eq!(
            UploadError::InvalidArgument("x".into()).kind(),
            "invalid_argument"
        );
        assert_eq!(
            UploadError::UploadIncomplete {
                received: 1,
                declared: 2
            }
            .kind(),
            "upload_incomplete"
        );
        assert_eq!(
            UploadError::ChecksumOrStoreFailure("x".into()).kind(),
            "checksum_or_store_failure"
        );
    }

    #[test]
    fn test_only_store_unavailable_is_retryable() {
        assert!(UploadError::StoreUnavailable("down".into()).is_retryable());
        assert!(!UploadError::ChecksumOrStoreFailure("io".into()).is_retryable());
        assert!(!UploadError::InvalidTransition("done".into()).is_retryable());
    }

    #[test]
    fn test_chunk_store_errors_map_to_taxonomy() {
        let io = std::io::Error::other("disk gone");
        assert!(matches!(
            UploadError::from_chunk_store(StorageError::Io(io)),
            UploadError::StoreUnavailable(_)
        ));
        assert!(matches!(
            UploadError::from_chunk_store(StorageError::NotFound("abc".into())),
            UploadError::NotFound(_)
        ));
        assert!(matches!(
            UploadError::from_chunk_store(StorageError::Unavailable("corrupt".into())),
            UploadError::StoreUnavailable(_)
        ));
    }

    #[test]
    fn test_metadata_errors_map_to_taxonomy() {
        assert!(matches!(
            UploadError::from(MetadataError::NotFound("session".into())),
            UploadError::NotFound(_)
        ));
        assert!(matches!(
            UploadError::from(MetadataError::Constraint("dup".into())),
            UploadError::InvalidTransition(_)
        ));
        assert!(matches!(
            UploadError::from(MetadataError::Internal("boom".into())),
            UploadError::Internal(_)
        ));
    }

    #[test]
    fn test_state_machine_rejection_maps_to_invalid_transition() {
        let err = UploadError::from(
            UploadStatus::Cancelled
                .transition(UploadStatus::Completed)
                .unwrap_err(),
        );
        assert_eq!(err.kind(), "invalid_transition");
        assert_eq!(
            err.to_string(),
            "invalid transition: session cannot move from cancelled to completed"
        );
    }

    #[test]
    fn test_internal_details_are_not_exposed() {
        let err = UploadError::Internal("pool timed out at /var/lib/stowage/metadata.db".into());
        assert_eq!(err.public_message(), "internal error");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
