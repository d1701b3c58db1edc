use crate::model::ResponseEnvelope;
use artifacts::StorageError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use detector::DetectorError;
use std::time::Duration;
use thiserror::Error;

/// Reasons an upload is refused before any file is written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please select a file")]
    MissingFile,

    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("File is larger than the {} MB upload limit", .limit / (1024 * 1024))]
    OversizedFile { limit: u64 },
}

impl ValidationError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ValidationError::MissingFile | ValidationError::UnsupportedType(_) => {
                StatusCode::BAD_REQUEST
            }
            ValidationError::OversizedFile { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

/// Failure of a single file inside a detection request.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Storage unavailable: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Inference(#[from] DetectorError),

    #[error("Detection exceeded {0:?}")]
    Timeout(Duration),

    #[error("Detection task failed: {0}")]
    Aborted(String),
}

impl PipelineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::Validation(e) => e.status_code(),
            PipelineError::Storage(_)
            | PipelineError::Inference(_)
            | PipelineError::Timeout(_)
            | PipelineError::Aborted(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to clients. Internal detail is only logged.
    pub fn public_message(&self) -> String {
        match self {
            PipelineError::Validation(e) => e.to_string(),
            PipelineError::Storage(_) => "Failed to save file".to_string(),
            PipelineError::Inference(DetectorError::Decode(_)) => {
                "File could not be decoded".to_string()
            }
            PipelineError::Inference(_) | PipelineError::Aborted(_) => {
                "Object detection failed".to_string()
            }
            PipelineError::Timeout(_) => "Object detection timed out".to_string(),
        }
    }

    /// Short label used as a metric attribute.
    pub fn reason(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "validation",
            PipelineError::Storage(_) => "storage",
            PipelineError::Inference(_) => "inference",
            PipelineError::Timeout(_) => "timeout",
            PipelineError::Aborted(_) => "aborted",
        }
    }
}

/// Request-level failures, rendered with the detection envelope shape.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("At most {0} files may be uploaded at once")]
    TooManyFiles(usize),

    #[error("Malformed upload: {message}")]
    Multipart { status: StatusCode, message: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Detection model is not available")]
    ModelUnavailable,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(e) => e.status_code(),
            ApiError::TooManyFiles(_) | ApiError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            ApiError::Multipart { status, .. } => *status,
            ApiError::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match self {
            ApiError::Internal(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        ApiError::Multipart {
            status: err.status(),
            message: err.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        let body = ResponseEnvelope::failure(self.public_message());
        (status, Json(body)).into_response()
    }
}
