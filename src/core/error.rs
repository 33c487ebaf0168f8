use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::features::uploads::models::UploadStatus;
use crate::shared::types::ApiResponse;

/// Message returned to clients when an assembled file fails verification.
pub const INTEGRITY_FAILURE_MESSAGE: &str =
    "Upload failed integrity check, please retry from the beginning";

#[derive(Debug, Error)]
#[allow(dead_code)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Chunk index {index} is out of bounds (total chunks: {total_chunks})")]
    InvalidChunkIndex { index: u32, total_chunks: u32 },

    #[error("Chunk {index} has {actual} bytes, expected {expected}")]
    ChunkSizeMismatch {
        index: u32,
        expected: u64,
        actual: u64,
    },

    #[error("Chunk end offset {end} exceeds declared file size {total_size}")]
    ChunkOutOfRange { end: u64, total_size: u64 },

    #[error("Upload is incomplete, missing chunks: {missing:?}")]
    IncompleteUpload { missing: Vec<u32> },

    #[error("Invalid upload state: {0}")]
    InvalidState(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: UploadStatus, to: UploadStatus },

    #[error("Assembly integrity error: {0}")]
    AssemblyIntegrity(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Machine-readable error code placed in the response envelope
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) | AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Validation(_)
            | AppError::InvalidChunkIndex { .. }
            | AppError::ChunkSizeMismatch { .. }
            | AppError::ChunkOutOfRange { .. } => "VALIDATION_ERROR",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            AppError::IncompleteUpload { .. } => "INCOMPLETE_UPLOAD",
            AppError::InvalidState(_) => "INVALID_STATE",
            AppError::InvalidTransition { .. } => "INVALID_TRANSITION",
            AppError::AssemblyIntegrity(_) => "PROCESSING_ERROR",
            AppError::Storage(_) => "STORAGE_UNAVAILABLE",
            AppError::Timeout(_) => "TIMEOUT",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_)
            | AppError::BadRequest(_)
            | AppError::InvalidChunkIndex { .. }
            | AppError::ChunkSizeMismatch { .. }
            | AppError::ChunkOutOfRange { .. } => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::IncompleteUpload { .. }
            | AppError::InvalidState(_)
            | AppError::InvalidTransition { .. } => StatusCode::CONFLICT,
            AppError::AssemblyIntegrity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        let (message, errors) = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
                ("Database error occurred".to_string(), None)
            }
            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                ("Internal server error".to_string(), None)
            }
            AppError::Storage(ref msg) => {
                tracing::warn!("Storage unavailable: {}", msg);
                (
                    "Storage temporarily unavailable, please retry".to_string(),
                    None,
                )
            }
            AppError::AssemblyIntegrity(ref msg) => {
                tracing::error!("Assembly integrity failure: {}", msg);
                (INTEGRITY_FAILURE_MESSAGE.to_string(), Some(vec![msg.clone()]))
            }
            AppError::Validation(ref msg) => (msg.clone(), Some(vec![msg.clone()])),
            AppError::IncompleteUpload { ref missing } => (
                self.to_string(),
                Some(missing.iter().map(|i| format!("missing chunk {}", i)).collect()),
            ),
            ref other => (other.to_string(), None),
        };

        let body = Json(ApiResponse::<()>::error(code, message, errors));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
