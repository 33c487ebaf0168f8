use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::features::uploads::models::{UploadSession, UploadStatus};
use crate::features::uploads::services::{AssembledFile, ChunkReceipt};

/// Request DTO for opening an upload session
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadDto {
    /// Original filename; path components are stripped
    #[validate(length(min = 1, max = 1024, message = "filename is required"))]
    #[schema(example = "claim-form.pdf")]
    pub filename: String,
    /// Declared size of the complete file in bytes
    #[validate(range(min = 1, message = "fileSize must be greater than zero"))]
    #[schema(example = 15728640)]
    pub file_size: u64,
    #[validate(length(min = 1, message = "mimeType is required"))]
    #[schema(example = "application/pdf")]
    pub mime_type: String,
    /// Report the finished document should be attached to
    pub report_id: Option<Uuid>,
    /// Requested chunk size; the server default applies when omitted
    pub chunk_size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadResponseDto {
    pub upload_id: Uuid,
    pub filename: String,
    /// Bytes per chunk; only the last chunk may be shorter
    pub chunk_size: u64,
    pub total_chunks: u32,
    /// Indices already persisted, always empty for a fresh session
    pub uploaded_chunks: Vec<u32>,
    pub resumable: bool,
    pub status: UploadStatus,
}

impl From<UploadSession> for InitUploadResponseDto {
    fn from(session: UploadSession) -> Self {
        Self {
            uploaded_chunks: session.received_chunks.iter().copied().collect(),
            upload_id: session.upload_id,
            filename: session.filename,
            chunk_size: session.chunk_size,
            total_chunks: session.total_chunks,
            resumable: true,
            status: session.status,
        }
    }
}

/// Chunk upload form for OpenAPI documentation.
/// The handler reads the multipart body directly.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[allow(dead_code)]
pub struct UploadChunkDto {
    pub upload_id: Uuid,
    /// Zero-based chunk index
    pub chunk_index: u32,
    /// Inclusive start offset of the chunk in the file
    pub start: u64,
    /// Exclusive end offset of the chunk in the file
    pub end: u64,
    /// Raw chunk bytes
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub chunk: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadResponseDto {
    pub upload_id: Uuid,
    pub chunk_index: u32,
    /// Bytes stored for this chunk
    pub received: u64,
    pub start: u64,
    pub end: u64,
    pub received_chunks: u32,
    pub total_chunks: u32,
    /// True once every chunk has been stored
    pub is_complete: bool,
}

impl From<ChunkReceipt> for ChunkUploadResponseDto {
    fn from(receipt: ChunkReceipt) -> Self {
        Self {
            upload_id: receipt.upload_id,
            chunk_index: receipt.index,
            received: receipt.size,
            start: receipt.start,
            end: receipt.end,
            received_chunks: receipt.received_chunks,
            total_chunks: receipt.total_chunks,
            is_complete: receipt.is_complete,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeUploadDto {
    pub upload_id: Uuid,
    /// Optional final filename, replacing the one given at initialize
    #[validate(length(min = 1, max = 1024, message = "filename must not be empty"))]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeUploadResponseDto {
    /// Identifier of the stored document, equal to the upload id
    pub id: Uuid,
    pub filename: String,
    pub size: u64,
    pub mime_type: String,
    /// Path or URL of the assembled file
    pub location: String,
    /// Lowercase hex SHA-256 of the file contents
    pub checksum: String,
    pub report_id: Option<Uuid>,
    pub completed_at: DateTime<Utc>,
}

impl From<AssembledFile> for FinalizeUploadResponseDto {
    fn from(file: AssembledFile) -> Self {
        Self {
            id: file.upload_id,
            filename: file.filename,
            size: file.size,
            mime_type: file.mime_type,
            location: file.location,
            checksum: file.checksum,
            report_id: file.associated_entity_id,
            completed_at: file.completed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CancelUploadResponseDto {
    pub upload_id: Uuid,
    pub status: UploadStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatusResponseDto {
    pub upload_id: Uuid,
    pub filename: String,
    pub status: UploadStatus,
    pub file_size: u64,
    pub mime_type: String,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub received_chunks: Vec<u32>,
    pub missing_chunks: Vec<u32>,
    pub progress_percent: f64,
    pub report_id: Option<Uuid>,
    pub location: Option<String>,
    pub checksum: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl From<UploadSession> for UploadStatusResponseDto {
    fn from(session: UploadSession) -> Self {
        Self {
            received_chunks: session.received_chunks.iter().copied().collect(),
            missing_chunks: session.missing_chunks(),
            progress_percent: session.progress_percent(),
            upload_id: session.upload_id,
            filename: session.filename,
            status: session.status,
            file_size: session.total_size,
            mime_type: session.mime_type,
            chunk_size: session.chunk_size,
            total_chunks: session.total_chunks,
            report_id: session.associated_entity_id,
            location: session.final_location,
            checksum: session.checksum,
            created_at: session.created_at,
            last_activity_at: session.last_activity_at,
        }
    }
}
