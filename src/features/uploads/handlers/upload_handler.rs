use axum::{
    extract::{multipart::Field, Multipart, State},
    http::StatusCode,
    Json,
};
use bytes::Bytes;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;
use validator::Validate;

use crate::core::error::AppError;
use crate::core::extractor::{AppJson, AppPath};
use crate::features::uploads::dtos::{
    CancelUploadResponseDto, ChunkUploadResponseDto, FinalizeUploadDto,
    FinalizeUploadResponseDto, InitUploadDto, InitUploadResponseDto, UploadChunkDto,
    UploadStatusResponseDto,
};
use crate::features::uploads::services::UploadService;
use crate::shared::types::ApiResponse;

/// Open a chunked upload session
#[utoipa::path(
    post,
    path = "/api/uploads/init",
    tag = "uploads",
    request_body = InitUploadDto,
    responses(
        (status = 201, description = "Upload session created", body = ApiResponse<InitUploadResponseDto>),
        (status = 400, description = "Invalid filename, size, type or chunk size"),
        (status = 413, description = "Declared file size exceeds the maximum")
    )
)]
pub async fn initialize_upload(
    State(service): State<Arc<UploadService>>,
    AppJson(dto): AppJson<InitUploadDto>,
) -> Result<(StatusCode, Json<ApiResponse<InitUploadResponseDto>>), AppError> {
    dto.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let response = service.initialize(dto).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(Some(response), None)),
    ))
}

/// Upload one chunk of an open session
///
/// Accepts multipart/form-data with `uploadId`, `chunkIndex`, `start`,
/// `end` and the raw bytes in `chunk`. Re-sending a chunk overwrites it.
#[utoipa::path(
    post,
    path = "/api/uploads/chunk",
    tag = "uploads",
    request_body(
        content = UploadChunkDto,
        content_type = "multipart/form-data",
        description = "Chunk bytes with their index and byte range",
    ),
    responses(
        (status = 200, description = "Chunk stored", body = ApiResponse<ChunkUploadResponseDto>),
        (status = 400, description = "Chunk index, size or range is invalid"),
        (status = 404, description = "Upload session not found"),
        (status = 409, description = "Upload session is no longer active"),
        (status = 503, description = "Scratch storage unavailable, retry"),
        (status = 504, description = "Chunk body or write timed out, retry")
    )
)]
pub async fn upload_chunk(
    State(service): State<Arc<UploadService>>,
    multipart: Multipart,
) -> Result<Json<ApiResponse<ChunkUploadResponseDto>>, AppError> {
    let read_timeout = service.chunk_read_timeout();
    let form = tokio::time::timeout(read_timeout, read_chunk_form(multipart))
        .await
        .map_err(|_| {
            debug!("Chunk body not received within {:?}", read_timeout);
            AppError::Timeout(format!(
                "Chunk body not received within {}s",
                read_timeout.as_secs_f64()
            ))
        })??;

    let response = service
        .upload_chunk(form.upload_id, form.chunk_index, form.start, form.end, form.payload)
        .await?;

    Ok(Json(ApiResponse::success(Some(response), None)))
}

struct ChunkForm {
    upload_id: Uuid,
    chunk_index: u32,
    start: u64,
    end: u64,
    payload: Bytes,
}

async fn read_chunk_form(mut multipart: Multipart) -> Result<ChunkForm, AppError> {
    let mut upload_id: Option<Uuid> = None;
    let mut chunk_index: Option<u32> = None;
    let mut start: Option<u64> = None;
    let mut end: Option<u64> = None;
    let mut payload: Option<Bytes> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        debug!("Failed to read multipart field: {}", e);
        AppError::BadRequest(format!("Failed to read multipart data: {}", e))
    })? {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "uploadId" => upload_id = Some(parse_field(field, "uploadId").await?),
            "chunkIndex" => chunk_index = Some(parse_field(field, "chunkIndex").await?),
            "start" => start = Some(parse_field(field, "start").await?),
            "end" => end = Some(parse_field(field, "end").await?),
            "chunk" => {
                let data = field.bytes().await.map_err(|e| {
                    debug!("Failed to read chunk bytes: {}", e);
                    AppError::BadRequest(format!("Failed to read chunk data: {}", e))
                })?;
                payload = Some(data);
            }
            _ => {
                debug!("Ignoring unknown field: {}", field_name);
            }
        }
    }

    Ok(ChunkForm {
        upload_id: upload_id
            .ok_or_else(|| AppError::Validation("uploadId is required".to_string()))?,
        chunk_index: chunk_index
            .ok_or_else(|| AppError::Validation("chunkIndex is required".to_string()))?,
        start: start.ok_or_else(|| AppError::Validation("start is required".to_string()))?,
        end: end.ok_or_else(|| AppError::Validation("end is required".to_string()))?,
        payload: payload.ok_or_else(|| AppError::Validation("chunk is required".to_string()))?,
    })
}

async fn parse_field<T: FromStr>(field: Field<'_>, name: &str) -> Result<T, AppError> {
    let text = field
        .text()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read {} field: {}", name, e)))?;

    text.trim()
        .parse::<T>()
        .map_err(|_| AppError::Validation(format!("{} has an invalid value: '{}'", name, text)))
}

/// Assemble a fully uploaded session into the final file
#[utoipa::path(
    post,
    path = "/api/uploads/finalize",
    tag = "uploads",
    request_body = FinalizeUploadDto,
    responses(
        (status = 200, description = "File assembled", body = ApiResponse<FinalizeUploadResponseDto>),
        (status = 404, description = "Upload session not found"),
        (status = 409, description = "Chunks missing or session not active"),
        (status = 422, description = "Upload failed integrity check")
    )
)]
pub async fn finalize_upload(
    State(service): State<Arc<UploadService>>,
    AppJson(dto): AppJson<FinalizeUploadDto>,
) -> Result<Json<ApiResponse<FinalizeUploadResponseDto>>, AppError> {
    dto.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let response = service.finalize(dto).await?;
    Ok(Json(ApiResponse::success(
        Some(response),
        Some("Upload completed".to_string()),
    )))
}

/// Cancel an upload and discard its stored chunks
#[utoipa::path(
    delete,
    path = "/api/uploads/{upload_id}",
    tag = "uploads",
    params(
        ("upload_id" = Uuid, Path, description = "Upload session ID")
    ),
    responses(
        (status = 200, description = "Upload cancelled", body = ApiResponse<CancelUploadResponseDto>),
        (status = 400, description = "Upload ID is not a UUID"),
        (status = 404, description = "Upload session not found")
    )
)]
pub async fn cancel_upload(
    State(service): State<Arc<UploadService>>,
    AppPath(upload_id): AppPath<Uuid>,
) -> Result<Json<ApiResponse<CancelUploadResponseDto>>, AppError> {
    let response = service.cancel(upload_id).await?;
    Ok(Json(ApiResponse::success(
        Some(response),
        Some("Upload cancelled".to_string()),
    )))
}

/// Get upload progress, used by clients to resume
#[utoipa::path(
    get,
    path = "/api/uploads/{upload_id}",
    tag = "uploads",
    params(
        ("upload_id" = Uuid, Path, description = "Upload session ID")
    ),
    responses(
        (status = 200, description = "Upload session status", body = ApiResponse<UploadStatusResponseDto>),
        (status = 400, description = "Upload ID is not a UUID"),
        (status = 404, description = "Upload session not found")
    )
)]
pub async fn get_upload_status(
    State(service): State<Arc<UploadService>>,
    AppPath(upload_id): AppPath<Uuid>,
) -> Result<Json<ApiResponse<UploadStatusResponseDto>>, AppError> {
    let response = service.status(upload_id).await?;
    Ok(Json(ApiResponse::success(Some(response), None)))
}
