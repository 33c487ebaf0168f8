use utoipa::{Modify, OpenApi};

use crate::features::uploads::{dtos as uploads_dtos, handlers as uploads_handlers, models};
use crate::shared::types::{ApiResponse, ResponseStatus};

#[derive(OpenApi)]
#[openapi(
    paths(
        uploads_handlers::initialize_upload,
        uploads_handlers::upload_chunk,
        uploads_handlers::finalize_upload,
        uploads_handlers::cancel_upload,
        uploads_handlers::get_upload_status,
    ),
    components(
        schemas(
            ResponseStatus,
            models::UploadStatus,
            uploads_dtos::InitUploadDto,
            uploads_dtos::InitUploadResponseDto,
            uploads_dtos::UploadChunkDto,
            uploads_dtos::ChunkUploadResponseDto,
            uploads_dtos::FinalizeUploadDto,
            uploads_dtos::FinalizeUploadResponseDto,
            uploads_dtos::CancelUploadResponseDto,
            uploads_dtos::UploadStatusResponseDto,
            ApiResponse<uploads_dtos::InitUploadResponseDto>,
            ApiResponse<uploads_dtos::ChunkUploadResponseDto>,
            ApiResponse<uploads_dtos::FinalizeUploadResponseDto>,
            ApiResponse<uploads_dtos::CancelUploadResponseDto>,
            ApiResponse<uploads_dtos::UploadStatusResponseDto>,
        )
    ),
    tags(
        (name = "uploads", description = "Chunked, resumable document uploads"),
    ),
    info(
        title = "Claimdoc API",
        version = "0.1.0",
        description = "API documentation for Claimdoc",
    )
)]
pub struct ApiDoc;

/// Modifier to override OpenAPI info from config
pub struct SwaggerInfoModifier {
    pub title: String,
    pub version: String,
    pub description: String,
}

impl Modify for SwaggerInfoModifier {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        openapi.info.title = self.title.clone();
        openapi.info.version = self.version.clone();
        openapi.info.description = Some(self.description.clone());
    }
}
