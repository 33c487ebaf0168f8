use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::assembler::Assembler;
use super::chunk_receiver::ChunkReceiver;
use super::session_registry::UploadSessionRegistry;
use crate::core::error::Result;
use crate::features::uploads::dtos::{
    CancelUploadResponseDto, ChunkUploadResponseDto, FinalizeUploadDto,
    FinalizeUploadResponseDto, InitUploadDto, InitUploadResponseDto, UploadStatusResponseDto,
};
use crate::features::uploads::models::CreateUploadSession;
use crate::modules::storage::ArtifactStore;

/// Entry point for the upload handlers, mapping engine results to DTOs
pub struct UploadService {
    registry: Arc<UploadSessionRegistry>,
    receiver: ChunkReceiver,
    assembler: Assembler,
}

impl UploadService {
    pub fn new(
        registry: Arc<UploadSessionRegistry>,
        artifact_store: Arc<dyn ArtifactStore>,
    ) -> Self {
        let staging_dir = registry.config().staging_dir();
        Self {
            receiver: ChunkReceiver::new(registry.clone()),
            assembler: Assembler::new(registry.clone(), artifact_store, staging_dir),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<UploadSessionRegistry> {
        &self.registry
    }

    /// Largest chunk payload the server accepts
    pub fn max_chunk_size(&self) -> u64 {
        self.registry.config().max_chunk_size
    }

    /// Time allowed for a client to deliver one chunk request body
    pub fn chunk_read_timeout(&self) -> Duration {
        self.registry.config().chunk_read_timeout
    }

    pub async fn initialize(&self, dto: InitUploadDto) -> Result<InitUploadResponseDto> {
        let session = self
            .registry
            .create_session(CreateUploadSession {
                filename: dto.filename,
                total_size: dto.file_size,
                mime_type: dto.mime_type,
                chunk_size: dto.chunk_size,
                associated_entity_id: dto.report_id,
            })
            .await?;

        Ok(session.into())
    }

    pub async fn upload_chunk(
        &self,
        upload_id: Uuid,
        index: u32,
        start: u64,
        end: u64,
        payload: Bytes,
    ) -> Result<ChunkUploadResponseDto> {
        let receipt = self
            .receiver
            .receive_chunk(upload_id, index, start, end, payload)
            .await?;
        Ok(receipt.into())
    }

    pub async fn finalize(&self, dto: FinalizeUploadDto) -> Result<FinalizeUploadResponseDto> {
        let file = self
            .assembler
            .finalize(dto.upload_id, dto.filename.as_deref())
            .await?;
        Ok(file.into())
    }

    pub async fn cancel(&self, upload_id: Uuid) -> Result<CancelUploadResponseDto> {
        let session = self.registry.cancel_session(upload_id).await?;
        Ok(CancelUploadResponseDto {
            upload_id: session.upload_id,
            status: session.status,
        })
    }

    pub async fn status(&self, upload_id: Uuid) -> Result<UploadStatusResponseDto> {
        let session = self.registry.get_session(upload_id).await?;
        Ok(session.into())
    }
}
