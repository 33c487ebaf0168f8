use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::session_registry::UploadSessionRegistry;
use crate::core::error::{AppError, Result};

/// Outcome of a persisted chunk
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkReceipt {
    pub upload_id: Uuid,
    pub index: u32,
    pub size: u64,
    pub start: u64,
    pub end: u64,
    pub received_chunks: u32,
    pub total_chunks: u32,
    /// Every chunk of the upload has now been persisted
    pub is_complete: bool,
}

/// Accepts individual chunks, validates them against session metadata and
/// persists them to scratch storage.
pub struct ChunkReceiver {
    registry: Arc<UploadSessionRegistry>,
}

impl ChunkReceiver {
    pub fn new(registry: Arc<UploadSessionRegistry>) -> Self {
        Self { registry }
    }

    /// Validate and persist one chunk. Re-sending an index overwrites the
    /// stored payload and leaves the received set unchanged.
    pub async fn receive_chunk(
        &self,
        upload_id: Uuid,
        index: u32,
        start: u64,
        end: u64,
        payload: Bytes,
    ) -> Result<ChunkReceipt> {
        let lock = self.registry.session_lock(upload_id).await?;
        let _guard = lock.read().await;

        let session = self.registry.get_session(upload_id).await?;
        session.ensure_active()?;

        let (expected_start, expected_end) =
            session
                .chunk_bounds(index)
                .ok_or(AppError::InvalidChunkIndex {
                    index,
                    total_chunks: session.total_chunks,
                })?;

        let actual = payload.len() as u64;
        let expected = expected_end - expected_start;
        if end.checked_sub(start) != Some(actual) || actual != expected {
            return Err(AppError::ChunkSizeMismatch {
                index,
                expected,
                actual,
            });
        }

        if end > session.total_size {
            return Err(AppError::ChunkOutOfRange {
                end,
                total_size: session.total_size,
            });
        }

        if start != expected_start {
            return Err(AppError::Validation(format!(
                "Chunk {} must cover bytes {}..{}, got {}..{}",
                index, expected_start, expected_end, start, end
            )));
        }

        let chunk_store = self.registry.chunk_store();
        let timeout = self.registry.config().chunk_write_timeout;
        match tokio::time::timeout(timeout, chunk_store.write(upload_id, index, payload)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(upload_id = %upload_id, index, "Chunk write timed out");
                return Err(AppError::Timeout(format!(
                    "Writing chunk {} did not finish within {}s",
                    index,
                    timeout.as_secs()
                )));
            }
        }

        let session = match self.registry.mark_chunk_received(upload_id, index).await {
            Ok(session) => session,
            Err(e @ (AppError::InvalidState(_) | AppError::NotFound(_))) => {
                // Cancelled or expired while the payload was in flight
                self.registry.purge_scratch(upload_id).await;
                return Err(match e {
                    AppError::NotFound(_) => AppError::InvalidState(format!(
                        "Upload {} was terminated while chunk {} was being written",
                        upload_id, index
                    )),
                    other => other,
                });
            }
            Err(e) => return Err(e),
        };

        debug!(
            upload_id = %upload_id,
            index,
            size = actual,
            received = session.received_count(),
            total = session.total_chunks,
            "Chunk stored"
        );

        Ok(ChunkReceipt {
            upload_id,
            index,
            size: actual,
            start,
            end,
            received_chunks: session.received_count(),
            total_chunks: session.total_chunks,
            is_complete: session.is_fully_received(),
        })
    }
}
