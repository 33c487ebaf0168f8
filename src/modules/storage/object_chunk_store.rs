use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::chunk_store::ChunkStore;
use super::minio_client::MinIOClient;
use crate::core::error::{AppError, Result};

/// Chunk store backed by object storage: `<prefix>/<upload_id>/<index>`
///
/// Lets several server processes share scratch state for one upload.
pub struct MinIOChunkStore {
    client: Arc<MinIOClient>,
    prefix: String,
}

impl MinIOChunkStore {
    pub fn new(client: Arc<MinIOClient>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    fn session_prefix(&self, upload_id: Uuid) -> String {
        format!("{}/{}/", self.prefix, upload_id)
    }

    fn chunk_key(&self, upload_id: Uuid, index: u32) -> String {
        format!("{}{:06}", self.session_prefix(upload_id), index)
    }
}

#[async_trait]
impl ChunkStore for MinIOChunkStore {
    async fn allocate(&self, _upload_id: Uuid) -> Result<()> {
        // Object storage has no directories to create
        Ok(())
    }

    async fn write(&self, upload_id: Uuid, index: u32, payload: Bytes) -> Result<()> {
        let key = self.chunk_key(upload_id, index);
        self.client
            .upload(&key, &payload, "application/octet-stream")
            .await
    }

    async fn read(&self, upload_id: Uuid, index: u32) -> Result<Bytes> {
        let key = self.chunk_key(upload_id, index);
        match self.client.download(&key).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(AppError::NotFound(_)) => Err(AppError::NotFound(format!(
                "Chunk {} of upload {} is not stored",
                index, upload_id
            ))),
            Err(e) => Err(e),
        }
    }

    async fn purge(&self, upload_id: Uuid) -> Result<()> {
        let keys = self.client.list_keys(&self.session_prefix(upload_id)).await?;
        for key in &keys {
            self.client.delete(key).await?;
        }
        debug!("Purged {} chunk objects for upload {}", keys.len(), upload_id);
        Ok(())
    }
}
