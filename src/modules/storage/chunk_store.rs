//! Scratch storage for in-flight upload chunks
//!
//! Every chunk is stored under its own key `(upload_id, index)`, so writes to
//! different indices never interfere and a rewrite of the same index simply
//! replaces the previous payload.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::error::{AppError, Result};

/// Capability for persisting, reading back and discarding chunk payloads
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Reserve the scratch namespace of a new session
    async fn allocate(&self, upload_id: Uuid) -> Result<()>;

    /// Store the payload of one chunk, replacing any earlier write of the same index
    async fn write(&self, upload_id: Uuid, index: u32, payload: Bytes) -> Result<()>;

    /// Read a stored chunk back; `NotFound` if it was never written
    async fn read(&self, upload_id: Uuid, index: u32) -> Result<Bytes>;

    /// Remove every chunk of a session. Unknown sessions are a no-op.
    async fn purge(&self, upload_id: Uuid) -> Result<()>;
}

fn storage_error(action: &str, path: &std::path::Path, e: std::io::Error) -> AppError {
    AppError::Storage(format!("Failed to {} '{}': {}", action, path.display(), e))
}

// =============================================================================
// LOCAL DISK
// =============================================================================

/// Chunk store on the local filesystem: `<root>/<upload_id>/<index>.chunk`
pub struct LocalChunkStore {
    root: PathBuf,
}

impl LocalChunkStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn session_dir(&self, upload_id: Uuid) -> PathBuf {
        self.root.join(upload_id.to_string())
    }

    fn chunk_path(&self, upload_id: Uuid, index: u32) -> PathBuf {
        self.session_dir(upload_id)
            .join(format!("{:06}.chunk", index))
    }
}

#[async_trait]
impl ChunkStore for LocalChunkStore {
    async fn allocate(&self, upload_id: Uuid) -> Result<()> {
        let dir = self.session_dir(upload_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| storage_error("create scratch directory", &dir, e))
    }

    async fn write(&self, upload_id: Uuid, index: u32, payload: Bytes) -> Result<()> {
        let dir = self.session_dir(upload_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| storage_error("create scratch directory", &dir, e))?;

        // Write to a private temp file, then rename over the final name so a
        // concurrent reader never observes a partially written chunk.
        let final_path = self.chunk_path(upload_id, index);
        let temp_path = dir.join(format!("{:06}.{}.part", index, Uuid::new_v4()));

        if let Err(e) = tokio::fs::write(&temp_path, &payload).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(storage_error("write chunk", &temp_path, e));
        }

        if let Err(e) = tokio::fs::rename(&temp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(storage_error("commit chunk", &final_path, e));
        }

        debug!(
            "Stored chunk {} of upload {} ({} bytes)",
            index,
            upload_id,
            payload.len()
        );
        Ok(())
    }

    async fn read(&self, upload_id: Uuid, index: u32) -> Result<Bytes> {
        let path = self.chunk_path(upload_id, index);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(AppError::NotFound(format!(
                "Chunk {} of upload {} is not stored",
                index, upload_id
            ))),
            Err(e) => Err(storage_error("read chunk", &path, e)),
        }
    }

    async fn purge(&self, upload_id: Uuid) -> Result<()> {
        let dir = self.session_dir(upload_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!("Purged scratch directory for upload {}", upload_id);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!("Failed to purge scratch for upload {}: {}", upload_id, e);
                Err(storage_error("purge scratch directory", &dir, e))
            }
        }
    }
}

// =============================================================================
// IN MEMORY
// =============================================================================

/// Chunk store held in process memory
#[derive(Default)]
pub struct MemoryChunkStore {
    chunks: RwLock<HashMap<Uuid, HashMap<u32, Bytes>>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chunks currently held for a session
    #[cfg(test)]
    pub async fn stored_chunks(&self, upload_id: Uuid) -> usize {
        self.chunks
            .read()
            .await
            .get(&upload_id)
            .map(|c| c.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn allocate(&self, upload_id: Uuid) -> Result<()> {
        self.chunks.write().await.entry(upload_id).or_default();
        Ok(())
    }

    async fn write(&self, upload_id: Uuid, index: u32, payload: Bytes) -> Result<()> {
        self.chunks
            .write()
            .await
            .entry(upload_id)
            .or_default()
            .insert(index, payload);
        Ok(())
    }

    async fn read(&self, upload_id: Uuid, index: u32) -> Result<Bytes> {
        self.chunks
            .read()
            .await
            .get(&upload_id)
            .and_then(|c| c.get(&index))
            .cloned()
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "Chunk {} of upload {} is not stored",
                    index, upload_id
                ))
            })
    }

    async fn purge(&self, upload_id: Uuid) -> Result<()> {
        self.chunks.write().await.remove(&upload_id);
        Ok(())
    }
}
