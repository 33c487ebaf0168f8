//! Final storage for assembled uploads
//!
//! The assembler builds the complete file in a local staging path and hands
//! it to an [`ArtifactStore`], which decides where the finished document lives.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::minio_client::MinIOClient;
use crate::core::error::{AppError, Result};

/// Where a persisted artifact ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    /// Store-relative key, used for removal
    pub key: String,
    /// Path or URL handed back to the caller
    pub location: String,
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Take ownership of the staged file and store it as the final artifact.
    ///
    /// `attempt` identifies one finalize call; concurrent attempts for the
    /// same upload never share a key.
    async fn persist(
        &self,
        upload_id: Uuid,
        attempt: Uuid,
        filename: &str,
        mime_type: &str,
        staged: &Path,
    ) -> Result<StoredArtifact>;

    /// Delete a previously persisted artifact
    async fn remove(&self, key: &str) -> Result<()>;
}

// =============================================================================
// LOCAL DISK
// =============================================================================

/// Artifact store on the local filesystem: `<root>/<upload_id>/<attempt>/<filename>`
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn persist(
        &self,
        upload_id: Uuid,
        attempt: Uuid,
        filename: &str,
        _mime_type: &str,
        staged: &Path,
    ) -> Result<StoredArtifact> {
        let key = format!("{}/{}/{}", upload_id, attempt, filename);
        let destination = self.root.join(&key);
        let Some(dir) = destination.parent() else {
            return Err(AppError::Storage(format!("Invalid artifact key '{}'", key)));
        };
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            AppError::Storage(format!("Failed to create '{}': {}", dir.display(), e))
        })?;

        // Staging and artifact roots normally share a filesystem; fall back to
        // copy when they don't.
        if tokio::fs::rename(staged, &destination).await.is_err() {
            tokio::fs::copy(staged, &destination).await.map_err(|e| {
                AppError::Storage(format!(
                    "Failed to move assembled file to '{}': {}",
                    destination.display(),
                    e
                ))
            })?;
            let _ = tokio::fs::remove_file(staged).await;
        }

        info!(
            "Stored assembled upload {} at {}",
            upload_id,
            destination.display()
        );

        Ok(StoredArtifact {
            location: destination.to_string_lossy().into_owned(),
            key,
        })
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.root.join(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(AppError::Storage(format!(
                    "Failed to remove '{}': {}",
                    path.display(),
                    e
                )))
            }
        }

        // Prune the attempt and upload directories once they are empty
        for dir in path.ancestors().skip(1) {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            if tokio::fs::remove_dir(dir).await.is_err() {
                break;
            }
        }
        debug!("Removed artifact {}", key);
        Ok(())
    }
}

// =============================================================================
// OBJECT STORAGE
// =============================================================================

/// Artifact store on MinIO/S3: `<prefix>/<upload_id>/<attempt>/<filename>`
pub struct MinIOArtifactStore {
    client: Arc<MinIOClient>,
    prefix: String,
}

impl MinIOArtifactStore {
    pub fn new(client: Arc<MinIOClient>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl ArtifactStore for MinIOArtifactStore {
    async fn persist(
        &self,
        upload_id: Uuid,
        attempt: Uuid,
        filename: &str,
        mime_type: &str,
        staged: &Path,
    ) -> Result<StoredArtifact> {
        let data = tokio::fs::read(staged).await.map_err(|e| {
            AppError::Storage(format!(
                "Failed to read staged file '{}': {}",
                staged.display(),
                e
            ))
        })?;

        let key = format!("{}/{}/{}/{}", self.prefix, upload_id, attempt, filename);
        self.client.upload(&key, &data, mime_type).await?;
        let _ = tokio::fs::remove_file(staged).await;

        info!(
            "Stored assembled upload {} in bucket '{}' as {}",
            upload_id,
            self.client.bucket_name(),
            key
        );

        Ok(StoredArtifact {
            location: self.client.get_file_url(&key),
            key,
        })
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.client.delete(key).await
    }
}
