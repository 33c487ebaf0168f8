use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::session_registry::UploadSessionRegistry;
use crate::core::error::{AppError, Result};
use crate::features::uploads::models::{UploadSession, UploadStatus};
use crate::modules::storage::ArtifactStore;
use crate::shared::validation::sanitize_filename;

/// A finished upload, as handed back to the caller of finalize
#[derive(Debug, Clone)]
pub struct AssembledFile {
    pub upload_id: Uuid,
    pub filename: String,
    pub size: u64,
    pub mime_type: String,
    pub location: String,
    /// Lowercase hex SHA-256 of the assembled bytes
    pub checksum: String,
    pub associated_entity_id: Option<Uuid>,
    pub completed_at: DateTime<Utc>,
}

/// Joins the stored chunks of a session into the final file
pub struct Assembler {
    registry: Arc<UploadSessionRegistry>,
    artifact_store: Arc<dyn ArtifactStore>,
    staging_dir: PathBuf,
}

impl Assembler {
    pub fn new(
        registry: Arc<UploadSessionRegistry>,
        artifact_store: Arc<dyn ArtifactStore>,
        staging_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            artifact_store,
            staging_dir: staging_dir.into(),
        }
    }

    /// Assemble, verify and persist a fully received upload.
    ///
    /// Chunks are appended strictly in index order. A failed integrity check
    /// moves the session to `failed`; transient storage errors leave it
    /// `in_progress` so finalize can be retried.
    pub async fn finalize(
        &self,
        upload_id: Uuid,
        filename_override: Option<&str>,
    ) -> Result<AssembledFile> {
        let lock = self.registry.session_lock(upload_id).await?;
        let _guard = lock.write().await;

        let session = self.registry.get_session(upload_id).await?;
        session.ensure_active()?;

        if !session.is_fully_received() {
            return Err(AppError::IncompleteUpload {
                missing: session.missing_chunks(),
            });
        }

        let filename = match filename_override {
            Some(raw) => sanitize_filename(raw).ok_or_else(|| {
                AppError::Validation("filename must not be empty after sanitization".to_string())
            })?,
            None => session.filename.clone(),
        };

        // Replicas may finalize the same upload concurrently; each attempt
        // stages and persists under its own name.
        let attempt = Uuid::now_v7();
        let staged = self
            .staging_dir
            .join(format!("{}.{}.assembling", upload_id, attempt));
        let (size, checksum) = match self.assemble(&session, &staged).await {
            Ok(assembled) => assembled,
            Err(e) => {
                remove_staged(&staged).await;
                return Err(self.handle_assembly_error(upload_id, e).await);
            }
        };

        let artifact = match self
            .artifact_store
            .persist(upload_id, attempt, &filename, &session.mime_type, &staged)
            .await
        {
            Ok(artifact) => artifact,
            Err(e) => {
                remove_staged(&staged).await;
                return Err(e);
            }
        };

        let completed = match self
            .registry
            .complete(upload_id, &filename, &artifact.location, &checksum)
            .await
        {
            Ok(completed) => completed,
            Err(e) => {
                // Lost a race with cancellation or expiry
                warn!(upload_id = %upload_id, "Discarding assembled file: {}", e);
                if let Err(remove_err) = self.artifact_store.remove(&artifact.key).await {
                    error!(
                        upload_id = %upload_id,
                        "Failed to remove orphaned artifact: {}",
                        remove_err
                    );
                }
                return Err(match e {
                    AppError::InvalidTransition { from, .. } => {
                        no_longer_finalizable(upload_id, from)
                    }
                    other => other,
                });
            }
        };

        self.registry.purge_scratch(upload_id).await;

        info!(
            upload_id = %upload_id,
            filename = %filename,
            size,
            location = %artifact.location,
            "Upload assembled"
        );

        Ok(AssembledFile {
            upload_id,
            filename,
            size,
            mime_type: completed.mime_type,
            location: artifact.location,
            checksum,
            associated_entity_id: completed.associated_entity_id,
            completed_at: completed.finished_at.unwrap_or_else(Utc::now),
        })
    }

    /// Write every chunk into `staged`, returning the file size and checksum
    async fn assemble(&self, session: &UploadSession, staged: &Path) -> Result<(u64, String)> {
        tokio::fs::create_dir_all(&self.staging_dir)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to create staging directory: {}", e)))?;

        let file = tokio::fs::File::create(staged)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to create staging file: {}", e)))?;
        let mut writer = BufWriter::new(file);
        let mut hasher = Sha256::new();
        let mut written: u64 = 0;
        let chunk_store = self.registry.chunk_store();

        for index in 0..session.total_chunks {
            let expected = session.expected_chunk_len(index).unwrap_or(0);
            let chunk = match chunk_store.read(session.upload_id, index).await {
                Ok(chunk) => chunk,
                Err(AppError::NotFound(_)) => {
                    return Err(AppError::AssemblyIntegrity(format!(
                        "chunk {} is missing from scratch storage",
                        index
                    )))
                }
                Err(e) => return Err(e),
            };

            if chunk.len() as u64 != expected {
                return Err(AppError::AssemblyIntegrity(format!(
                    "chunk {} has {} bytes in scratch storage, expected {}",
                    index,
                    chunk.len(),
                    expected
                )));
            }

            writer
                .write_all(&chunk)
                .await
                .map_err(|e| AppError::Storage(format!("Failed to write staging file: {}", e)))?;
            hasher.update(&chunk);
            written += chunk.len() as u64;
        }

        writer
            .flush()
            .await
            .map_err(|e| AppError::Storage(format!("Failed to flush staging file: {}", e)))?;
        writer
            .get_ref()
            .sync_all()
            .await
            .map_err(|e| AppError::Storage(format!("Failed to sync staging file: {}", e)))?;

        let on_disk = tokio::fs::metadata(staged)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to stat staging file: {}", e)))?
            .len();

        if written != session.total_size || on_disk != session.total_size {
            return Err(AppError::AssemblyIntegrity(format!(
                "assembled {} bytes, declared size is {}",
                on_disk, session.total_size
            )));
        }

        Ok((on_disk, hex::encode(hasher.finalize())))
    }

    /// Map an assembly failure to what the caller sees, failing the session
    /// when its stored data cannot produce the declared file
    async fn handle_assembly_error(&self, upload_id: Uuid, err: AppError) -> AppError {
        let AppError::AssemblyIntegrity(ref reason) = err else {
            return err;
        };

        match self.registry.transition(upload_id, UploadStatus::Failed).await {
            Ok(_) => {
                error!(upload_id = %upload_id, "Upload failed integrity check: {}", reason);
                self.registry.purge_scratch(upload_id).await;
                err
            }
            // Cancelled or expired while assembling; its chunks went with it
            Err(AppError::InvalidTransition { from, .. }) => {
                warn!(
                    upload_id = %upload_id,
                    status = %from,
                    "Upload ended during assembly: {}",
                    reason
                );
                no_longer_finalizable(upload_id, from)
            }
            Err(e @ AppError::NotFound(_)) => e,
            Err(e) => {
                warn!(upload_id = %upload_id, "Could not mark upload failed: {}", e);
                err
            }
        }
    }
}

fn no_longer_finalizable(upload_id: Uuid, status: UploadStatus) -> AppError {
    AppError::InvalidState(format!(
        "Upload {} is {} and can no longer be finalized",
        upload_id, status
    ))
}

async fn remove_staged(staged: &Path) {
    if let Err(e) = tokio::fs::remove_file(staged).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove staging file {}: {}", staged.display(), e);
        }
    }
}
