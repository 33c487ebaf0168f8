use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::session_locks::SessionLocks;
use crate::core::config::UploadConfig;
use crate::core::error::{AppError, Result};
use crate::features::uploads::models::{CreateUploadSession, UploadSession, UploadStatus};
use crate::modules::session_store::SessionStore;
use crate::modules::storage::ChunkStore;
use crate::shared::constants::is_mime_type_allowed;
use crate::shared::validation::sanitize_filename;

/// Attempts at a read-modify-CAS cycle before giving up
const MAX_UPDATE_ATTEMPTS: usize = 32;

/// Single source of truth for upload session existence, metadata and status
pub struct UploadSessionRegistry {
    store: Arc<dyn SessionStore>,
    chunk_store: Arc<dyn ChunkStore>,
    config: UploadConfig,
    locks: SessionLocks,
}

impl UploadSessionRegistry {
    pub fn new(
        store: Arc<dyn SessionStore>,
        chunk_store: Arc<dyn ChunkStore>,
        config: UploadConfig,
    ) -> Self {
        Self {
            store,
            chunk_store,
            config,
            locks: SessionLocks::new(),
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn chunk_store(&self) -> &Arc<dyn ChunkStore> {
        &self.chunk_store
    }

    /// Per-session lock shared by the chunk receiver and the assembler.
    /// Unknown ids are rejected before a lock is allocated for them.
    pub async fn session_lock(&self, upload_id: Uuid) -> Result<Arc<RwLock<()>>> {
        self.get_session(upload_id).await?;
        Ok(self.locks.handle(upload_id))
    }

    /// Open a new upload session and allocate its scratch namespace
    pub async fn create_session(&self, input: CreateUploadSession) -> Result<UploadSession> {
        let filename = sanitize_filename(&input.filename).ok_or_else(|| {
            AppError::Validation("filename must not be empty after sanitization".to_string())
        })?;

        if input.total_size == 0 {
            return Err(AppError::Validation(
                "fileSize must be greater than zero".to_string(),
            ));
        }

        if input.total_size > self.config.max_file_size {
            return Err(AppError::PayloadTooLarge(format!(
                "File size {} exceeds the maximum of {} bytes ({} MB)",
                input.total_size,
                self.config.max_file_size,
                self.config.max_file_size / 1024 / 1024
            )));
        }

        let mime_type = input.mime_type.trim().to_lowercase();
        if !is_mime_type_allowed(&mime_type) {
            return Err(AppError::Validation(format!(
                "File type '{}' is not allowed",
                input.mime_type
            )));
        }

        let chunk_size = input.chunk_size.unwrap_or(self.config.default_chunk_size);
        if chunk_size < self.config.min_chunk_size || chunk_size > self.config.max_chunk_size {
            return Err(AppError::Validation(format!(
                "chunkSize must be between {} and {} bytes",
                self.config.min_chunk_size, self.config.max_chunk_size
            )));
        }

        let total_chunks = UploadSession::chunk_count(input.total_size, chunk_size);
        let too_many = || {
            AppError::Validation(format!(
                "Upload would need {} chunks, the maximum is {}; use a larger chunkSize",
                total_chunks, self.config.max_total_chunks
            ))
        };
        if total_chunks > self.config.max_total_chunks {
            return Err(too_many());
        }
        let total_chunks = u32::try_from(total_chunks).map_err(|_| too_many())?;

        let session = UploadSession::new(
            Uuid::now_v7(),
            filename,
            input.total_size,
            mime_type,
            chunk_size,
            total_chunks,
            input.associated_entity_id,
            Utc::now(),
        );

        self.chunk_store.allocate(session.upload_id).await?;
        if let Err(e) = self.store.insert(&session).await {
            let _ = self.chunk_store.purge(session.upload_id).await;
            return Err(e);
        }

        info!(
            upload_id = %session.upload_id,
            filename = %session.filename,
            total_size = session.total_size,
            chunk_size = session.chunk_size,
            total_chunks = session.total_chunks,
            "Upload session created"
        );

        Ok(session)
    }

    pub async fn get_session(&self, upload_id: Uuid) -> Result<UploadSession> {
        self.store
            .get(upload_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Upload session {} not found", upload_id)))
    }

    pub async fn list_sessions(&self) -> Result<Vec<UploadSession>> {
        self.store.list().await
    }

    /// Record a persisted chunk. Receiving an index twice only refreshes
    /// `last_activity_at`. The first chunk moves the session to `in_progress`.
    pub async fn mark_chunk_received(&self, upload_id: Uuid, index: u32) -> Result<UploadSession> {
        let (session, _) = self
            .update(upload_id, |s| {
                s.ensure_active()?;
                if index >= s.total_chunks {
                    return Err(AppError::InvalidChunkIndex {
                        index,
                        total_chunks: s.total_chunks,
                    });
                }

                let now = Utc::now();
                s.received_chunks.insert(index);
                if s.status == UploadStatus::Initialized {
                    s.apply_transition(UploadStatus::InProgress, now)?;
                }
                s.last_activity_at = now;
                Ok(true)
            })
            .await?;

        Ok(session)
    }

    /// Move a session to `next`, enforcing the forward-only state machine
    pub async fn transition(&self, upload_id: Uuid, next: UploadStatus) -> Result<UploadSession> {
        let (session, _) = self
            .update(upload_id, |s| {
                s.apply_transition(next, Utc::now())?;
                Ok(true)
            })
            .await?;

        info!(upload_id = %upload_id, status = %next, "Upload session transitioned");
        Ok(session)
    }

    /// Mark an assembled session `completed` and record where the file went
    pub async fn complete(
        &self,
        upload_id: Uuid,
        filename: &str,
        location: &str,
        checksum: &str,
    ) -> Result<UploadSession> {
        let (session, _) = self
            .update(upload_id, |s| {
                s.ensure_active()?;
                s.apply_transition(UploadStatus::Completed, Utc::now())?;
                s.filename = filename.to_string();
                s.final_location = Some(location.to_string());
                s.checksum = Some(checksum.to_string());
                Ok(true)
            })
            .await?;

        Ok(session)
    }

    /// Cancel a session and purge its scratch data. Cancelling a session
    /// that is already terminal is a no-op.
    pub async fn cancel_session(&self, upload_id: Uuid) -> Result<UploadSession> {
        let (session, changed) = self
            .update(upload_id, |s| {
                if s.is_terminal() {
                    return Ok(false);
                }
                s.apply_transition(UploadStatus::Cancelled, Utc::now())?;
                Ok(true)
            })
            .await?;

        if changed {
            info!(upload_id = %upload_id, "Upload session cancelled");
            self.purge_scratch(upload_id).await;
        } else {
            debug!(
                upload_id = %upload_id,
                status = %session.status,
                "Cancel on terminal session ignored"
            );
        }

        Ok(session)
    }

    /// Expire a session whose last activity is older than `cutoff`.
    /// Returns `None` when the session is terminal or was active since.
    pub async fn expire_if_idle(
        &self,
        upload_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<UploadSession>> {
        let (session, changed) = self
            .update(upload_id, |s| {
                if s.is_terminal() || s.last_activity_at >= cutoff {
                    return Ok(false);
                }
                s.apply_transition(UploadStatus::Expired, Utc::now())?;
                Ok(true)
            })
            .await?;

        if !changed {
            return Ok(None);
        }

        info!(
            upload_id = %upload_id,
            last_activity_at = %session.last_activity_at,
            "Upload session expired"
        );
        self.purge_scratch(upload_id).await;
        Ok(Some(session))
    }

    /// Delete a session record together with any residual scratch data
    pub async fn purge_session(&self, upload_id: Uuid) -> Result<bool> {
        self.chunk_store.purge(upload_id).await?;
        let deleted = self.store.delete(upload_id).await?;
        self.locks.forget(upload_id);

        if deleted {
            debug!(upload_id = %upload_id, "Upload session purged");
        }
        Ok(deleted)
    }

    /// Best-effort scratch purge; leftovers are collected by the reaper
    pub async fn purge_scratch(&self, upload_id: Uuid) {
        if let Err(e) = self.chunk_store.purge(upload_id).await {
            warn!(upload_id = %upload_id, "Failed to purge upload scratch data: {}", e);
        }
    }

    /// Apply `mutate` atomically. The closure returns `false` to leave the
    /// session untouched; the returned flag reports whether a write happened.
    async fn update<F>(&self, upload_id: Uuid, mut mutate: F) -> Result<(UploadSession, bool)>
    where
        F: FnMut(&mut UploadSession) -> Result<bool>,
    {
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let current = self.get_session(upload_id).await?;
            let mut next = current.clone();

            if !mutate(&mut next)? {
                return Ok((current, false));
            }

            next.version = current.version + 1;
            if self.store.compare_and_swap(current.version, &next).await? {
                return Ok((next, true));
            }

            debug!(upload_id = %upload_id, "Concurrent session update, retrying");
            tokio::task::yield_now().await;
        }

        Err(AppError::Internal(format!(
            "Upload session {} is under too much contention",
            upload_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::session_store::MemorySessionStore;
    use crate::modules::storage::MemoryChunkStore;
    use bytes::Bytes;

    const MIB: u64 = 1024 * 1024;

    fn registry() -> (UploadSessionRegistry, Arc<MemoryChunkStore>) {
        let chunks = Arc::new(MemoryChunkStore::new());
        let registry = UploadSessionRegistry::new(
            Arc::new(MemorySessionStore::new()),
            chunks.clone(),
            UploadConfig::default(),
        );
        (registry, chunks)
    }

    fn request(total_size: u64) -> CreateUploadSession {
        CreateUploadSession {
            filename: "claims/2024/claim-form.pdf".to_string(),
            total_size,
            mime_type: "application/pdf".to_string(),
            chunk_size: None,
            associated_entity_id: None,
        }
    }

    #[tokio::test]
    async fn test_create_session_uses_default_chunk_size() {
        let (registry, _) = registry();
        let session = registry.create_session(request(15 * MIB)).await.unwrap();

        assert_eq!(session.chunk_size, 5 * MIB);
        assert_eq!(session.total_chunks, 3);
        assert_eq!(session.filename, "claim-form.pdf");
        assert_eq!(session.status, UploadStatus::Initialized);
        assert!(session.received_chunks.is_empty());
    }

    #[tokio::test]
    async fn test_create_session_rejects_bad_input() {
        let (registry, _) = registry();

        let err = registry.create_session(request(0)).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = registry
            .create_session(request(UploadConfig::default().max_file_size + 1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge(_)));

        let mut bad_name = request(10);
        bad_name.filename = "../../".to_string();
        assert!(matches!(
            registry.create_session(bad_name).await,
            Err(AppError::Validation(_))
        ));

        let mut bad_type = request(10);
        bad_type.mime_type = "application/x-msdownload".to_string();
        assert!(matches!(
            registry.create_session(bad_type).await,
            Err(AppError::Validation(_))
        ));

        let mut tiny_chunks = request(10 * MIB);
        tiny_chunks.chunk_size = Some(1);
        assert!(matches!(
            registry.create_session(tiny_chunks).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_chunk_count_beyond_u32_is_rejected() {
        let registry = UploadSessionRegistry::new(
            Arc::new(MemorySessionStore::new()),
            Arc::new(MemoryChunkStore::new()),
            UploadConfig {
                min_chunk_size: 1,
                max_file_size: u64::MAX,
                max_total_chunks: u64::MAX,
                ..UploadConfig::default()
            },
        );

        let mut huge = request(u64::from(u32::MAX) + 1);
        huge.chunk_size = Some(1);
        assert!(matches!(
            registry.create_session(huge).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_chunk_received_is_idempotent() {
        let (registry, _) = registry();
        let session = registry.create_session(request(15 * MIB)).await.unwrap();
        let id = session.upload_id;

        let first = registry.mark_chunk_received(id, 1).await.unwrap();
        assert_eq!(first.status, UploadStatus::InProgress);
        assert_eq!(first.received_count(), 1);

        let again = registry.mark_chunk_received(id, 1).await.unwrap();
        assert_eq!(again.received_count(), 1);
        assert!(again.last_activity_at >= first.last_activity_at);

        let err = registry.mark_chunk_received(id, 3).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidChunkIndex { index: 3, .. }));

        let err = registry
            .mark_chunk_received(Uuid::new_v4(), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_marks_are_not_lost() {
        let (registry, _) = registry();
        let registry = Arc::new(registry);
        let mut input = request(64 * 1024);
        input.chunk_size = Some(1024);
        let session = registry.create_session(input).await.unwrap();
        let id = session.upload_id;

        let tasks: Vec<_> = (0..session.total_chunks)
            .map(|index| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.mark_chunk_received(id, index).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let stored = registry.get_session(id).await.unwrap();
        assert_eq!(stored.received_count(), 64);
        assert!(stored.is_fully_received());
    }

    #[tokio::test]
    async fn test_transition_enforces_state_machine() {
        let (registry, _) = registry();
        let id = registry.create_session(request(10)).await.unwrap().upload_id;

        let err = registry
            .transition(id, UploadStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));

        registry.transition(id, UploadStatus::InProgress).await.unwrap();
        registry.transition(id, UploadStatus::Failed).await.unwrap();

        for next in [
            UploadStatus::InProgress,
            UploadStatus::Completed,
            UploadStatus::Cancelled,
        ] {
            assert!(registry.transition(id, next).await.is_err());
        }
        assert_eq!(
            registry.get_session(id).await.unwrap().status,
            UploadStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_cancel_purges_scratch_and_is_idempotent() {
        let (registry, chunks) = registry();
        let id = registry.create_session(request(10)).await.unwrap().upload_id;
        chunks
            .write(id, 0, Bytes::from_static(b"0123456789"))
            .await
            .unwrap();
        registry.mark_chunk_received(id, 0).await.unwrap();

        let cancelled = registry.cancel_session(id).await.unwrap();
        assert_eq!(cancelled.status, UploadStatus::Cancelled);
        assert!(cancelled.finished_at.is_some());
        assert_eq!(chunks.stored_chunks(id).await, 0);

        let again = registry.cancel_session(id).await.unwrap();
        assert_eq!(again.status, UploadStatus::Cancelled);
        assert_eq!(again.version, cancelled.version);

        let err = registry.mark_chunk_received(id, 0).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_expire_if_idle_respects_cutoff() {
        let (registry, _) = registry();
        let session = registry.create_session(request(10)).await.unwrap();
        let id = session.upload_id;

        let before_activity = session.last_activity_at - chrono::Duration::seconds(1);
        assert!(registry
            .expire_if_idle(id, before_activity)
            .await
            .unwrap()
            .is_none());

        let after_activity = Utc::now() + chrono::Duration::seconds(1);
        let expired = registry
            .expire_if_idle(id, after_activity)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(expired.status, UploadStatus::Expired);

        // Already terminal
        assert!(registry
            .expire_if_idle(id, after_activity)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_purge_session_removes_record() {
        let (registry, _) = registry();
        let id = registry.create_session(request(10)).await.unwrap().upload_id;
        registry.cancel_session(id).await.unwrap();

        assert!(registry.purge_session(id).await.unwrap());
        assert!(matches!(
            registry.get_session(id).await,
            Err(AppError::NotFound(_))
        ));
        assert!(!registry.purge_session(id).await.unwrap());
    }
}
