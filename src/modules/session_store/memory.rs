use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::SessionStore;
use crate::core::error::{AppError, Result};
use crate::features::uploads::models::UploadSession;

/// Session store for single-process deployments and tests
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<Uuid, UploadSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: &UploadSession) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.upload_id) {
            return Err(AppError::Internal(format!(
                "Upload session {} already exists",
                session.upload_id
            )));
        }
        sessions.insert(session.upload_id, session.clone());
        Ok(())
    }

    async fn get(&self, upload_id: Uuid) -> Result<Option<UploadSession>> {
        Ok(self.sessions.read().await.get(&upload_id).cloned())
    }

    async fn compare_and_swap(
        &self,
        expected_version: i64,
        session: &UploadSession,
    ) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session.upload_id) {
            Some(stored) if stored.version == expected_version => {
                *stored = session.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, upload_id: Uuid) -> Result<bool> {
        Ok(self.sessions.write().await.remove(&upload_id).is_some())
    }

    async fn list(&self) -> Result<Vec<UploadSession>> {
        Ok(self.sessions.read().await.values().cloned().collect())
    }
}
