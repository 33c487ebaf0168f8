//! Persistence for upload session records
//!
//! The registry never mutates a stored session in place: it reads a copy,
//! applies the change, bumps `version` and writes it back with
//! [`SessionStore::compare_and_swap`]. Two concurrent writers can therefore
//! never both succeed against the same version.

mod memory;
mod postgres;

pub use memory::MemorySessionStore;
pub use postgres::PgSessionStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::core::error::Result;
use crate::features::uploads::models::UploadSession;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store a brand-new session
    async fn insert(&self, session: &UploadSession) -> Result<()>;

    async fn get(&self, upload_id: Uuid) -> Result<Option<UploadSession>>;

    /// Replace the stored session only if its version still equals
    /// `expected_version`. Returns `false` when another writer got there
    /// first or the session no longer exists.
    async fn compare_and_swap(&self, expected_version: i64, session: &UploadSession)
        -> Result<bool>;

    /// Remove a session record; `false` if it did not exist
    async fn delete(&self, upload_id: Uuid) -> Result<bool>;

    async fn list(&self) -> Result<Vec<UploadSession>>;
}
