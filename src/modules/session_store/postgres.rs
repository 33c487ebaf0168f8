use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::SessionStore;
use crate::core::error::{AppError, Result};
use crate::features::uploads::models::{UploadSession, UploadStatus};

/// Session store shared by several server processes through PostgreSQL
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Database row for `upload_sessions`
#[derive(Debug, FromRow)]
struct UploadSessionRow {
    upload_id: Uuid,
    filename: String,
    total_size: i64,
    mime_type: String,
    chunk_size: i64,
    total_chunks: i32,
    received_chunks: Vec<i32>,
    status: String,
    associated_entity_id: Option<Uuid>,
    final_location: Option<String>,
    checksum: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<UploadSessionRow> for UploadSession {
    type Error = AppError;

    fn try_from(row: UploadSessionRow) -> Result<Self> {
        let status = row
            .status
            .parse::<UploadStatus>()
            .map_err(AppError::Internal)?;

        Ok(UploadSession {
            upload_id: row.upload_id,
            filename: row.filename,
            total_size: row.total_size as u64,
            mime_type: row.mime_type,
            chunk_size: row.chunk_size as u64,
            total_chunks: row.total_chunks as u32,
            received_chunks: row.received_chunks.into_iter().map(|i| i as u32).collect(),
            status,
            associated_entity_id: row.associated_entity_id,
            final_location: row.final_location,
            checksum: row.checksum,
            version: row.version,
            created_at: row.created_at,
            last_activity_at: row.last_activity_at,
            finished_at: row.finished_at,
        })
    }
}

fn received_as_db(session: &UploadSession) -> Vec<i32> {
    session.received_chunks.iter().map(|&i| i as i32).collect()
}

const SELECT_COLUMNS: &str = r#"
    upload_id, filename, total_size, mime_type, chunk_size, total_chunks,
    received_chunks, status, associated_entity_id, final_location, checksum,
    version, created_at, last_activity_at, finished_at
"#;

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn insert(&self, session: &UploadSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO upload_sessions (
                upload_id, filename, total_size, mime_type, chunk_size, total_chunks,
                received_chunks, status, associated_entity_id, final_location, checksum,
                version, created_at, last_activity_at, finished_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(session.upload_id)
        .bind(&session.filename)
        .bind(session.total_size as i64)
        .bind(&session.mime_type)
        .bind(session.chunk_size as i64)
        .bind(session.total_chunks as i32)
        .bind(received_as_db(session))
        .bind(session.status.as_str())
        .bind(session.associated_entity_id)
        .bind(&session.final_location)
        .bind(&session.checksum)
        .bind(session.version)
        .bind(session.created_at)
        .bind(session.last_activity_at)
        .bind(session.finished_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, upload_id: Uuid) -> Result<Option<UploadSession>> {
        let row = sqlx::query_as::<_, UploadSessionRow>(&format!(
            "SELECT {} FROM upload_sessions WHERE upload_id = $1",
            SELECT_COLUMNS
        ))
        .bind(upload_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(UploadSession::try_from).transpose()
    }

    async fn compare_and_swap(
        &self,
        expected_version: i64,
        session: &UploadSession,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE upload_sessions
            SET filename = $3,
                received_chunks = $4,
                status = $5,
                final_location = $6,
                checksum = $7,
                version = $8,
                last_activity_at = $9,
                finished_at = $10
            WHERE upload_id = $1 AND version = $2
            "#,
        )
        .bind(session.upload_id)
        .bind(expected_version)
        .bind(&session.filename)
        .bind(received_as_db(session))
        .bind(session.status.as_str())
        .bind(&session.final_location)
        .bind(&session.checksum)
        .bind(session.version)
        .bind(session.last_activity_at)
        .bind(session.finished_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, upload_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM upload_sessions WHERE upload_id = $1")
            .bind(upload_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<UploadSession>> {
        let rows = sqlx::query_as::<_, UploadSessionRow>(&format!(
            "SELECT {} FROM upload_sessions ORDER BY created_at",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(UploadSession::try_from).collect()
    }
}
