use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::core::error::{AppError, Result};

/// Lifecycle status of a chunked upload session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Initialized,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Initialized => "initialized",
            UploadStatus::InProgress => "in_progress",
            UploadStatus::Completed => "completed",
            UploadStatus::Failed => "failed",
            UploadStatus::Cancelled => "cancelled",
            UploadStatus::Expired => "expired",
        }
    }

    /// Terminal sessions never change status again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadStatus::Completed
                | UploadStatus::Failed
                | UploadStatus::Cancelled
                | UploadStatus::Expired
        )
    }

    /// Forward-only state machine:
    /// `initialized -> in_progress -> completed`, and any non-terminal
    /// state may drop to `failed`, `cancelled` or `expired`.
    pub fn can_transition_to(&self, next: UploadStatus) -> bool {
        if self.is_terminal() {
            return false;
        }

        match next {
            UploadStatus::InProgress => *self == UploadStatus::Initialized,
            UploadStatus::Completed => *self == UploadStatus::InProgress,
            UploadStatus::Failed | UploadStatus::Cancelled | UploadStatus::Expired => true,
            UploadStatus::Initialized => false,
        }
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "initialized" => Ok(UploadStatus::Initialized),
            "in_progress" => Ok(UploadStatus::InProgress),
            "completed" => Ok(UploadStatus::Completed),
            "failed" => Ok(UploadStatus::Failed),
            "cancelled" => Ok(UploadStatus::Cancelled),
            "expired" => Ok(UploadStatus::Expired),
            other => Err(format!("Unknown upload status: {}", other)),
        }
    }
}

/// Server-side record of one chunked upload
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSession {
    pub upload_id: Uuid,
    pub filename: String,
    pub total_size: u64,
    pub mime_type: String,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub received_chunks: BTreeSet<u32>,
    pub status: UploadStatus,
    /// Report or document the finished file will be attached to
    pub associated_entity_id: Option<Uuid>,
    /// Storage location of the assembled file, set on completion
    pub final_location: Option<String>,
    /// Hex SHA-256 of the assembled file, set on completion
    pub checksum: Option<String>,
    /// Bumped on every stored mutation, used for compare-and-swap
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// When the session entered a terminal state
    pub finished_at: Option<DateTime<Utc>>,
}

/// Data for creating a new upload session
#[derive(Debug, Clone)]
pub struct CreateUploadSession {
    pub filename: String,
    pub total_size: u64,
    pub mime_type: String,
    pub chunk_size: Option<u64>,
    pub associated_entity_id: Option<Uuid>,
}

impl UploadSession {
    /// Build a fresh `initialized` session. `total_chunks` must already be
    /// validated against `total_size` and `chunk_size`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        upload_id: Uuid,
        filename: String,
        total_size: u64,
        mime_type: String,
        chunk_size: u64,
        total_chunks: u32,
        associated_entity_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            upload_id,
            filename,
            total_size,
            mime_type,
            chunk_size,
            total_chunks,
            received_chunks: BTreeSet::new(),
            status: UploadStatus::Initialized,
            associated_entity_id,
            final_location: None,
            checksum: None,
            version: 0,
            created_at: now,
            last_activity_at: now,
            finished_at: None,
        }
    }

    /// ceil(total_size / chunk_size)
    pub fn chunk_count(total_size: u64, chunk_size: u64) -> u64 {
        total_size.div_ceil(chunk_size)
    }

    /// Byte range `[start, end)` covered by `index` in the final file
    pub fn chunk_bounds(&self, index: u32) -> Option<(u64, u64)> {
        if index >= self.total_chunks {
            return None;
        }
        let start = index as u64 * self.chunk_size;
        let end = (start + self.chunk_size).min(self.total_size);
        Some((start, end))
    }

    /// Expected payload length of `index`; only the last chunk may be shorter
    pub fn expected_chunk_len(&self, index: u32) -> Option<u64> {
        self.chunk_bounds(index).map(|(start, end)| end - start)
    }

    pub fn received_count(&self) -> u32 {
        self.received_chunks.len() as u32
    }

    pub fn is_fully_received(&self) -> bool {
        self.received_count() == self.total_chunks
    }

    /// Indices not yet persisted, ascending
    pub fn missing_chunks(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.received_chunks.contains(i))
            .collect()
    }

    /// First index a resuming client should upload
    pub fn first_missing_chunk(&self) -> Option<u32> {
        (0..self.total_chunks).find(|i| !self.received_chunks.contains(i))
    }

    pub fn progress_percent(&self) -> f64 {
        if self.total_chunks == 0 {
            return 0.0;
        }
        (self.received_count() as f64 / self.total_chunks as f64) * 100.0
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a status change, enforcing the forward-only state machine
    pub fn apply_transition(&mut self, next: UploadStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        Ok(())
    }

    /// Reject further chunk or finalize work on a terminal session
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_terminal() {
            return Err(AppError::InvalidState(format!(
                "Upload {} is {} and no longer accepts changes",
                self.upload_id, self.status
            )));
        }
        Ok(())
    }
}
