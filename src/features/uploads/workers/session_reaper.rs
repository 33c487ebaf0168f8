use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use crate::core::error::{AppError, Result};
use crate::features::uploads::services::UploadSessionRegistry;

/// Outcome of one reaper sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Idle sessions moved to `expired`
    pub expired: usize,
    /// Terminal sessions whose record and scratch data were deleted
    pub purged: usize,
}

/// Background worker that expires abandoned uploads and purges terminal
/// sessions once their grace period has passed
pub struct SessionReaper {
    registry: Arc<UploadSessionRegistry>,
    session_ttl: chrono::Duration,
    cleanup_grace: chrono::Duration,
    sweep_interval: Duration,
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

impl SessionReaper {
    pub fn new(registry: Arc<UploadSessionRegistry>) -> Self {
        let config = registry.config();
        Self {
            session_ttl: to_chrono(config.session_ttl),
            cleanup_grace: to_chrono(config.cleanup_grace),
            sweep_interval: config.reaper_interval,
            registry,
        }
    }

    /// Run the reaper in a background loop
    pub async fn run(&self) {
        tracing::info!(
            "Starting upload session reaper (interval {}s)",
            self.sweep_interval.as_secs()
        );

        let mut interval = interval(self.sweep_interval);

        loop {
            interval.tick().await;

            match self.reap(Utc::now()).await {
                Ok(report) if report != ReapReport::default() => {
                    tracing::info!(
                        expired = report.expired,
                        purged = report.purged,
                        "Upload reaper sweep finished"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Error sweeping upload sessions: {:?}", e),
            }
        }
    }

    /// Sweep every session once, treating `now` as the current time.
    ///
    /// Non-terminal sessions idle for longer than the TTL are expired.
    /// Terminal sessions finished longer than the grace period ago are
    /// deleted along with any residual scratch data.
    pub async fn reap(&self, now: DateTime<Utc>) -> Result<ReapReport> {
        let mut report = ReapReport::default();
        let idle_cutoff = now - self.session_ttl;
        let purge_cutoff = now - self.cleanup_grace;

        for session in self.registry.list_sessions().await? {
            let upload_id = session.upload_id;

            if !session.is_terminal() {
                if session.last_activity_at >= idle_cutoff {
                    continue;
                }
                match self.registry.expire_if_idle(upload_id, idle_cutoff).await {
                    Ok(Some(_)) => report.expired += 1,
                    Ok(None) | Err(AppError::NotFound(_)) => {}
                    Err(e) => {
                        tracing::error!("Failed to expire upload session {}: {:?}", upload_id, e)
                    }
                }
                continue;
            }

            let finished_at = session.finished_at.unwrap_or(session.last_activity_at);
            if finished_at >= purge_cutoff {
                continue;
            }
            match self.registry.purge_session(upload_id).await {
                Ok(true) => report.purged += 1,
                Ok(false) => {}
                Err(e) => tracing::error!("Failed to purge upload session {}: {:?}", upload_id, e),
            }
        }

        Ok(report)
    }
}
