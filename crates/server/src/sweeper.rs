//! Background expiration of abandoned upload sessions.
//!
//! The sweeper is the only actor besides the coordinator that changes a
//! session's status, and only along the `expired` edge. Each expiry is a
//! compare-and-swap, so a session completed concurrently is left alone.

use crate::metrics::{ORPHANED_CHUNKS_RECLAIMED, SESSIONS_EXPIRED, SWEEP_ERRORS, SWEEP_RUNS};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use stowage_core::ChunkUploadId;
use stowage_core::config::SweeperConfig;
use stowage_metadata::MetadataStore;
use stowage_metadata::models::UploadSessionRow;
use stowage_storage::{ChunkStore, StorageError};
use time::OffsetDateTime;
use tokio::task::JoinHandle;

/// Counters from one sweep run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    pub sessions_processed: u64,
    pub sessions_expired: u64,
    pub chunks_deleted: u64,
    pub orphans_reclaimed: u64,
    pub errors: u64,
}

/// Periodic sweeper over expired sessions and orphaned chunk uploads.
pub struct ExpirationSweeper {
    config: SweeperConfig,
    metadata: Arc<dyn MetadataStore>,
    chunks: Arc<dyn ChunkStore>,
}

impl ExpirationSweeper {
    pub fn new(
        config: SweeperConfig,
        metadata: Arc<dyn MetadataStore>,
        chunks: Arc<dyn ChunkStore>,
    ) -> Self {
        Self {
            config,
            metadata,
            chunks,
        }
    }

    /// Run the sweep loop until the task is aborted.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.run_once().await;
            }
        })
    }

    /// One full pass. Per-item failures are counted, never propagated.
    pub async fn run_once(&self) -> SweepStats {
        let start = Instant::now();
        let mut stats = SweepStats::default();
        SWEEP_RUNS.inc();

        self.expire_sessions(&mut stats).await;
        if self.config.reclaim_orphans {
            self.reclaim_orphans(&mut stats).await;
        }

        SWEEP_ERRORS.inc_by(stats.errors);
        if stats.sessions_processed > 0 || stats.orphans_reclaimed > 0 || stats.errors > 0 {
            tracing::info!(
                sessions_processed = stats.sessions_processed,
                sessions_expired = stats.sessions_expired,
                chunks_deleted = stats.chunks_deleted,
                orphans_reclaimed = stats.orphans_reclaimed,
                errors = stats.errors,
                duration_ms = start.elapsed().as_millis() as u64,
                "Sweep finished"
            );
        } else {
            tracing::debug!("Sweep found nothing to do");
        }
        stats
    }

    async fn expire_sessions(&self, stats: &mut SweepStats) {
        for _ in 0..self.config.max_batches {
            let now = OffsetDateTime::now_utc();
            let batch = match self
                .metadata
                .list_expired(now, self.config.batch_size)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to list expired sessions");
                    stats.errors += 1;
                    return;
                }
            };
            if batch.is_empty() {
                return;
            }

            let expired_before = stats.sessions_expired;
            for row in &batch {
                stats.sessions_processed += 1;
                self.expire_one(row, now, stats).await;
            }
            // A batch that expired nothing would come back unchanged.
            if stats.sessions_expired == expired_before {
                return;
            }
        }
    }

    async fn expire_one(&self, row: &UploadSessionRow, now: OffsetDateTime, stats: &mut SweepStats) {
        match self.metadata.expire_session(row.session_guid, now).await {
            Ok(true) => {
                stats.sessions_expired += 1;
                SESSIONS_EXPIRED.inc();
                tracing::info!(session_guid = %row.session_guid, "Upload session expired");
            }
            Ok(false) => {
                tracing::debug!(
                    session_guid = %row.session_guid,
                    "Session resolved before expiry; skipping"
                );
                return;
            }
            Err(e) => {
                tracing::warn!(session_guid = %row.session_guid, error = %e, "Failed to expire session");
                stats.errors += 1;
                return;
            }
        }

        // Chunk data is only released once the session can no longer complete.
        let Some(id) = row
            .chunk_upload_id
            .as_deref()
            .and_then(|id| ChunkUploadId::parse(id).ok())
        else {
            return;
        };
        match self.chunks.delete(&id).await {
            Ok(true) => stats.chunks_deleted += 1,
            Ok(false) => {}
            Err(e) => {
                // Left for the orphan pass.
                tracing::warn!(chunk_upload_id = %id, error = %e, "Failed to delete chunk upload data");
                stats.errors += 1;
            }
        }
    }

    /// Delete chunk store entries past the grace period whose session is
    /// missing or terminal. Session state is never touched.
    async fn reclaim_orphans(&self, stats: &mut SweepStats) {
        let ids = match self.chunks.list_all().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list chunk uploads");
                stats.errors += 1;
                return;
            }
        };
        let cutoff = OffsetDateTime::now_utc() - self.config.orphan_grace();

        for id in ids {
            let status = match self.chunks.status(&id).await {
                Ok(status) => status,
                Err(StorageError::NotFound(_)) => continue,
                Err(e) => {
                    tracing::warn!(chunk_upload_id = %id, error = %e, "Failed to read chunk upload");
                    stats.errors += 1;
                    continue;
                }
            };
            if status.created_at > cutoff {
                continue;
            }

            let owned = match self.metadata.get_session_by_chunk_upload_id(id.as_str()).await {
                Ok(Some(row)) => match row.status() {
                    Ok(status) => !status.is_terminal(),
                    Err(e) => {
                        tracing::warn!(chunk_upload_id = %id, error = %e, "Unreadable session row");
                        stats.errors += 1;
                        continue;
                    }
                },
                Ok(None) => false,
                Err(e) => {
                    tracing::warn!(chunk_upload_id = %id, error = %e, "Failed to look up session");
                    stats.errors += 1;
                    continue;
                }
            };
            if owned {
                continue;
            }

            match self.chunks.delete(&id).await {
                Ok(true) => {
                    stats.orphans_reclaimed += 1;
                    ORPHANED_CHUNKS_RECLAIMED.inc();
                    tracing::debug!(chunk_upload_id = %id, "Reclaimed orphaned chunk upload");
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(chunk_upload_id = %id, error = %e, "Failed to delete orphaned chunk upload");
                    stats.errors += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use stowage_metadata::SqliteStore;
    use stowage_storage::FilesystemChunkStore;

    #[tokio::test]
    async fn test_run_once_on_empty_stores() {
        let temp = tempfile::tempdir().unwrap();
        let metadata: Arc<dyn MetadataStore> = Arc::new(SqliteStore::new(":memory:").await.unwrap());
        let chunks: Arc<dyn ChunkStore> =
            Arc::new(FilesystemChunkStore::new(temp.path()).await.unwrap());
        let sweeper = ExpirationSweeper::new(SweeperConfig::default(), metadata, chunks);

        assert_eq!(sweeper.run_once().await, SweepStats::default());
    }

    #[tokio::test]
    async fn test_orphan_within_grace_is_kept() {
        let temp = tempfile::tempdir().unwrap();
        let metadata: Arc<dyn MetadataStore> = Arc::new(SqliteStore::new(":memory:").await.unwrap());
        let chunks: Arc<dyn ChunkStore> =
            Arc::new(FilesystemChunkStore::new(temp.path()).await.unwrap());
        let id = chunks.create(8, &BTreeMap::new()).await.unwrap();

        let sweeper = ExpirationSweeper::new(SweeperConfig::default(), metadata, chunks.clone());
        let stats = sweeper.run_once().await;

        assert_eq!(stats.orphans_reclaimed, 0);
        assert!(chunks.status(&id).await.is_ok());
    }

    #[tokio::test]
    async fn test_orphan_past_grace_is_reclaimed() {
        let temp = tempfile::tempdir().unwrap();
        let metadata: Arc<dyn MetadataStore> = Arc::new(SqliteStore::new(":memory:").await.unwrap());
        let chunks: Arc<dyn ChunkStore> =
            Arc::new(FilesystemChunkStore::new(temp.path()).await.unwrap());
        let id = chunks.create(8, &BTreeMap::new()).await.unwrap();

        let config = SweeperConfig {
            orphan_grace_secs: 0,
            ..SweeperConfig::default()
        };
        let sweeper = ExpirationSweeper::new(config, metadata, chunks.clone());
        let stats = sweeper.run_once().await;

        assert_eq!(stats.orphans_reclaimed, 1);
        assert!(matches!(
            chunks.status(&id).await,
            Err(StorageError::NotFound(_))
        ));
    }
}
