//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{AttachmentRepo, SessionRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: SessionRepo + AttachmentRepo + Send + Sync {
    /// Create or upgrade the schema.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if needed) a SQLite database and run migrations.
    ///
    /// `":memory:"` gives a private in-memory database.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();
        let in_memory = path.as_os_str() == ":memory:";

        if !in_memory
            && let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // One connection: SQLite serializes writers anyway, and an in-memory
        // database lives exactly as long as its connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::{AttachmentRow, UploadSessionRow};
    use crate::repos::TransitionOutcome;
    use crate::repos::sessions::{ACTIVE_STATUSES_SQL, COMPLETABLE_STATUSES_SQL};
    use stowage_core::UploadStatus;
    use time::OffsetDateTime;
    use uuid::Uuid;

    impl SqliteStore {
        async fn outcome_for(
            &self,
            session_guid: Uuid,
            updated: Option<UploadSessionRow>,
        ) -> MetadataResult<TransitionOutcome> {
            if let Some(row) = updated {
                return Ok(TransitionOutcome::Applied(row));
            }
            Ok(match self.get_session(session_guid).await? {
                Some(row) => TransitionOutcome::Rejected(row),
                None => TransitionOutcome::NotFound,
            })
        }
    }

    #[async_trait]
    impl SessionRepo for SqliteStore {
        async fn create_session(&self, session: &UploadSessionRow) -> MetadataResult<i64> {
            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO upload_sessions (
                    session_guid, chunk_upload_id, file_name, content_type, total_size,
                    uploaded_size, target_folder_path, classification_id, owner_id,
                    metadata_json, status, created_at, updated_at, completed_at,
                    expires_at, error_message, retry_count, attachment_id, version,
                    promotion_started_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING id
                "#,
            )
            .bind(session.session_guid)
            .bind(&session.chunk_upload_id)
            .bind(&session.file_name)
            .bind(&session.content_type)
            .bind(session.total_size)
            .bind(session.uploaded_size)
            .bind(&session.target_folder_path)
            .bind(session.classification_id)
            .bind(&session.owner_id)
            .bind(&session.metadata_json)
            .bind(&session.status)
            .bind(session.created_at)
            .bind(session.updated_at)
            .bind(session.completed_at)
            .bind(session.expires_at)
            .bind(&session.error_message)
            .bind(session.retry_count)
            .bind(session.attachment_id)
            .bind(session.version)
            .bind(session.promotion_started_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MetadataError::from_write(e, "create session"))?;
            Ok(id)
        }

        async fn bind_chunk_upload_id(
            &self,
            session_guid: Uuid,
            chunk_upload_id: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                "UPDATE upload_sessions SET chunk_upload_id = ?, updated_at = ? \
                 WHERE session_guid = ? AND chunk_upload_id IS NULL",
            )
            .bind(chunk_upload_id)
            .bind(updated_at)
            .bind(session_guid)
            .execute(&self.pool)
            .await
            .map_err(|e| MetadataError::from_write(e, "bind chunk upload id"))?;
            Ok(result.rows_affected() > 0)
        }

        async fn get_session(
            &self,
            session_guid: Uuid,
        ) -> MetadataResult<Option<UploadSessionRow>> {
            let row = sqlx::query_as::<_, UploadSessionRow>(
                "SELECT * FROM upload_sessions WHERE session_guid = ?",
            )
            .bind(session_guid)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_session_by_chunk_upload_id(
            &self,
            chunk_upload_id: &str,
        ) -> MetadataResult<Option<UploadSessionRow>> {
            let row = sqlx::query_as::<_, UploadSessionRow>(
                "SELECT * FROM upload_sessions WHERE chunk_upload_id = ? ORDER BY id DESC LIMIT 1",
            )
            .bind(chunk_upload_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_active_by_owner(
            &self,
            owner_id: &str,
            limit: u32,
        ) -> MetadataResult<Vec<UploadSessionRow>> {
            let rows = sqlx::query_as::<_, UploadSessionRow>(&format!(
                "SELECT * FROM upload_sessions WHERE owner_id = ? AND status IN {ACTIVE_STATUSES_SQL} \
                 ORDER BY created_at DESC, id DESC LIMIT ?"
            ))
            .bind(owner_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn list_expired(
            &self,
            now: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<UploadSessionRow>> {
            let rows = sqlx::query_as::<_, UploadSessionRow>(&format!(
                "SELECT * FROM upload_sessions WHERE status IN {ACTIVE_STATUSES_SQL} \
                 AND expires_at <= ? ORDER BY expires_at ASC, id ASC LIMIT ?"
            ))
            .bind(now)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn record_progress(
            &self,
            chunk_upload_id: &str,
            uploaded_bytes: i64,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<Option<UploadSessionRow>> {
            // Right-hand sides all see the pre-update row.
            let row = sqlx::query_as::<_, UploadSessionRow>(&format!(
                r#"
                UPDATE upload_sessions SET
                    uploaded_size = MAX(uploaded_size, ?),
                    status = CASE
                        WHEN status IN ('created', 'paused') AND promotion_started_at IS NULL
                        THEN 'in_progress' ELSE status END,
                    version = CASE
                        WHEN status IN ('created', 'paused') AND promotion_started_at IS NULL
                        THEN version + 1 ELSE version END,
                    updated_at = ?
                WHERE chunk_upload_id = ? AND status IN {ACTIVE_STATUSES_SQL}
                RETURNING *
                "#
            ))
            .bind(uploaded_bytes)
            .bind(updated_at)
            .bind(chunk_upload_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn transition_status(
            &self,
            session_guid: Uuid,
            from: &[UploadStatus],
            to: UploadStatus,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<TransitionOutcome> {
            if from.is_empty() {
                return self.outcome_for(session_guid, None).await;
            }
            let placeholders = vec!["?"; from.len()].join(", ");
            let sql = format!(
                "UPDATE upload_sessions SET status = ?, version = version + 1, updated_at = ?, \
                 promotion_started_at = NULL \
                 WHERE session_guid = ? AND status IN ({placeholders}) \
                 AND (promotion_started_at IS NULL OR ?) RETURNING *"
            );
            let mut query = sqlx::query_as::<_, UploadSessionRow>(&sql)
                .bind(to.as_str())
                .bind(updated_at)
                .bind(session_guid);
            for status in from {
                query = query.bind(status.as_str());
            }
            let updated = query
                .bind(to.is_terminal())
                .fetch_optional(&self.pool)
                .await?;
            self.outcome_for(session_guid, updated).await
        }

        async fn resume_session(
            &self,
            session_guid: Uuid,
            now: OffsetDateTime,
            max_retries: u32,
        ) -> MetadataResult<TransitionOutcome> {
            let updated = sqlx::query_as::<_, UploadSessionRow>(
                "UPDATE upload_sessions SET status = 'in_progress', version = version + 1, \
                 updated_at = ? \
                 WHERE session_guid = ? AND status IN ('paused', 'failed') \
                 AND expires_at > ? AND retry_count < ? AND promotion_started_at IS NULL \
                 RETURNING *",
            )
            .bind(now)
            .bind(session_guid)
            .bind(now)
            .bind(i64::from(max_retries))
            .fetch_optional(&self.pool)
            .await?;
            self.outcome_for(session_guid, updated).await
        }

        async fn expire_session(
            &self,
            session_guid: Uuid,
            now: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(&format!(
                "UPDATE upload_sessions SET status = 'expired', version = version + 1, \
                 updated_at = ?, promotion_started_at = NULL \
                 WHERE session_guid = ? AND status IN {ACTIVE_STATUSES_SQL} AND expires_at <= ?"
            ))
            .bind(now)
            .bind(session_guid)
            .bind(now)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn begin_promotion(
            &self,
            session_guid: Uuid,
            now: OffsetDateTime,
            stale_before: OffsetDateTime,
        ) -> MetadataResult<TransitionOutcome> {
            let updated = sqlx::query_as::<_, UploadSessionRow>(&format!(
                r#"
                UPDATE upload_sessions SET
                    promotion_started_at = ?,
                    status = CASE WHEN status = 'created' THEN 'in_progress' ELSE status END,
                    version = version + 1,
                    updated_at = ?
                WHERE session_guid = ? AND status IN {COMPLETABLE_STATUSES_SQL}
                  AND (promotion_started_at IS NULL OR promotion_started_at < ?)
                RETURNING *
                "#
            ))
            .bind(now)
            .bind(now)
            .bind(session_guid)
            .bind(stale_before)
            .fetch_optional(&self.pool)
            .await?;
            self.outcome_for(session_guid, updated).await
        }

        async fn complete_promotion(
            &self,
            session_guid: Uuid,
            claimed_version: i64,
            attachment: &AttachmentRow,
            uploaded_size: i64,
            completed_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let mut tx = self.pool.begin().await?;

            let result = sqlx::query(
                "UPDATE upload_sessions SET status = 'completed', uploaded_size = ?, \
                 completed_at = ?, attachment_id = ?, error_message = NULL, \
                 promotion_started_at = NULL, version = version + 1, updated_at = ? \
                 WHERE session_guid = ? AND version = ? \
                 AND status IN ('in_progress', 'paused') AND promotion_started_at IS NOT NULL",
            )
            .bind(uploaded_size)
            .bind(completed_at)
            .bind(attachment.attachment_id)
            .bind(completed_at)
            .bind(session_guid)
            .bind(claimed_version)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                tx.rollback().await?;
                return Ok(false);
            }

            sqlx::query(
                r#"
                INSERT INTO attachments (
                    attachment_id, session_guid, checksum, storage_path, content_type,
                    original_file_name, file_size, classification_id, description, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(attachment.attachment_id)
            .bind(attachment.session_guid)
            .bind(&attachment.checksum)
            .bind(&attachment.storage_path)
            .bind(&attachment.content_type)
            .bind(&attachment.original_file_name)
            .bind(attachment.file_size)
            .bind(attachment.classification_id)
            .bind(&attachment.description)
            .bind(attachment.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| MetadataError::from_write(e, "insert attachment"))?;

            tx.commit().await?;
            Ok(true)
        }

        async fn fail_promotion(
            &self,
            session_guid: Uuid,
            claimed_version: i64,
            error_message: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                "UPDATE upload_sessions SET status = 'failed', error_message = ?, \
                 retry_count = retry_count + 1, promotion_started_at = NULL, \
                 version = version + 1, updated_at = ? \
                 WHERE session_guid = ? AND version = ? AND status IN ('in_progress', 'paused')",
            )
            .bind(error_message)
            .bind(updated_at)
            .bind(session_guid)
            .bind(claimed_version)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }
    }

    #[async_trait]
    impl AttachmentRepo for SqliteStore {
        async fn get_attachment(
            &self,
            attachment_id: Uuid,
        ) -> MetadataResult<Option<AttachmentRow>> {
            let row = sqlx::query_as::<_, AttachmentRow>(
                "SELECT * FROM attachments WHERE attachment_id = ?",
            )
            .bind(attachment_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_attachment_by_session(
            &self,
            session_guid: Uuid,
        ) -> MetadataResult<Option<AttachmentRow>> {
            let row = sqlx::query_as::<_, AttachmentRow>(
                "SELECT * FROM attachments WHERE session_guid = ?",
            )
            .bind(session_guid)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn count_attachments_for_session(&self, session_guid: Uuid) -> MetadataResult<u64> {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM attachments WHERE session_guid = ?")
                    .bind(session_guid)
                    .fetch_one(&self.pool)
                    .await?;
            Ok(count as u64)
        }
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS upload_sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_guid BLOB NOT NULL UNIQUE,
    chunk_upload_id TEXT,
    file_name TEXT NOT NULL,
    content_type TEXT NOT NULL,
    total_size INTEGER NOT NULL CHECK (total_size > 0),
    uploaded_size INTEGER NOT NULL DEFAULT 0 CHECK (uploaded_size >= 0),
    target_folder_path TEXT,
    classification_id INTEGER,
    owner_id TEXT NOT NULL,
    metadata_json TEXT,
    status TEXT NOT NULL CHECK (status IN (
        'created', 'in_progress', 'paused', 'completed', 'failed', 'cancelled', 'expired'
    )),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT,
    expires_at TEXT NOT NULL,
    error_message TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    attachment_id BLOB,
    version INTEGER NOT NULL DEFAULT 0,
    promotion_started_at TEXT,
    CHECK ((status = 'completed') = (attachment_id IS NOT NULL))
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_upload_sessions_chunk_active
    ON upload_sessions(chunk_upload_id)
    WHERE chunk_upload_id IS NOT NULL
      AND status IN ('created', 'in_progress', 'paused', 'failed');
CREATE INDEX IF NOT EXISTS idx_upload_sessions_chunk ON upload_sessions(chunk_upload_id);
CREATE INDEX IF NOT EXISTS idx_upload_sessions_owner_status ON upload_sessions(owner_id, status);
CREATE INDEX IF NOT EXISTS idx_upload_sessions_status_expires ON upload_sessions(status, expires_at);

CREATE TABLE IF NOT EXISTS attachments (
    attachment_id BLOB PRIMARY KEY,
    session_guid BLOB NOT NULL UNIQUE REFERENCES upload_sessions(session_guid),
    checksum TEXT NOT NULL,
    storage_path TEXT NOT NULL,
    content_type TEXT NOT NULL,
    original_file_name TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    classification_id INTEGER,
    description TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_attachments_checksum ON attachments(checksum);
"#;
