//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{AttachmentRow, UploadSessionRow};
use crate::repos::sessions::{ACTIVE_STATUSES_SQL, COMPLETABLE_STATUSES_SQL};
use crate::repos::{AttachmentRepo, SessionRepo, TransitionOutcome};
use crate::store::MetadataStore;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use stowage_core::UploadStatus;
use stowage_core::config::PgSslMode;
use time::OffsetDateTime;
use uuid::Uuid;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

/// Split the schema into statements, dropping comment-only fragments.
fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .map(str::trim)
        .filter(|statement| {
            statement.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            })
        })
        .collect()
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Connect using a full connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Connect using individual parameters, so the password can come from
    /// the environment rather than a URL in a config file.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }
        if let Some(pass) = password {
            opts = opts.password(pass);
        }
        if let Some(mode) = ssl_mode {
            opts = opts.ssl_mode(match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            });
        }

        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{timeout_ms}ms"))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

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
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // Prepared statements hold one statement each.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionRepo for PostgresStore {
    async fn create_session(&self, session: &UploadSessionRow) -> MetadataResult<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO upload_sessions (
                session_guid, chunk_upload_id, file_name, content_type, total_size,
                uploaded_size, target_folder_path, classification_id, owner_id,
                metadata_json, status, created_at, updated_at, completed_at,
                expires_at, error_message, retry_count, attachment_id, version,
                promotion_started_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
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
            "UPDATE upload_sessions SET chunk_upload_id = $1, updated_at = $2 \
             WHERE session_guid = $3 AND chunk_upload_id IS NULL",
        )
        .bind(chunk_upload_id)
        .bind(updated_at)
        .bind(session_guid)
        .execute(&self.pool)
        .await
        .map_err(|e| MetadataError::from_write(e, "bind chunk upload id"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_session(&self, session_guid: Uuid) -> MetadataResult<Option<UploadSessionRow>> {
        let row = sqlx::query_as::<_, UploadSessionRow>(
            "SELECT * FROM upload_sessions WHERE session_guid = $1",
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
            "SELECT * FROM upload_sessions WHERE chunk_upload_id = $1 ORDER BY id DESC LIMIT 1",
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
            "SELECT * FROM upload_sessions WHERE owner_id = $1 AND status IN {ACTIVE_STATUSES_SQL} \
             ORDER BY created_at DESC, id DESC LIMIT $2"
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
             AND expires_at <= $1 ORDER BY expires_at ASC, id ASC LIMIT $2"
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
        let row = sqlx::query_as::<_, UploadSessionRow>(&format!(
            r#"
            UPDATE upload_sessions SET
                uploaded_size = GREATEST(uploaded_size, $1),
                status = CASE
                    WHEN status IN ('created', 'paused') AND promotion_started_at IS NULL
                    THEN 'in_progress' ELSE status END,
                version = CASE
                    WHEN status IN ('created', 'paused') AND promotion_started_at IS NULL
                    THEN version + 1 ELSE version END,
                updated_at = $2
            WHERE chunk_upload_id = $3 AND status IN {ACTIVE_STATUSES_SQL}
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
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        let updated = sqlx::query_as::<_, UploadSessionRow>(
            "UPDATE upload_sessions SET status = $1, version = version + 1, updated_at = $2, \
             promotion_started_at = NULL \
             WHERE session_guid = $3 AND status = ANY($4) \
             AND (promotion_started_at IS NULL OR $5) RETURNING *",
        )
        .bind(to.as_str())
        .bind(updated_at)
        .bind(session_guid)
        .bind(from)
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
             updated_at = $1 \
             WHERE session_guid = $2 AND status IN ('paused', 'failed') \
             AND expires_at > $1 AND retry_count < $3 AND promotion_started_at IS NULL \
             RETURNING *",
        )
        .bind(now)
        .bind(session_guid)
        .bind(i64::from(max_retries))
        .fetch_optional(&self.pool)
        .await?;
        self.outcome_for(session_guid, updated).await
    }

    async fn expire_session(&self, session_guid: Uuid, now: OffsetDateTime) -> MetadataResult<bool> {
        let result = sqlx::query(&format!(
            "UPDATE upload_sessions SET status = 'expired', version = version + 1, \
             updated_at = $1, promotion_started_at = NULL \
             WHERE session_guid = $2 AND status IN {ACTIVE_STATUSES_SQL} AND expires_at <= $1"
        ))
        .bind(now)
        .bind(session_guid)
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
                promotion_started_at = $1,
                status = CASE WHEN status = 'created' THEN 'in_progress' ELSE status END,
                version = version + 1,
                updated_at = $1
            WHERE session_guid = $2 AND status IN {COMPLETABLE_STATUSES_SQL}
              AND (promotion_started_at IS NULL OR promotion_started_at < $3)
            RETURNING *
            "#
        ))
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
            "UPDATE upload_sessions SET status = 'completed', uploaded_size = $1, \
             completed_at = $2, attachment_id = $3, error_message = NULL, \
             promotion_started_at = NULL, version = version + 1, updated_at = $2 \
             WHERE session_guid = $4 AND version = $5 \
             AND status IN ('in_progress', 'paused') AND promotion_started_at IS NOT NULL",
        )
        .bind(uploaded_size)
        .bind(completed_at)
        .bind(attachment.attachment_id)
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
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
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
            "UPDATE upload_sessions SET status = 'failed', error_message = $1, \
             retry_count = retry_count + 1, promotion_started_at = NULL, \
             version = version + 1, updated_at = $2 \
             WHERE session_guid = $3 AND version = $4 AND status IN ('in_progress', 'paused')",
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
impl AttachmentRepo for PostgresStore {
    async fn get_attachment(&self, attachment_id: Uuid) -> MetadataResult<Option<AttachmentRow>> {
        let row = sqlx::query_as::<_, AttachmentRow>(
            "SELECT * FROM attachments WHERE attachment_id = $1",
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
        let row =
            sqlx::query_as::<_, AttachmentRow>("SELECT * FROM attachments WHERE session_guid = $1")
                .bind(session_guid)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    async fn count_attachments_for_session(&self, session_guid: Uuid) -> MetadataResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attachments WHERE session_guid = $1")
            .bind(session_guid)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
