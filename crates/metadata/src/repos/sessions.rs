//! Upload session repository.
//!
//! Every status change is a single conditional `UPDATE` guarded by the
//! expected status set (and, for promotion, the claimed `version`), so
//! concurrent actors on the same session serialize in the database rather
//! than behind an application lock.

use crate::error::MetadataResult;
use crate::models::{AttachmentRow, UploadSessionRow};
use async_trait::async_trait;
use stowage_core::UploadStatus;
use time::OffsetDateTime;
use uuid::Uuid;

/// SQL list of the non-terminal statuses.
pub(crate) const ACTIVE_STATUSES_SQL: &str = "('created', 'in_progress', 'paused', 'failed')";

/// SQL list of the statuses a promotion may start from.
pub(crate) const COMPLETABLE_STATUSES_SQL: &str = "('created', 'in_progress', 'paused')";

/// Result of a conditional status update.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// The update applied; the row reflects the new state.
    Applied(UploadSessionRow),
    /// The session exists but did not satisfy the guard; the row is its current state.
    Rejected(UploadSessionRow),
    /// No session with that guid.
    NotFound,
}

impl TransitionOutcome {
    /// The applied row, if any.
    pub fn applied(self) -> Option<UploadSessionRow> {
        match self {
            TransitionOutcome::Applied(row) => Some(row),
            _ => None,
        }
    }
}

/// Repository for upload session operations.
#[async_trait]
pub trait SessionRepo: Send + Sync {
    /// Insert a new session and return its sequence-assigned id.
    async fn create_session(&self, session: &UploadSessionRow) -> MetadataResult<i64>;

    /// Bind the chunk store handle. Only succeeds while no handle is bound;
    /// returns false otherwise.
    async fn bind_chunk_upload_id(
        &self,
        session_guid: Uuid,
        chunk_upload_id: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Get a session by its external guid.
    async fn get_session(&self, session_guid: Uuid) -> MetadataResult<Option<UploadSessionRow>>;

    /// Get the most recent session bound to a chunk handle.
    async fn get_session_by_chunk_upload_id(
        &self,
        chunk_upload_id: &str,
    ) -> MetadataResult<Option<UploadSessionRow>>;

    /// Non-terminal sessions of an owner, newest first.
    async fn list_active_by_owner(
        &self,
        owner_id: &str,
        limit: u32,
    ) -> MetadataResult<Vec<UploadSessionRow>>;

    /// Non-terminal sessions with `expires_at <= now`, oldest expiry first.
    async fn list_expired(
        &self,
        now: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<UploadSessionRow>>;

    /// Record progress with monotonic-max semantics.
    ///
    /// Moves `created`/`paused` to `in_progress` unless a promotion holds the
    /// session. `failed` sessions keep their status. Returns `None` when no
    /// non-terminal session is bound to the handle.
    async fn record_progress(
        &self,
        chunk_upload_id: &str,
        uploaded_bytes: i64,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<Option<UploadSessionRow>>;

    /// Move a session from any of `from` to `to`.
    ///
    /// Clears a held promotion lease only when `to` is terminal; otherwise a
    /// leased session is rejected.
    async fn transition_status(
        &self,
        session_guid: Uuid,
        from: &[UploadStatus],
        to: UploadStatus,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<TransitionOutcome>;

    /// `{paused, failed} -> in_progress`, guarded on expiry and retry budget.
    async fn resume_session(
        &self,
        session_guid: Uuid,
        now: OffsetDateTime,
        max_retries: u32,
    ) -> MetadataResult<TransitionOutcome>;

    /// Expire a non-terminal session whose `expires_at <= now`.
    /// Returns false if another actor got there first.
    async fn expire_session(&self, session_guid: Uuid, now: OffsetDateTime)
    -> MetadataResult<bool>;

    /// Claim the promotion lease.
    ///
    /// Succeeds when the session is completable and holds no lease started
    /// after `stale_before`. A `created` session moves to `in_progress`.
    async fn begin_promotion(
        &self,
        session_guid: Uuid,
        now: OffsetDateTime,
        stale_before: OffsetDateTime,
    ) -> MetadataResult<TransitionOutcome>;

    /// Mark the session completed and insert its attachment in one
    /// transaction, provided `version` still equals `claimed_version`.
    async fn complete_promotion(
        &self,
        session_guid: Uuid,
        claimed_version: i64,
        attachment: &AttachmentRow,
        uploaded_size: i64,
        completed_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Release a claim as failed: status `failed`, `retry_count + 1`,
    /// error message recorded. Conditional on `claimed_version`.
    async fn fail_promotion(
        &self,
        session_guid: Uuid,
        claimed_version: i64,
        error_message: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<bool>;
}
