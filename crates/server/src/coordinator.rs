//! Upload session coordinator.
//!
//! Drives the session state machine and reconciles it with the chunk store.
//! Completion is the interesting path: the chunk store decides whether the
//! bytes are all there, a promotion lease on the session row decides who
//! gets to promote them, and a version-guarded transaction decides whether
//! the promotion is recorded.

use crate::error::{UploadError, UploadResult};
use crate::folders::{FolderResolver, normalize_folder, staging_key, storage_key};
use crate::metrics::{
    BYTES_PROMOTED, OBJECTS_DEDUPLICATED, PROGRESS_UPDATES, PROMOTION_DURATION,
    SESSIONS_CANCELLED, SESSIONS_COMPLETED, SESSIONS_FAILED, SESSIONS_INITIATED, SESSIONS_RESUMED,
};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use stowage_core::config::{ProgressSource, UploadConfig};
use stowage_core::session::{
    CompleteUploadRequest, CompleteUploadResponse, InitiateUploadRequest, InitiateUploadResponse,
    ProgressView, ResumeUploadResponse,
};
use stowage_core::{
    AttachmentId, ChunkUploadId, ContentHash, SessionId, UploadSession, UploadStatus,
};
use stowage_metadata::models::{AttachmentRow, UploadSessionRow};
use stowage_metadata::{MetadataError, MetadataStore, TransitionOutcome};
use stowage_storage::{ChunkStatus, ChunkStore, ObjectStore, StorageError};
use time::OffsetDateTime;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Metadata key under which an initiate-time description is kept.
const DESCRIPTION_KEY: &str = "description";

/// Upper bound for `list_active_by_owner`.
pub const MAX_LIST_LIMIT: u32 = 1000;

/// Bytes written to permanent storage by one promotion.
#[derive(Debug)]
struct Promoted {
    hash: ContentHash,
    key: String,
    size: u64,
}

/// Service that owns every session state change except expiry.
pub struct UploadCoordinator {
    config: UploadConfig,
    metadata: Arc<dyn MetadataStore>,
    storage: Arc<dyn ObjectStore>,
    chunks: Arc<dyn ChunkStore>,
    folders: Arc<dyn FolderResolver>,
}

impl UploadCoordinator {
    pub fn new(
        config: UploadConfig,
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<dyn ObjectStore>,
        chunks: Arc<dyn ChunkStore>,
        folders: Arc<dyn FolderResolver>,
    ) -> Self {
        Self {
            config,
            metadata,
            storage,
            chunks,
            folders,
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Create a session and its chunk upload handle.
    #[tracing::instrument(skip(self, req), fields(owner_id = %req.owner_id, file_size = req.file_size))]
    pub async fn initiate(&self, req: InitiateUploadRequest) -> UploadResult<InitiateUploadResponse> {
        let owner_id = req.owner_id.trim();
        if owner_id.is_empty() {
            return Err(UploadError::InvalidArgument(
                "owner_id must not be empty".to_string(),
            ));
        }
        let file_name = req.file_name.trim();
        if file_name.is_empty() {
            return Err(UploadError::InvalidArgument(
                "file_name must not be empty".to_string(),
            ));
        }
        if file_name.chars().count() > self.config.max_file_name_len {
            return Err(UploadError::InvalidArgument(format!(
                "file_name exceeds {} characters",
                self.config.max_file_name_len
            )));
        }
        if file_name.chars().any(char::is_control) {
            return Err(UploadError::InvalidArgument(
                "file_name must not contain control characters".to_string(),
            ));
        }
        if req.file_size == 0 {
            return Err(UploadError::InvalidArgument(
                "file_size must be greater than 0".to_string(),
            ));
        }
        if i64::try_from(req.file_size).is_err() {
            return Err(UploadError::InvalidArgument(
                "file_size is too large".to_string(),
            ));
        }
        let folder = req.folder_path.as_deref().map(normalize_folder).transpose()?;

        let mut metadata = req.metadata.unwrap_or_default();
        if let Some(description) = req.description.filter(|d| !d.trim().is_empty()) {
            metadata.insert(DESCRIPTION_KEY.to_string(), description);
        }
        let metadata_len = serde_json::to_string(&metadata)
            .map_err(|e| UploadError::InvalidArgument(format!("invalid metadata: {e}")))?
            .len();
        if metadata_len > self.config.max_metadata_bytes {
            return Err(UploadError::InvalidArgument(format!(
                "metadata exceeds {} bytes",
                self.config.max_metadata_bytes
            )));
        }

        let content_type = req
            .content_type
            .map(|ct| ct.trim().to_string())
            .filter(|ct| !ct.is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        let mut session = UploadSession::new(
            owner_id,
            file_name,
            content_type,
            req.file_size,
            self.config.session_ttl(),
        );
        session.target_folder_path = folder;
        session.classification_id = req.classification_id;
        session.metadata = metadata;

        let row = UploadSessionRow::from_session(&session)?;
        self.metadata.create_session(&row).await?;
        let guid = session.session_guid;

        let chunk_metadata = BTreeMap::from([
            ("session_guid".to_string(), guid.to_string()),
            ("file_name".to_string(), session.file_name.clone()),
        ]);
        let chunk_upload_id = match self.chunks.create(req.file_size, &chunk_metadata).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(session_guid = %guid, error = %e, "Chunk store refused new upload handle");
                self.abandon_initiate(guid, None).await;
                return Err(UploadError::from_chunk_store(e));
            }
        };

        match self
            .metadata
            .bind_chunk_upload_id(
                *guid.as_uuid(),
                chunk_upload_id.as_str(),
                OffsetDateTime::now_utc(),
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                self.discard_chunk(chunk_upload_id.as_str()).await;
                return Err(UploadError::InvalidTransition(
                    "session already has a chunk upload handle".to_string(),
                ));
            }
            Err(e) => {
                tracing::warn!(session_guid = %guid, error = %e, "Failed to bind chunk upload handle");
                // A unique violation means another session owns this handle.
                let owned = !matches!(e, MetadataError::Constraint(_));
                self.abandon_initiate(guid, owned.then_some(&chunk_upload_id))
                    .await;
                return Err(e.into());
            }
        }

        SESSIONS_INITIATED.inc();
        tracing::info!(
            session_guid = %guid,
            chunk_upload_id = %chunk_upload_id,
            expires_at = %session.expires_at,
            "Upload session initiated"
        );

        Ok(InitiateUploadResponse {
            session_guid: guid,
            upload_url: self.upload_url(&chunk_upload_id),
            chunk_upload_id,
            expires_at: session.expires_at,
        })
    }

    /// Record upload progress with monotonic-max semantics.
    ///
    /// With [`ProgressSource::ChunkStore`] the reported value is ignored and
    /// the chunk store's offset is recorded instead.
    #[tracing::instrument(skip(self), fields(chunk_upload_id = %chunk_upload_id))]
    pub async fn record_progress(
        &self,
        chunk_upload_id: &str,
        uploaded_bytes: u64,
    ) -> UploadResult<ProgressView> {
        let id = parse_bound_chunk_id(chunk_upload_id)?;
        let observed = match self.config.progress_source {
            ProgressSource::Client => uploaded_bytes,
            ProgressSource::ChunkStore => self
                .chunks
                .status(&id)
                .await
                .map_err(UploadError::from_chunk_store)?
                .current_offset,
        };
        let observed = i64::try_from(observed).map_err(|_| {
            UploadError::InvalidArgument("uploaded_bytes is too large".to_string())
        })?;

        let row = self
            .metadata
            .record_progress(id.as_str(), observed, OffsetDateTime::now_utc())
            .await?;
        let session = match row {
            Some(row) => row.into_session()?,
            None => {
                return match self.metadata.get_session_by_chunk_upload_id(id.as_str()).await? {
                    Some(row) => Err(UploadError::InvalidTransition(format!(
                        "session is {}",
                        row.status
                    ))),
                    None => Err(UploadError::NotFound(format!(
                        "no session for chunk upload {id}"
                    ))),
                };
            }
        };

        PROGRESS_UPDATES.inc();
        tracing::debug!(
            session_guid = %session.session_guid,
            uploaded_size = session.uploaded_size,
            "Progress recorded"
        );
        progress_view(&session)
    }

    /// Progress of the session bound to a chunk upload handle.
    pub async fn get_progress(&self, chunk_upload_id: &str) -> UploadResult<ProgressView> {
        let id = parse_bound_chunk_id(chunk_upload_id)?;
        let session = self
            .metadata
            .get_session_by_chunk_upload_id(id.as_str())
            .await?
            .ok_or_else(|| UploadError::NotFound(format!("no session for chunk upload {id}")))?
            .into_session()?;
        progress_view(&session)
    }

    pub async fn get_session(&self, session_guid: SessionId) -> UploadResult<UploadSession> {
        let row = self
            .metadata
            .get_session(*session_guid.as_uuid())
            .await?
            .ok_or_else(|| UploadError::NotFound(format!("upload session {session_guid}")))?;
        Ok(row.into_session()?)
    }

    /// Non-terminal sessions of an owner, newest first.
    pub async fn list_active_by_owner(
        &self,
        owner_id: &str,
        limit: u32,
    ) -> UploadResult<Vec<UploadSession>> {
        if owner_id.trim().is_empty() {
            return Err(UploadError::InvalidArgument(
                "owner_id must not be empty".to_string(),
            ));
        }
        let rows = self
            .metadata
            .list_active_by_owner(owner_id.trim(), limit.clamp(1, MAX_LIST_LIMIT))
            .await?;
        rows.into_iter()
            .map(|row| row.into_session().map_err(UploadError::from))
            .collect()
    }

    /// `InProgress -> Paused`.
    #[tracing::instrument(skip(self), fields(session_guid = %session_guid))]
    pub async fn pause(&self, session_guid: SessionId) -> UploadResult<UploadSession> {
        let session = self.get_session(session_guid).await?;
        session.status.transition(UploadStatus::Paused)?;

        let outcome = self
            .metadata
            .transition_status(
                *session_guid.as_uuid(),
                &[UploadStatus::InProgress],
                UploadStatus::Paused,
                OffsetDateTime::now_utc(),
            )
            .await?;
        match outcome {
            TransitionOutcome::Applied(row) => {
                tracing::info!("Upload session paused");
                Ok(row.into_session()?)
            }
            TransitionOutcome::Rejected(row) => Err(rejected("pause", &row)),
            TransitionOutcome::NotFound => Err(UploadError::NotFound(format!(
                "upload session {session_guid}"
            ))),
        }
    }

    /// Cancel a non-terminal session. Cancelling a cancelled session is a no-op.
    #[tracing::instrument(skip(self), fields(session_guid = %session_guid))]
    pub async fn cancel(&self, session_guid: SessionId) -> UploadResult<()> {
        let session = self.get_session(session_guid).await?;
        if session.status == UploadStatus::Cancelled {
            tracing::debug!("Session already cancelled");
            return Ok(());
        }
        session.status.transition(UploadStatus::Cancelled)?;

        let outcome = self
            .metadata
            .transition_status(
                *session_guid.as_uuid(),
                &UploadStatus::ACTIVE,
                UploadStatus::Cancelled,
                OffsetDateTime::now_utc(),
            )
            .await?;
        let row = match outcome {
            TransitionOutcome::Applied(row) => row,
            TransitionOutcome::Rejected(row) if row.status == UploadStatus::Cancelled.as_str() => {
                tracing::debug!("Session already cancelled");
                return Ok(());
            }
            TransitionOutcome::Rejected(row) => return Err(rejected("cancel", &row)),
            TransitionOutcome::NotFound => {
                return Err(UploadError::NotFound(format!(
                    "upload session {session_guid}"
                )));
            }
        };

        SESSIONS_CANCELLED.inc();
        tracing::info!("Upload session cancelled");
        if let Some(chunk_upload_id) = row.chunk_upload_id.as_deref() {
            self.discard_chunk(chunk_upload_id).await;
        }
        Ok(())
    }

    /// Resume a paused or failed session.
    ///
    /// The returned offset is the chunk store's, not client-reported progress.
    #[tracing::instrument(skip(self), fields(session_guid = %session_guid))]
    pub async fn resume(&self, session_guid: SessionId) -> UploadResult<ResumeUploadResponse> {
        let now = OffsetDateTime::now_utc();
        let session = self.get_session(session_guid).await?;
        if !session.can_resume_at(now, self.config.max_retries) {
            let reason = if !UploadStatus::RESUMABLE.contains(&session.status) {
                format!("cannot resume a session that is {}", session.status)
            } else if session.is_expired_at(now) {
                "session has expired".to_string()
            } else {
                format!("retry limit of {} reached", self.config.max_retries)
            };
            return Err(UploadError::InvalidTransition(reason));
        }
        let chunk_upload_id = session.chunk_upload_id.clone().ok_or_else(|| {
            UploadError::NotFound("session has no chunk upload handle".to_string())
        })?;

        // Read before mutating so an unavailable store leaves the session untouched.
        let chunk = self
            .chunks
            .status(&chunk_upload_id)
            .await
            .map_err(UploadError::from_chunk_store)?;

        let outcome = self
            .metadata
            .resume_session(*session_guid.as_uuid(), now, self.config.max_retries)
            .await?;
        let session = match outcome {
            TransitionOutcome::Applied(row) => row.into_session()?,
            TransitionOutcome::Rejected(row) => return Err(rejected("resume", &row)),
            TransitionOutcome::NotFound => {
                return Err(UploadError::NotFound(format!(
                    "upload session {session_guid}"
                )));
            }
        };

        SESSIONS_RESUMED.inc();
        tracing::info!(
            offset = chunk.current_offset,
            retry_count = session.retry_count,
            "Upload session resumed"
        );
        Ok(ResumeUploadResponse {
            session_guid,
            upload_url: self.upload_url(&chunk_upload_id),
            chunk_upload_id,
            offset: chunk.current_offset,
            expires_at: session.expires_at,
        })
    }

    /// Reconcile with the chunk store and promote the bytes to an attachment.
    #[tracing::instrument(skip(self, req), fields(session_guid = %session_guid))]
    pub async fn complete(
        &self,
        session_guid: SessionId,
        req: CompleteUploadRequest,
    ) -> UploadResult<CompleteUploadResponse> {
        let start_time = Instant::now();
        let guid = *session_guid.as_uuid();
        let chunk_upload_id = ChunkUploadId::parse(&req.chunk_upload_id)?;

        let session = self.get_session(session_guid).await?;
        session.status.transition(UploadStatus::Completed)?;
        if session.chunk_upload_id.as_ref() != Some(&chunk_upload_id) {
            return Err(UploadError::InvalidArgument(
                "chunk_upload_id does not belong to this session".to_string(),
            ));
        }

        // Reconcile. Nothing below this point may mutate the session until the
        // chunk store has confirmed every byte, except a vanished handle.
        let chunk = match self.chunks.status(&chunk_upload_id).await {
            Ok(status) => Some(status),
            Err(StorageError::NotFound(_)) => None,
            Err(e) => return Err(UploadError::from_chunk_store(e)),
        };
        if let Some(status) = &chunk
            && !status.is_complete
        {
            tracing::debug!(
                current_offset = status.current_offset,
                declared_length = status.declared_length,
                "Completion attempted before all bytes arrived"
            );
            return Err(UploadError::UploadIncomplete {
                received: status.current_offset,
                declared: status.declared_length,
            });
        }

        let now = OffsetDateTime::now_utc();
        let claimed = match self
            .metadata
            .begin_promotion(guid, now, now - self.config.promotion_lease())
            .await?
        {
            TransitionOutcome::Applied(row) => row,
            TransitionOutcome::Rejected(row) => {
                let reason = if row.promotion_started_at.is_some() {
                    "a promotion is already in progress".to_string()
                } else {
                    format!("cannot complete a session that is {}", row.status)
                };
                return Err(UploadError::InvalidTransition(reason));
            }
            TransitionOutcome::NotFound => {
                return Err(UploadError::NotFound(format!(
                    "upload session {session_guid}"
                )));
            }
        };
        let version = claimed.version;
        tracing::debug!(version, "Promotion lease claimed");

        // From here every failure must release the lease through fail_promotion.
        let Some(chunk) = chunk else {
            self.release_failed(session_guid, version, "chunk upload no longer exists")
                .await?;
            return Err(UploadError::NotFound(format!(
                "chunk upload {chunk_upload_id}"
            )));
        };

        let staging = staging_key(&session_guid, version);
        let promoted = match self
            .promote(&session, &chunk_upload_id, &chunk, &staging)
            .await
        {
            Ok(promoted) => promoted,
            Err(e) => {
                self.discard_staging(&staging).await;
                let message = match e {
                    UploadError::ChecksumOrStoreFailure(message) => message,
                    other => other.to_string(),
                };
                self.release_failed(session_guid, version, &message).await?;
                return Err(UploadError::ChecksumOrStoreFailure(message));
            }
        };

        let description = req
            .description
            .filter(|d| !d.trim().is_empty())
            .or_else(|| session.metadata.get(DESCRIPTION_KEY).cloned());
        let completed_at = OffsetDateTime::now_utc();
        let attachment = AttachmentRow {
            attachment_id: *AttachmentId::new().as_uuid(),
            session_guid: guid,
            checksum: promoted.hash.to_prefixed(),
            storage_path: promoted.key.clone(),
            content_type: session.content_type.clone(),
            original_file_name: session.file_name.clone(),
            file_size: promoted.size as i64,
            classification_id: session.classification_id,
            description,
            created_at: completed_at,
        };

        match self
            .metadata
            .complete_promotion(
                guid,
                version,
                &attachment,
                promoted.size as i64,
                completed_at,
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                // Cancel or expiry won. The stored object is content addressed
                // and may back other attachments, so it stays.
                tracing::info!("Session resolved concurrently; promotion discarded");
                return Err(UploadError::InvalidTransition(
                    "session was resolved by another operation".to_string(),
                ));
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to record attachment");
                self.release_failed(session_guid, version, "attachment record could not be written")
                    .await?;
                return Err(UploadError::ChecksumOrStoreFailure(
                    "attachment record could not be written".to_string(),
                ));
            }
        }

        self.discard_chunk(chunk_upload_id.as_str()).await;

        SESSIONS_COMPLETED.inc();
        BYTES_PROMOTED.inc_by(promoted.size);
        PROMOTION_DURATION.observe(start_time.elapsed().as_secs_f64());
        tracing::info!(
            attachment_id = %attachment.attachment_id,
            file_size = promoted.size,
            checksum = %attachment.checksum,
            "Upload completed"
        );

        Ok(CompleteUploadResponse {
            attachment_id: AttachmentId::from_uuid(attachment.attachment_id),
            file_name: attachment.original_file_name,
            file_size: promoted.size,
            content_type: attachment.content_type,
            checksum: attachment.checksum,
        })
    }

    /// Stream, checksum and store the chunk store's bytes under a timeout.
    async fn promote(
        &self,
        session: &UploadSession,
        chunk_upload_id: &ChunkUploadId,
        chunk: &ChunkStatus,
        staging: &str,
    ) -> UploadResult<Promoted> {
        if chunk.declared_length != session.total_size {
            return Err(UploadError::ChecksumOrStoreFailure(format!(
                "chunk store declared {} bytes but the session expects {}",
                chunk.declared_length, session.total_size
            )));
        }
        let folder = self.folder_for(session).await?;
        let timeout = self.config.promotion_timeout();

        match tokio::time::timeout(
            timeout,
            self.copy_to_storage(chunk_upload_id, &folder, session, staging),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(UploadError::ChecksumOrStoreFailure(format!(
                "promotion timed out after {}s",
                timeout.as_secs()
            ))),
        }
    }

    async fn copy_to_storage(
        &self,
        chunk_upload_id: &ChunkUploadId,
        folder: &str,
        session: &UploadSession,
        staging: &str,
    ) -> UploadResult<Promoted> {
        let mut content = self
            .chunks
            .open_content(chunk_upload_id)
            .await
            .map_err(store_failure("open chunk content"))?;
        let mut upload = self
            .storage
            .put_stream(staging)
            .await
            .map_err(store_failure("open staging object"))?;

        let mut hasher = ContentHash::hasher();
        while let Some(next) = content.next().await {
            let bytes = match next {
                Ok(bytes) => bytes,
                Err(e) => {
                    let _ = upload.abort().await;
                    return Err(store_failure("read chunk content")(e));
                }
            };
            if hasher.bytes_hashed() + bytes.len() as u64 > session.total_size {
                let _ = upload.abort().await;
                return Err(UploadError::ChecksumOrStoreFailure(format!(
                    "chunk content exceeds declared size of {} bytes",
                    session.total_size
                )));
            }
            hasher.update(&bytes);
            if let Err(e) = upload.write(bytes).await {
                let _ = upload.abort().await;
                return Err(store_failure("write staging object")(e));
            }
        }
        let written = upload
            .finish()
            .await
            .map_err(store_failure("finish staging object"))?;

        let hashed = hasher.bytes_hashed();
        if hashed != session.total_size || written != hashed {
            return Err(UploadError::ChecksumOrStoreFailure(format!(
                "received {hashed} bytes, stored {written}, expected {}",
                session.total_size
            )));
        }
        let hash = hasher.finalize();
        let key = storage_key(folder, &hash, &session.file_name);

        if self
            .storage
            .exists(&key)
            .await
            .map_err(store_failure("check final object"))?
        {
            OBJECTS_DEDUPLICATED.inc();
            tracing::debug!(storage_path = %key, "Content already stored");
            self.discard_staging(staging).await;
        } else {
            self.storage
                .rename(staging, &key)
                .await
                .map_err(store_failure("move staging object"))?;
        }

        Ok(Promoted {
            hash,
            key,
            size: hashed,
        })
    }

    async fn folder_for(&self, session: &UploadSession) -> UploadResult<String> {
        if let Some(folder) = &session.target_folder_path {
            return Ok(folder.clone());
        }
        if let Some(classification_id) = session.classification_id
            && let Some(folder) = self.folders.folder_for(classification_id).await?
        {
            return normalize_folder(&folder);
        }
        normalize_folder(&self.config.default_folder)
    }

    /// Move a claimed session to failed.
    ///
    /// Errors with `InvalidTransition` if another actor resolved the session
    /// after the claim.
    async fn release_failed(
        &self,
        session_guid: SessionId,
        version: i64,
        message: &str,
    ) -> UploadResult<()> {
        match self
            .metadata
            .fail_promotion(
                *session_guid.as_uuid(),
                version,
                message,
                OffsetDateTime::now_utc(),
            )
            .await
        {
            Ok(true) => {
                SESSIONS_FAILED.inc();
                tracing::warn!(error = %message, "Promotion failed; session marked failed");
                Ok(())
            }
            Ok(false) => Err(UploadError::InvalidTransition(
                "session was resolved by another operation".to_string(),
            )),
            Err(e) => {
                // The lease goes stale and can be reclaimed by the next attempt.
                tracing::error!(error = %e, "Failed to mark session as failed");
                Ok(())
            }
        }
    }

    /// Undo a half-finished initiate: a session without a handle can never
    /// make progress, so it is cancelled and any created handle released.
    async fn abandon_initiate(&self, session_guid: SessionId, chunk: Option<&ChunkUploadId>) {
        match self
            .metadata
            .transition_status(
                *session_guid.as_uuid(),
                &[UploadStatus::Created],
                UploadStatus::Cancelled,
                OffsetDateTime::now_utc(),
            )
            .await
        {
            Ok(TransitionOutcome::Applied(_)) => {}
            Ok(_) => {
                tracing::warn!(session_guid = %session_guid, "Abandoned session was no longer created");
            }
            Err(e) => {
                tracing::warn!(
                    session_guid = %session_guid,
                    error = %e,
                    "Failed to cancel abandoned session"
                );
            }
        }
        if let Some(id) = chunk {
            self.discard_chunk(id.as_str()).await;
        }
    }

    async fn discard_staging(&self, staging: &str) {
        match self.storage.delete(staging).await {
            Ok(()) | Err(StorageError::NotFound(_)) => {}
            Err(e) => {
                tracing::warn!(key = %staging, error = %e, "Failed to delete staging object");
            }
        }
    }

    /// Best-effort removal of chunk store data. Leftovers are reclaimed by
    /// the sweeper's orphan pass.
    async fn discard_chunk(&self, chunk_upload_id: &str) {
        let Ok(id) = ChunkUploadId::parse(chunk_upload_id) else {
            return;
        };
        if let Err(e) = self.chunks.delete(&id).await {
            tracing::warn!(chunk_upload_id = %id, error = %e, "Failed to delete chunk upload data");
        }
    }

    fn upload_url(&self, chunk_upload_id: &ChunkUploadId) -> String {
        format!(
            "{}/{}",
            self.config.upload_endpoint.trim_end_matches('/'),
            chunk_upload_id
        )
    }
}

fn progress_view(session: &UploadSession) -> UploadResult<ProgressView> {
    let chunk_upload_id = session
        .chunk_upload_id
        .clone()
        .ok_or_else(|| UploadError::NotFound("session has no chunk upload handle".to_string()))?;
    Ok(ProgressView {
        session_guid: session.session_guid,
        chunk_upload_id,
        status: session.status,
        uploaded_size: session.uploaded_size,
        total_size: session.total_size,
        percent: session.progress_percent(),
    })
}

fn rejected(action: &str, row: &UploadSessionRow) -> UploadError {
    if row.promotion_started_at.is_some() && row.status == UploadStatus::InProgress.as_str() {
        UploadError::InvalidTransition(format!(
            "cannot {action} while a promotion is in progress"
        ))
    } else {
        UploadError::InvalidTransition(format!("cannot {action} a session that is {}", row.status))
    }
}

/// A malformed handle cannot belong to any session.
fn parse_bound_chunk_id(chunk_upload_id: &str) -> UploadResult<ChunkUploadId> {
    ChunkUploadId::parse(chunk_upload_id)
        .map_err(|_| UploadError::NotFound("no session for that chunk upload".to_string()))
}

fn store_failure(step: &'static str) -> impl Fn(StorageError) -> UploadError {
    move |e| UploadError::ChecksumOrStoreFailure(format!("{step}: {e}"))
}
