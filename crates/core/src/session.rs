//! Upload session types and lifecycle.

use crate::attachment::AttachmentId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// Externally visible identifier of an upload session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidSessionId(format!("{s}: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maximum length of a chunk upload handle.
const MAX_CHUNK_UPLOAD_ID_LEN: usize = 128;

/// Handle correlating a session with its entry in the chunk store.
///
/// Handles are opaque to this system but restricted to `[A-Za-z0-9_-]`
/// so they are safe to embed in URLs and storage keys.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChunkUploadId(String);

impl ChunkUploadId {
    /// Parse and validate a chunk upload handle.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.is_empty() || s.len() > MAX_CHUNK_UPLOAD_ID_LEN {
            return Err(crate::Error::InvalidChunkUploadId(format!(
                "length must be between 1 and {MAX_CHUNK_UPLOAD_ID_LEN}, got {}",
                s.len()
            )));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(crate::Error::InvalidChunkUploadId(format!(
                "contains invalid characters: {s}"
            )));
        }
        Ok(Self(s.to_string()))
    }

    /// Borrow the handle as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ChunkUploadId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<ChunkUploadId> for String {
    fn from(id: ChunkUploadId) -> Self {
        id.0
    }
}

impl fmt::Debug for ChunkUploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkUploadId({})", self.0)
    }
}

impl fmt::Display for ChunkUploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Upload session status.
///
/// ```text
/// Created ──progress──▶ InProgress ◀──resume/progress── Paused
///    │                   │    ▲  └──────pause──────────▶  │
///    │                   │    └───────resume──── Failed ◀─┤
///    └──── complete ─────┴──────────▶ Completed           │
/// any non-terminal ── cancel ──▶ Cancelled, ── sweep ──▶ Expired
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    /// Session exists, no progress reported yet.
    Created,
    /// Chunks are arriving.
    InProgress,
    /// Client explicitly paused the upload.
    Paused,
    /// Bytes were promoted and an attachment exists.
    Completed,
    /// Completion failed; may be resumed while retries remain.
    Failed,
    /// Client cancelled the upload.
    Cancelled,
    /// The sweeper found the session past its expiry.
    Expired,
}

impl UploadStatus {
    /// Every non-terminal status.
    pub const ACTIVE: [UploadStatus; 4] = [
        UploadStatus::Created,
        UploadStatus::InProgress,
        UploadStatus::Paused,
        UploadStatus::Failed,
    ];

    /// Statuses from which `complete()` may start.
    pub const COMPLETABLE: [UploadStatus; 3] = [
        UploadStatus::Created,
        UploadStatus::InProgress,
        UploadStatus::Paused,
    ];

    /// Statuses from which a resume is possible.
    pub const RESUMABLE: [UploadStatus; 2] = [UploadStatus::Failed, UploadStatus::Paused];

    /// Stable string form, as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Check if the session reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Expired)
    }

    /// Check whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: UploadStatus) -> bool {
        use UploadStatus::*;
        match (self, next) {
            (Created, InProgress) => true,
            (InProgress, Paused) => true,
            (Paused, InProgress) => true,
            (Created | InProgress | Paused, Completed) => true,
            (InProgress | Paused, Failed) => true,
            (Failed, InProgress) => true,
            (Created | InProgress | Paused | Failed, Cancelled | Expired) => true,
            _ => false,
        }
    }

    /// Validate a transition, returning the new status.
    pub fn transition(self, next: UploadStatus) -> crate::Result<UploadStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(crate::Error::InvalidTransition {
                from: self.as_str().to_string(),
                to: next.as_str().to_string(),
            })
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "created" => Ok(Self::Created),
            "in_progress" => Ok(Self::InProgress),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            other => Err(crate::Error::InvalidStatus(other.to_string())),
        }
    }
}

/// The authoritative business record of one upload attempt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadSession {
    /// Sequence-assigned internal identifier (0 until persisted).
    pub id: i64,
    /// Externally visible identifier.
    pub session_guid: SessionId,
    /// Chunk store handle, bound once after the handle is created.
    pub chunk_upload_id: Option<ChunkUploadId>,
    pub file_name: String,
    pub content_type: String,
    /// Size declared by the client at initiation.
    pub total_size: u64,
    /// Bytes acknowledged so far; advisory until reconciled at completion.
    pub uploaded_size: u64,
    pub target_folder_path: Option<String>,
    pub classification_id: Option<i64>,
    pub owner_id: String,
    pub metadata: BTreeMap<String, String>,
    pub status: UploadStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub attachment_id: Option<AttachmentId>,
    /// Bumped on every status change and promotion claim.
    pub version: i64,
    /// Set while a completion holds the promotion lease.
    #[serde(with = "time::serde::rfc3339::option")]
    pub promotion_started_at: Option<OffsetDateTime>,
}

impl UploadSession {
    /// Create a new session in `Created` state.
    pub fn new(
        owner_id: impl Into<String>,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        total_size: u64,
        expires_in: time::Duration,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: 0,
            session_guid: SessionId::new(),
            chunk_upload_id: None,
            file_name: file_name.into(),
            content_type: content_type.into(),
            total_size,
            uploaded_size: 0,
            target_folder_path: None,
            classification_id: None,
            owner_id: owner_id.into(),
            metadata: BTreeMap::new(),
            status: UploadStatus::Created,
            created_at: now,
            updated_at: now,
            completed_at: None,
            expires_at: now + expires_in,
            error_message: None,
            retry_count: 0,
            attachment_id: None,
            version: 0,
            promotion_started_at: None,
        }
    }

    /// Check if the session has expired as of `now`.
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// `status ∈ {Failed, Paused} ∧ now < expires_at ∧ retry_count < max_retries`.
    pub fn can_resume_at(&self, now: OffsetDateTime, max_retries: u32) -> bool {
        UploadStatus::RESUMABLE.contains(&self.status)
            && !self.is_expired_at(now)
            && self.retry_count < max_retries
    }

    /// Upload progress in percent, clamped to 100.
    pub fn progress_percent(&self) -> f64 {
        if self.total_size == 0 {
            return 0.0;
        }
        let pct = self.uploaded_size as f64 * 100.0 / self.total_size as f64;
        pct.min(100.0)
    }
}

/// Request to initiate an upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitiateUploadRequest {
    /// Identity of the uploading client.
    pub owner_id: String,
    pub file_name: String,
    /// Defaults to `application/octet-stream`.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Declared size in bytes.
    pub file_size: u64,
    #[serde(default)]
    pub folder_path: Option<String>,
    #[serde(default)]
    pub classification_id: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    /// Free-form key/value metadata forwarded to the chunk store.
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, String>>,
}

/// Response from initiating an upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitiateUploadResponse {
    pub session_guid: SessionId,
    pub chunk_upload_id: ChunkUploadId,
    /// Where the client sends chunks using the chunk-upload protocol.
    pub upload_url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Request to complete an upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompleteUploadRequest {
    pub chunk_upload_id: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Response from a successful completion.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompleteUploadResponse {
    pub attachment_id: AttachmentId,
    pub file_name: String,
    pub file_size: u64,
    pub content_type: String,
    /// `sha256:<hex>` checksum of the promoted bytes.
    pub checksum: String,
}

/// Client progress callback payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateProgressRequest {
    pub uploaded_bytes: u64,
}

/// Response from resuming a session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResumeUploadResponse {
    pub session_guid: SessionId,
    pub chunk_upload_id: ChunkUploadId,
    pub upload_url: String,
    /// Byte offset the chunk store has acknowledged; continue from here.
    pub offset: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Read-only view of a session for query endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionView {
    pub session_guid: SessionId,
    pub chunk_upload_id: Option<ChunkUploadId>,
    pub owner_id: String,
    pub file_name: String,
    pub content_type: String,
    pub total_size: u64,
    pub uploaded_size: u64,
    pub status: UploadStatus,
    pub target_folder_path: Option<String>,
    pub classification_id: Option<i64>,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub attachment_id: Option<AttachmentId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

impl From<&UploadSession> for SessionView {
    fn from(s: &UploadSession) -> Self {
        Self {
            session_guid: s.session_guid,
            chunk_upload_id: s.chunk_upload_id.clone(),
            owner_id: s.owner_id.clone(),
            file_name: s.file_name.clone(),
            content_type: s.content_type.clone(),
            total_size: s.total_size,
            uploaded_size: s.uploaded_size,
            status: s.status,
            target_folder_path: s.target_folder_path.clone(),
            classification_id: s.classification_id,
            retry_count: s.retry_count,
            error_message: s.error_message.clone(),
            attachment_id: s.attachment_id,
            created_at: s.created_at,
            expires_at: s.expires_at,
            completed_at: s.completed_at,
        }
    }
}

/// Progress snapshot keyed by chunk upload handle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressView {
    pub session_guid: SessionId,
    pub chunk_upload_id: ChunkUploadId,
    pub status: UploadStatus,
    pub uploaded_size: u64,
    pub total_size: u64,
    pub percent: f64,
}
