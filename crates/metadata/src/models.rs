//! Database models mapping to the metadata schema.

use crate::error::{MetadataError, MetadataResult};
use sqlx::FromRow;
use std::collections::BTreeMap;
use stowage_core::{
    Attachment, AttachmentId, ChunkUploadId, SessionId, UploadSession, UploadStatus,
};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Upload sessions
// =============================================================================

/// Upload session record.
#[derive(Debug, Clone, FromRow)]
pub struct UploadSessionRow {
    pub id: i64,
    pub session_guid: Uuid,
    pub chunk_upload_id: Option<String>,
    pub file_name: String,
    pub content_type: String,
    pub total_size: i64,
    pub uploaded_size: i64,
    pub target_folder_path: Option<String>,
    pub classification_id: Option<i64>,
    pub owner_id: String,
    /// JSON object of string pairs, absent when empty.
    pub metadata_json: Option<String>,
    pub status: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
    pub expires_at: OffsetDateTime,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub attachment_id: Option<Uuid>,
    /// Optimistic concurrency token, bumped on every status change and claim.
    pub version: i64,
    /// Promotion lease; non-null while a completion owns the session.
    pub promotion_started_at: Option<OffsetDateTime>,
}

fn to_db_size(value: u64, field: &str) -> MetadataResult<i64> {
    i64::try_from(value).map_err(|_| MetadataError::InvalidRow(format!("{field} out of range")))
}

fn from_db_size(value: i64, field: &str) -> MetadataResult<u64> {
    u64::try_from(value).map_err(|_| MetadataError::InvalidRow(format!("negative {field}")))
}

impl UploadSessionRow {
    /// Build a row for insertion from a domain session.
    pub fn from_session(session: &UploadSession) -> MetadataResult<Self> {
        let metadata_json = if session.metadata.is_empty() {
            None
        } else {
            Some(
                serde_json::to_string(&session.metadata)
                    .map_err(|e| MetadataError::InvalidRow(format!("metadata: {e}")))?,
            )
        };

        Ok(Self {
            id: session.id,
            session_guid: *session.session_guid.as_uuid(),
            chunk_upload_id: session.chunk_upload_id.as_ref().map(|c| c.to_string()),
            file_name: session.file_name.clone(),
            content_type: session.content_type.clone(),
            total_size: to_db_size(session.total_size, "total_size")?,
            uploaded_size: to_db_size(session.uploaded_size, "uploaded_size")?,
            target_folder_path: session.target_folder_path.clone(),
            classification_id: session.classification_id,
            owner_id: session.owner_id.clone(),
            metadata_json,
            status: session.status.as_str().to_string(),
            created_at: session.created_at,
            updated_at: session.updated_at,
            completed_at: session.completed_at,
            expires_at: session.expires_at,
            error_message: session.error_message.clone(),
            retry_count: i32::try_from(session.retry_count)
                .map_err(|_| MetadataError::InvalidRow("retry_count out of range".to_string()))?,
            attachment_id: session.attachment_id.map(|a| *a.as_uuid()),
            version: session.version,
            promotion_started_at: session.promotion_started_at,
        })
    }

    /// Parse the status column.
    pub fn status(&self) -> MetadataResult<UploadStatus> {
        self.status
            .parse()
            .map_err(|e| MetadataError::InvalidRow(format!("session {}: {e}", self.session_guid)))
    }

    /// Convert into the domain session.
    pub fn into_session(self) -> MetadataResult<UploadSession> {
        let status = self.status()?;
        let chunk_upload_id = self
            .chunk_upload_id
            .as_deref()
            .map(ChunkUploadId::parse)
            .transpose()
            .map_err(|e| MetadataError::InvalidRow(e.to_string()))?;
        let metadata: BTreeMap<String, String> = match self.metadata_json.as_deref() {
            Some(raw) => serde_json::from_str(raw)
                .map_err(|e| MetadataError::InvalidRow(format!("metadata: {e}")))?,
            None => BTreeMap::new(),
        };

        Ok(UploadSession {
            id: self.id,
            session_guid: SessionId::from_uuid(self.session_guid),
            chunk_upload_id,
            file_name: self.file_name,
            content_type: self.content_type,
            total_size: from_db_size(self.total_size, "total_size")?,
            uploaded_size: from_db_size(self.uploaded_size, "uploaded_size")?,
            target_folder_path: self.target_folder_path,
            classification_id: self.classification_id,
            owner_id: self.owner_id,
            metadata,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
            expires_at: self.expires_at,
            error_message: self.error_message,
            retry_count: u32::try_from(self.retry_count)
                .map_err(|_| MetadataError::InvalidRow("negative retry_count".to_string()))?,
            attachment_id: self.attachment_id.map(AttachmentId::from_uuid),
            version: self.version,
            promotion_started_at: self.promotion_started_at,
        })
    }
}

// =============================================================================
// Attachments
// =============================================================================

/// Attachment record, written once by promotion.
#[derive(Debug, Clone, FromRow)]
pub struct AttachmentRow {
    pub attachment_id: Uuid,
    pub session_guid: Uuid,
    pub checksum: String,
    pub storage_path: String,
    pub content_type: String,
    pub original_file_name: String,
    pub file_size: i64,
    pub classification_id: Option<i64>,
    pub description: Option<String>,
    pub created_at: OffsetDateTime,
}

impl AttachmentRow {
    pub fn from_attachment(attachment: &Attachment) -> MetadataResult<Self> {
        Ok(Self {
            attachment_id: *attachment.attachment_id.as_uuid(),
            session_guid: *attachment.session_guid.as_uuid(),
            checksum: attachment.checksum.clone(),
            storage_path: attachment.storage_path.clone(),
            content_type: attachment.content_type.clone(),
            original_file_name: attachment.original_file_name.clone(),
            file_size: to_db_size(attachment.file_size, "file_size")?,
            classification_id: attachment.classification_id,
            description: attachment.description.clone(),
            created_at: attachment.created_at,
        })
    }

    pub fn into_attachment(self) -> MetadataResult<Attachment> {
        Ok(Attachment {
            attachment_id: AttachmentId::from_uuid(self.attachment_id),
            session_guid: SessionId::from_uuid(self.session_guid),
            checksum: self.checksum,
            storage_path: self.storage_path,
            content_type: self.content_type,
            original_file_name: self.original_file_name,
            file_size: from_db_size(self.file_size, "file_size")?,
            classification_id: self.classification_id,
            description: self.description,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_row_roundtrip_preserves_metadata() {
        let mut session = UploadSession::new(
            "owner-1",
            "scan.tiff",
            "image/tiff",
            42,
            time::Duration::hours(1),
        );
        session.metadata.insert("department".into(), "legal".into());
        session.chunk_upload_id = Some(ChunkUploadId::parse("abc123").unwrap());

        let row = UploadSessionRow::from_session(&session).unwrap();
        assert_eq!(row.status, "created");
        assert!(row.metadata_json.is_some());

        let back = row.into_session().unwrap();
        assert_eq!(back.session_guid, session.session_guid);
        assert_eq!(back.metadata, session.metadata);
        assert_eq!(back.chunk_upload_id, session.chunk_upload_id);
    }

    #[test]
    fn test_corrupt_status_is_invalid_row() {
        let session = UploadSession::new("o", "f", "t", 1, time::Duration::hours(1));
        let mut row = UploadSessionRow::from_session(&session).unwrap();
        row.status = "bogus".to_string();
        assert!(matches!(
            row.into_session(),
            Err(MetadataError::InvalidRow(_))
        ));
    }

    #[test]
    fn test_empty_metadata_stored_as_null() {
        let session = UploadSession::new("o", "f", "t", 1, time::Duration::hours(1));
        let row = UploadSessionRow::from_session(&session).unwrap();
        assert!(row.metadata_json.is_none());
    }
}
