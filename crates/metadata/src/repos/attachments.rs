//! Attachment repository.

use crate::error::MetadataResult;
use crate::models::AttachmentRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Read access to promoted attachments. Rows are only written by
/// [`crate::repos::SessionRepo::complete_promotion`].
#[async_trait]
pub trait AttachmentRepo: Send + Sync {
    async fn get_attachment(&self, attachment_id: Uuid) -> MetadataResult<Option<AttachmentRow>>;

    async fn get_attachment_by_session(
        &self,
        session_guid: Uuid,
    ) -> MetadataResult<Option<AttachmentRow>>;

    async fn count_attachments_for_session(&self, session_guid: Uuid) -> MetadataResult<u64>;
}
