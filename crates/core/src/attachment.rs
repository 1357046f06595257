//! Attachment records created by successful promotions.

use crate::session::SessionId;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Identifier of a promoted attachment.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentId(Uuid);

impl AttachmentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidArgument(format!("invalid attachment id {s}: {e}")))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AttachmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttachmentId({})", self.0)
    }
}

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A file that has been durably promoted into permanent storage.
///
/// Exactly one attachment exists per completed session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Attachment {
    pub attachment_id: AttachmentId,
    pub session_guid: SessionId,
    /// `sha256:<hex>` checksum of the stored bytes.
    pub checksum: String,
    /// Key of the object in the permanent store.
    pub storage_path: String,
    pub content_type: String,
    pub original_file_name: String,
    pub file_size: u64,
    pub classification_id: Option<i64>,
    pub description: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
