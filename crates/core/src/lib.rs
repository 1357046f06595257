//! Core domain types and shared logic for stowage.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Upload session identity and lifecycle state machine
//! - Attachment records produced by promotion
//! - Content checksums
//! - Shared configuration

pub mod attachment;
pub mod config;
pub mod error;
pub mod hash;
pub mod session;

pub use attachment::{Attachment, AttachmentId};
pub use error::{Error, Result};
pub use hash::{ContentHash, ContentHasher};
pub use session::{ChunkUploadId, SessionId, UploadSession, UploadStatus};

/// Default session lifetime: 24 hours.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 60 * 60;

/// Number of failed completions after which a session can no longer resume.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Upper bound on the serialized size of a session's metadata blob.
pub const DEFAULT_MAX_METADATA_BYTES: usize = 4 * 1024;
