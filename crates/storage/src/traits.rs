//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::pin::Pin;
use stowage_core::ChunkUploadId;
use time::OffsetDateTime;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Durable store for promoted attachments.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's size without fetching content.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Get an object's content.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Get an object as a byte stream.
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Put an object atomically.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Start a streaming upload. Nothing is visible under `key` until
    /// [`StreamingUpload::finish`] succeeds.
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>>;

    /// Atomically move an object to a new key, replacing any existing object.
    ///
    /// Readers of `to` observe either the old object or the complete new one.
    async fn rename(&self, from: &str, to: &str) -> StorageResult<()>;

    /// Delete an object.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List objects with a prefix.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Resolve a key to an absolute location on the backing medium.
    async fn resolve_path(&self, key: &str) -> StorageResult<PathBuf>;

    /// Static identifier of the backend type, used for metrics and logging.
    fn backend_name(&self) -> &'static str;

    /// Verify storage backend connectivity.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time (if available).
    pub last_modified: Option<OffsetDateTime>,
}

/// Trait for streaming uploads.
#[async_trait]
pub trait StreamingUpload: Send {
    /// Write a chunk of data.
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Finish the upload and return the total bytes written.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Abort the upload.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}

/// Snapshot of an in-flight chunk upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkStatus {
    /// Length the client declared when the handle was created.
    pub declared_length: u64,
    /// Bytes that have actually arrived.
    pub current_offset: u64,
    /// `current_offset == declared_length`.
    pub is_complete: bool,
    pub created_at: OffsetDateTime,
}

/// Adapter over the chunked-upload backend.
///
/// Implementations never read or write upload sessions. Backend failures
/// surface as retryable errors (see [`crate::StorageError::is_retryable`]).
#[async_trait]
pub trait ChunkStore: Send + Sync + 'static {
    /// Create a new handle for `declared_length` bytes.
    async fn create(
        &self,
        declared_length: u64,
        metadata: &BTreeMap<String, String>,
    ) -> StorageResult<ChunkUploadId>;

    /// Report declared length and current offset.
    async fn status(&self, id: &ChunkUploadId) -> StorageResult<ChunkStatus>;

    /// Metadata supplied at creation.
    async fn metadata(&self, id: &ChunkUploadId) -> StorageResult<BTreeMap<String, String>>;

    /// Stream the received bytes. Fails with `NotComplete` until every
    /// declared byte has arrived.
    async fn open_content(&self, id: &ChunkUploadId) -> StorageResult<ByteStream>;

    /// Remove the handle and its data. Returns false if it was already absent.
    async fn delete(&self, id: &ChunkUploadId) -> StorageResult<bool>;

    /// Every handle currently held by the store.
    async fn list_all(&self) -> StorageResult<Vec<ChunkUploadId>>;

    fn backend_name(&self) -> &'static str;

    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
