//! Fault-injecting store wrappers.
//!
//! Each wrapper delegates to a real backend until a fault is switched on.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use stowage_core::ChunkUploadId;
use stowage_storage::{
    ByteStream, ChunkStatus, ChunkStore, ObjectMeta, ObjectStore, StorageError, StorageResult,
    StreamingUpload,
};

/// How writes to the object store misbehave.
#[derive(Debug, Default)]
pub struct WriteFaults {
    /// Every streaming write fails with an I/O error.
    pub fail: AtomicBool,
    /// Every streaming write hangs far beyond any test timeout.
    pub stall: AtomicBool,
}

/// Object store whose streaming writes can fail or stall on demand.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct FaultyObjectStore {
    inner: Arc<dyn ObjectStore>,
    pub faults: Arc<WriteFaults>,
}

#[allow(dead_code)]
impl FaultyObjectStore {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self {
            inner,
            faults: Arc::new(WriteFaults::default()),
        }
    }

    pub fn fail_writes(&self, on: bool) {
        self.faults.fail.store(on, Ordering::SeqCst);
    }

    pub fn stall_writes(&self, on: bool) {
        self.faults.stall.store(on, Ordering::SeqCst);
    }
}

struct FaultyUpload {
    inner: Box<dyn StreamingUpload>,
    faults: Arc<WriteFaults>,
}

#[async_trait]
impl StreamingUpload for FaultyUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        if self.faults.stall.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.faults.fail.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other(
                "injected write failure",
            )));
        }
        self.inner.write(data).await
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        self.inner.finish().await
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        self.inner.abort().await
    }
}

#[async_trait]
impl ObjectStore for FaultyObjectStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.inner.head(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        self.inner.get_stream(key).await
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.inner.put(key, data).await
    }

    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        let inner = self.inner.put_stream(key).await?;
        Ok(Box::new(FaultyUpload {
            inner,
            faults: self.faults.clone(),
        }))
    }

    async fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        self.inner.rename(from, to).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(prefix).await
    }

    async fn resolve_path(&self, key: &str) -> StorageResult<PathBuf> {
        self.inner.resolve_path(key).await
    }

    fn backend_name(&self) -> &'static str {
        "faulty"
    }
}

/// Chunk store that can report itself unavailable or fail deletes.
#[allow(dead_code)]
pub struct FaultyChunkStore {
    inner: Arc<dyn ChunkStore>,
    unavailable: AtomicBool,
    fail_deletes: AtomicBool,
}

#[allow(dead_code)]
impl FaultyChunkStore {
    pub fn new(inner: Arc<dyn ChunkStore>) -> Self {
        Self {
            inner,
            unavailable: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
        }
    }

    /// Make every call except delete fail as a backend outage.
    pub fn set_unavailable(&self, on: bool) {
        self.unavailable.store(on, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, on: bool) {
        self.fail_deletes.store(on, Ordering::SeqCst);
    }

    fn check(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "injected chunk store outage".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for FaultyChunkStore {
    async fn create(
        &self,
        declared_length: u64,
        metadata: &BTreeMap<String, String>,
    ) -> StorageResult<ChunkUploadId> {
        self.check()?;
        self.inner.create(declared_length, metadata).await
    }

    async fn status(&self, id: &ChunkUploadId) -> StorageResult<ChunkStatus> {
        self.check()?;
        self.inner.status(id).await
    }

    async fn metadata(&self, id: &ChunkUploadId) -> StorageResult<BTreeMap<String, String>> {
        self.check()?;
        self.inner.metadata(id).await
    }

    async fn open_content(&self, id: &ChunkUploadId) -> StorageResult<ByteStream> {
        self.check()?;
        self.inner.open_content(id).await
    }

    async fn delete(&self, id: &ChunkUploadId) -> StorageResult<bool> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other(
                "injected delete failure",
            )));
        }
        self.inner.delete(id).await
    }

    async fn list_all(&self) -> StorageResult<Vec<ChunkUploadId>> {
        self.check()?;
        self.inner.list_all().await
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.check()?;
        self.inner.health_check().await
    }

    fn backend_name(&self) -> &'static str {
        "faulty"
    }
}
