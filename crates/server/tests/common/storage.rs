//! Storage test utilities.

use std::sync::Arc;
use stowage_storage::{FilesystemBackend, FilesystemChunkStore, StorageResult};
use tempfile::TempDir;

/// Object store and chunk store rooted in one temporary directory.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestStorage {
    pub objects: Arc<FilesystemBackend>,
    pub chunks: Arc<FilesystemChunkStore>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestStorage {
    /// Create both stores under a fresh temporary directory.
    pub async fn new() -> StorageResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let objects = FilesystemBackend::new(temp_dir.path().join("objects")).await?;
        let chunks = FilesystemChunkStore::new(temp_dir.path().join("chunks")).await?;

        Ok(Self {
            objects: Arc::new(objects),
            chunks: Arc::new(chunks),
            _temp_dir: temp_dir,
        })
    }
}
