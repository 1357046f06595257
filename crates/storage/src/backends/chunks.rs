//! Filesystem chunk store.
//!
//! Layout under the root directory, one pair per handle:
//!
//! ```text
//! <id>        received bytes, appended in order
//! <id>.info   JSON: declared length, metadata, creation time
//! ```
//!
//! The current offset is the length of the data file. The layout is shared
//! with the chunk-upload protocol server, which appends through
//! [`FilesystemChunkStore::append`].

use super::filesystem::file_stream;
use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ChunkStatus, ChunkStore};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use stowage_core::ChunkUploadId;
use time::OffsetDateTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use uuid::Uuid;

const INFO_SUFFIX: &str = ".info";

/// Persisted description of one chunk upload.
#[derive(Debug, Serialize, Deserialize)]
struct ChunkInfo {
    declared_length: u64,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

/// Chunk store backed by a local directory.
pub struct FilesystemChunkStore {
    root: PathBuf,
    /// Serializes appends so offset checks and writes cannot interleave.
    append_lock: Mutex<()>,
}

/// Handles minted here are 32 lowercase hex chars; nothing else maps to a file.
fn is_store_id(id: &str) -> bool {
    id.len() == 32 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

impl FilesystemChunkStore {
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            append_lock: Mutex::new(()),
        })
    }

    fn paths(&self, id: &ChunkUploadId) -> StorageResult<(PathBuf, PathBuf)> {
        if !is_store_id(id.as_str()) {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok((
            self.root.join(id.as_str()),
            self.root.join(format!("{}{INFO_SUFFIX}", id.as_str())),
        ))
    }

    async fn read_info(&self, id: &ChunkUploadId, info_path: &Path) -> StorageResult<ChunkInfo> {
        let raw = fs::read(info_path)
            .await
            .map_err(|e| StorageError::from_io(id.as_str(), e))?;
        serde_json::from_slice(&raw)
            .map_err(|e| StorageError::Unavailable(format!("corrupt info for {id}: {e}")))
    }

    async fn current_offset(&self, id: &ChunkUploadId, data_path: &Path) -> StorageResult<u64> {
        fs::metadata(data_path)
            .await
            .map(|m| m.len())
            .map_err(|e| StorageError::from_io(id.as_str(), e))
    }

    /// Append bytes at `expected_offset`.
    ///
    /// Mirrors the chunk protocol's PATCH: the offset must equal the current
    /// length and the write may not run past the declared length. Returns
    /// the new offset.
    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    pub async fn append(
        &self,
        id: &ChunkUploadId,
        expected_offset: u64,
        data: Bytes,
    ) -> StorageResult<u64> {
        let (data_path, info_path) = self.paths(id)?;
        let _guard = self.append_lock.lock().await;

        let info = self.read_info(id, &info_path).await?;
        let current = self.current_offset(id, &data_path).await?;
        if current != expected_offset {
            return Err(StorageError::OffsetMismatch {
                expected: expected_offset,
                actual: current,
            });
        }
        let attempted = current + data.len() as u64;
        if attempted > info.declared_length {
            return Err(StorageError::LengthExceeded {
                declared: info.declared_length,
                attempted,
            });
        }

        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&data_path)
            .await
            .map_err(|e| StorageError::from_io(id.as_str(), e))?;
        file.write_all(&data).await?;
        file.sync_data().await?;
        Ok(attempted)
    }
}

#[async_trait]
impl ChunkStore for FilesystemChunkStore {
    #[instrument(skip(self, metadata), fields(backend = "filesystem"))]
    async fn create(
        &self,
        declared_length: u64,
        metadata: &BTreeMap<String, String>,
    ) -> StorageResult<ChunkUploadId> {
        let id = ChunkUploadId::parse(&Uuid::new_v4().simple().to_string())
            .map_err(|e| StorageError::InvalidKey(e.to_string()))?;
        let (data_path, info_path) = self.paths(&id)?;

        let info = ChunkInfo {
            declared_length,
            metadata: metadata.clone(),
            created_at: OffsetDateTime::now_utc(),
        };
        let encoded = serde_json::to_vec(&info)
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;

        fs::File::create(&data_path).await?;
        // The info file is the handle's existence marker, so it goes last.
        let temp_info = info_path.with_extension(format!("info.tmp.{}", Uuid::new_v4()));
        fs::write(&temp_info, &encoded).await?;
        fs::rename(&temp_info, &info_path).await?;

        debug!(chunk_upload_id = %id, declared_length, "Created chunk upload");
        Ok(id)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn status(&self, id: &ChunkUploadId) -> StorageResult<ChunkStatus> {
        let (data_path, info_path) = self.paths(id)?;
        let info = self.read_info(id, &info_path).await?;
        let current_offset = self.current_offset(id, &data_path).await?;
        Ok(ChunkStatus {
            declared_length: info.declared_length,
            current_offset,
            is_complete: current_offset == info.declared_length,
            created_at: info.created_at,
        })
    }

    async fn metadata(&self, id: &ChunkUploadId) -> StorageResult<BTreeMap<String, String>> {
        let (_, info_path) = self.paths(id)?;
        Ok(self.read_info(id, &info_path).await?.metadata)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn open_content(&self, id: &ChunkUploadId) -> StorageResult<ByteStream> {
        let status = self.status(id).await?;
        if !status.is_complete {
            return Err(StorageError::NotComplete(format!(
                "{id}: {} of {} bytes",
                status.current_offset, status.declared_length
            )));
        }
        let (data_path, _) = self.paths(id)?;
        let file = fs::File::open(&data_path)
            .await
            .map_err(|e| StorageError::from_io(id.as_str(), e))?;
        Ok(file_stream(file, Some(status.declared_length)))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, id: &ChunkUploadId) -> StorageResult<bool> {
        let (data_path, info_path) = match self.paths(id) {
            Ok(paths) => paths,
            Err(StorageError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        let mut removed = false;
        // Info first: once it is gone the handle no longer exists.
        for path in [&info_path, &data_path] {
            match fs::remove_file(path).await {
                Ok(()) => removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::Io(e)),
            }
        }
        Ok(removed)
    }

    async fn list_all(&self) -> StorageResult<Vec<ChunkUploadId>> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(id) = name
                .to_str()
                .and_then(|n| n.strip_suffix(INFO_SUFFIX))
                .filter(|n| is_store_id(n))
            else {
                continue;
            };
            if let Ok(id) = ChunkUploadId::parse(id) {
                ids.push(id);
            }
        }
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await?;
        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("chunk store root is not a directory: {:?}", self.root),
            )));
        }
        Ok(())
    }
}
