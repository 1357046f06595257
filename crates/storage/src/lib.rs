//! Storage adapters for stowage.
//!
//! This crate provides:
//! - [`ObjectStore`]: the permanent store that promoted attachments land in
//! - [`ChunkStore`]: the adapter over the chunked-upload backend holding
//!   in-flight bytes
//! - Filesystem implementations of both

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::{chunks::FilesystemChunkStore, filesystem::FilesystemBackend};
pub use error::{StorageError, StorageResult};
pub use traits::{ByteStream, ChunkStatus, ChunkStore, ObjectMeta, ObjectStore, StreamingUpload};

use std::sync::Arc;
use stowage_core::config::{ChunkStoreConfig, StorageConfig};

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
    }
}

/// Create a chunk store from configuration.
pub async fn chunk_store_from_config(
    config: &ChunkStoreConfig,
) -> StorageResult<Arc<dyn ChunkStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        ChunkStoreConfig::Filesystem { path } => {
            let store = FilesystemChunkStore::new(path).await?;
            Ok(Arc::new(store))
        }
    }
}
