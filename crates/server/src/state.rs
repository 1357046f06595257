//! Application state shared across handlers.

use crate::coordinator::UploadCoordinator;
use crate::folders::{FolderResolver, StaticFolderResolver};
use crate::sweeper::ExpirationSweeper;
use std::sync::Arc;
use stowage_core::config::AppConfig;
use stowage_metadata::MetadataStore;
use stowage_storage::{ChunkStore, ObjectStore};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Session state machine and promotion.
    pub coordinator: Arc<UploadCoordinator>,
    /// Permanent attachment storage.
    pub storage: Arc<dyn ObjectStore>,
    /// In-flight chunk uploads.
    pub chunks: Arc<dyn ChunkStore>,
    /// Session and attachment records.
    pub metadata: Arc<dyn MetadataStore>,
}

impl AppState {
    /// Create a new application state with folders resolved from configuration.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        chunks: Arc<dyn ChunkStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        let folders = Arc::new(StaticFolderResolver::from_config(&config.folders));
        Self::with_folder_resolver(config, storage, chunks, metadata, folders)
    }

    /// Create a new application state with a custom folder resolver.
    pub fn with_folder_resolver(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        chunks: Arc<dyn ChunkStore>,
        metadata: Arc<dyn MetadataStore>,
        folders: Arc<dyn FolderResolver>,
    ) -> Self {
        let coordinator = Arc::new(UploadCoordinator::new(
            config.upload.clone(),
            metadata.clone(),
            storage.clone(),
            chunks.clone(),
            folders,
        ));
        Self {
            config: Arc::new(config),
            coordinator,
            storage,
            chunks,
            metadata,
        }
    }

    /// Sweeper over this state's stores.
    pub fn sweeper(&self) -> ExpirationSweeper {
        ExpirationSweeper::new(
            self.config.sweeper.clone(),
            self.metadata.clone(),
            self.chunks.clone(),
        )
    }
}
