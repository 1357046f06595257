//! Server test utilities.

use crate::common::faults::{FaultyChunkStore, FaultyObjectStore};
use crate::common::fixtures::write_chunked;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use stowage_core::config::{AppConfig, ChunkStoreConfig, MetadataConfig, StorageConfig};
use stowage_core::{ChunkUploadId, SessionId};
use stowage_metadata::{MetadataStore, SqliteStore};
use stowage_server::{AppState, UploadCoordinator, create_router};
use stowage_storage::{ChunkStore, FilesystemBackend, FilesystemChunkStore, ObjectStore};
use tempfile::TempDir;
use time::OffsetDateTime;
use tower::ServiceExt;

/// A test server wrapper with all dependencies.
///
/// The state's stores are fault-injecting wrappers around real filesystem
/// backends; faults are off until a test switches them on.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    /// Underlying chunk store, for appending bytes like a protocol client.
    pub chunks: Arc<FilesystemChunkStore>,
    /// Underlying object store, for inspecting promoted objects.
    pub objects: Arc<FilesystemBackend>,
    pub object_faults: Arc<FaultyObjectStore>,
    pub chunk_faults: Arc<FaultyChunkStore>,
    pub sqlite: Arc<SqliteStore>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let storage_path = temp_dir.path().join("storage");
        let chunks_path = temp_dir.path().join("chunks");
        let db_path = temp_dir.path().join("metadata.db");

        let objects = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        );
        let chunks = Arc::new(
            FilesystemChunkStore::new(&chunks_path)
                .await
                .expect("Failed to create chunk store"),
        );
        let sqlite = Arc::new(
            SqliteStore::new(&db_path)
                .await
                .expect("Failed to create metadata store"),
        );

        let mut config = AppConfig::for_testing();
        config.storage = StorageConfig::Filesystem { path: storage_path };
        config.chunk_store = ChunkStoreConfig::Filesystem { path: chunks_path };
        config.metadata = MetadataConfig::Sqlite { path: db_path };
        modifier(&mut config);

        let object_faults = Arc::new(FaultyObjectStore::new(objects.clone()));
        let chunk_faults = Arc::new(FaultyChunkStore::new(chunks.clone()));

        let storage: Arc<dyn ObjectStore> = object_faults.clone();
        let chunk_store: Arc<dyn ChunkStore> = chunk_faults.clone();
        let metadata: Arc<dyn MetadataStore> = sqlite.clone();

        let state = AppState::new(config, storage, chunk_store, metadata);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            chunks,
            objects,
            object_faults,
            chunk_faults,
            sqlite,
            _temp_dir: temp_dir,
        }
    }

    pub fn coordinator(&self) -> &UploadCoordinator {
        &self.state.coordinator
    }

    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Deliver every byte of `data` to the chunk store.
    pub async fn upload_all(&self, id: &ChunkUploadId, data: &[u8]) -> u64 {
        write_chunked(&self.chunks, id, data, 256).await
    }

    /// Continue an upload that already holds `offset` bytes.
    pub async fn upload_all_from(&self, id: &ChunkUploadId, offset: u64, data: &[u8]) -> u64 {
        self.chunks
            .append(id, offset, Bytes::copy_from_slice(data))
            .await
            .expect("append failed")
    }

    /// Move a session's expiry into the past.
    pub async fn force_expiry(&self, session_guid: SessionId) {
        let past = OffsetDateTime::now_utc() - time::Duration::minutes(5);
        sqlx::query("UPDATE upload_sessions SET expires_at = ? WHERE session_guid = ?")
            .bind(past)
            .bind(*session_guid.as_uuid())
            .execute(self.sqlite.pool())
            .await
            .expect("Failed to move expiry");
    }

    /// Make every chunk handle binding fail in the database.
    pub async fn refuse_chunk_binding(&self) {
        sqlx::query(
            "CREATE TRIGGER refuse_chunk_binding BEFORE UPDATE OF chunk_upload_id \
             ON upload_sessions BEGIN SELECT RAISE(ABORT, 'binding refused'); END",
        )
        .execute(self.sqlite.pool())
        .await
        .expect("Failed to install trigger");
    }

    /// Send a request and decode the JSON response body (Null when empty).
    pub async fn json(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(serde_json::to_vec(&v).unwrap())
            }
            None => Body::empty(),
        };

        let request = builder.body(body).unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();

        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&body_bytes).into_owned())
            })
        };
        (status, json)
    }
}
