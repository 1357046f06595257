//! Test fixtures for generating test data.

use bytes::Bytes;
use std::collections::BTreeMap;
use stowage_core::session::{CompleteUploadRequest, InitiateUploadRequest};
use stowage_core::{ChunkUploadId, UploadStatus};
use stowage_metadata::models::UploadSessionRow;
use stowage_storage::FilesystemChunkStore;
use time::OffsetDateTime;
use uuid::Uuid;

/// Generate deterministic test data based on a seed.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Initiate request with sensible defaults.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub fn initiate_request(owner_id: &str, file_name: &str, file_size: u64) -> InitiateUploadRequest {
    InitiateUploadRequest {
        owner_id: owner_id.to_string(),
        file_name: file_name.to_string(),
        content_type: Some("application/octet-stream".to_string()),
        file_size,
        folder_path: None,
        classification_id: None,
        description: None,
        metadata: None,
    }
}

#[allow(dead_code)]
pub fn complete_request(chunk_upload_id: &ChunkUploadId) -> CompleteUploadRequest {
    CompleteUploadRequest {
        chunk_upload_id: chunk_upload_id.to_string(),
        description: None,
    }
}

/// Append `data` to a chunk upload in `chunk_size` pieces, the way a
/// protocol client would.
#[allow(dead_code)]
pub async fn write_chunked(
    store: &FilesystemChunkStore,
    id: &ChunkUploadId,
    data: &[u8],
    chunk_size: usize,
) -> u64 {
    let mut offset = 0u64;
    for piece in data.chunks(chunk_size) {
        offset = store
            .append(id, offset, Bytes::copy_from_slice(piece))
            .await
            .expect("append failed");
    }
    offset
}

/// A `created` session row for repository tests.
#[allow(dead_code)]
pub fn session_row(owner_id: &str, total_size: i64) -> UploadSessionRow {
    let now = OffsetDateTime::now_utc();
    UploadSessionRow {
        id: 0,
        session_guid: Uuid::new_v4(),
        chunk_upload_id: None,
        file_name: "data.bin".to_string(),
        content_type: "application/octet-stream".to_string(),
        total_size,
        uploaded_size: 0,
        target_folder_path: None,
        classification_id: None,
        owner_id: owner_id.to_string(),
        metadata_json: Some(serde_json::to_string(&BTreeMap::<String, String>::new()).unwrap()),
        status: UploadStatus::Created.as_str().to_string(),
        created_at: now,
        updated_at: now,
        completed_at: None,
        expires_at: now + time::Duration::hours(24),
        error_message: None,
        retry_count: 0,
        attachment_id: None,
        version: 0,
        promotion_started_at: None,
    }
}

/// Fresh 32-char hex chunk handle string.
#[allow(dead_code)]
pub fn chunk_handle() -> String {
    Uuid::new_v4().simple().to_string()
}
