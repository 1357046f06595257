use bytes::Bytes;
use stowage_core::ChunkUploadId;
use stowage_storage::FilesystemChunkStore;

/// Deterministic pseudo-random bytes; the same seed gives the same output.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Append `data` to a chunk upload in `chunk_size` pieces, the way a
/// protocol client would.
#[allow(dead_code)]
pub async fn write_chunked(
    store: &FilesystemChunkStore,
    id: &ChunkUploadId,
    data: &Bytes,
    chunk_size: usize,
) -> u64 {
    let mut offset = 0u64;
    for piece in data.chunks(chunk_size) {
        offset = store
            .append(id, offset, Bytes::copy_from_slice(piece))
            .await
            .unwrap();
    }
    offset
}
