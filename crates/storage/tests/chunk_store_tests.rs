// Chunk store behavior under the access patterns of the upload coordinator
// and a concurrent protocol server.

mod common;

use common::{seeded_bytes, write_chunked};
use futures::TryStreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use stowage_core::ContentHash;
use stowage_storage::{ChunkStore, FilesystemChunkStore, ObjectStore, StorageError};
use tempfile::TempDir;

#[tokio::test]
async fn test_chunked_writes_reassemble_in_order() {
    let temp_dir = TempDir::new().unwrap();
    let store = FilesystemChunkStore::new(temp_dir.path()).await.unwrap();

    let data = seeded_bytes(7, 300_000);
    let id = store.create(data.len() as u64, &BTreeMap::new()).await.unwrap();
    let offset = write_chunked(&store, &id, &data, 65_537).await;
    assert_eq!(offset, data.len() as u64);

    let content: Vec<bytes::Bytes> = store
        .open_content(&id)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    let content = content.concat();
    assert_eq!(ContentHash::compute(&content), ContentHash::compute(&data));
}

#[tokio::test]
async fn test_concurrent_appends_at_same_offset_only_one_wins() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(FilesystemChunkStore::new(temp_dir.path()).await.unwrap());
    let id = store.create(8, &BTreeMap::new()).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..8u8 {
        let store = store.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            store.append(&id, 0, bytes::Bytes::from(vec![i; 4])).await
        }));
    }

    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(offset) => {
                assert_eq!(offset, 4);
                ok += 1;
            }
            Err(StorageError::OffsetMismatch { expected: 0, actual: 4 }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(ok, 1, "exactly one append at offset 0 may succeed");
    assert_eq!(store.status(&id).await.unwrap().current_offset, 4);
}

#[tokio::test]
async fn test_content_streams_into_object_store() {
    let chunk_dir = TempDir::new().unwrap();
    let object_dir = TempDir::new().unwrap();
    let chunks = FilesystemChunkStore::new(chunk_dir.path()).await.unwrap();
    let objects = stowage_storage::FilesystemBackend::new(object_dir.path())
        .await
        .unwrap();

    let data = seeded_bytes(11, 100_000);
    let id = chunks.create(data.len() as u64, &BTreeMap::new()).await.unwrap();
    write_chunked(&chunks, &id, &data, 10_000).await;

    let mut stream = chunks.open_content(&id).await.unwrap();
    let mut upload = objects.put_stream("staging/test").await.unwrap();
    let mut hasher = ContentHash::hasher();
    while let Some(piece) = stream.try_next().await.unwrap() {
        hasher.update(&piece);
        upload.write(piece).await.unwrap();
    }
    assert_eq!(upload.finish().await.unwrap(), data.len() as u64);
    assert_eq!(hasher.finalize(), ContentHash::compute(&data));

    objects
        .rename("staging/test", "attachments/final.bin")
        .await
        .unwrap();
    assert_eq!(objects.get("attachments/final.bin").await.unwrap(), data);
    assert!(chunks.delete(&id).await.unwrap());
    assert!(chunks.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_status_of_deleted_handle_is_not_found() {
    let temp_dir = TempDir::new().unwrap();
    let store = FilesystemChunkStore::new(temp_dir.path()).await.unwrap();
    let id = store.create(10, &BTreeMap::new()).await.unwrap();
    store.delete(&id).await.unwrap();

    assert!(matches!(
        store.open_content(&id).await,
        Err(StorageError::NotFound(_))
    ));
    assert!(matches!(
        store.append(&id, 0, bytes::Bytes::from("x")).await,
        Err(StorageError::NotFound(_))
    ));
}
