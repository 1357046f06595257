//! Integration tests for the expiration sweeper.
//!
//! Covers batch limits, expiry racing completion, and reclamation of chunk
//! uploads whose session is gone or finished.

mod common;

use common::TestServer;
use common::fixtures::{complete_request, initiate_request, seeded_bytes};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use stowage_core::config::{AppConfig, SweeperConfig};
use stowage_core::session::InitiateUploadResponse;
use stowage_core::UploadStatus;
use stowage_server::{ExpirationSweeper, SweepStats};
use stowage_storage::{ChunkStore, StorageError};

async fn initiate(server: &TestServer, name: &str) -> InitiateUploadResponse {
    server
        .coordinator()
        .initiate(initiate_request("owner-1", name, 16))
        .await
        .unwrap()
}

async fn status_of(server: &TestServer, resp: &InitiateUploadResponse) -> UploadStatus {
    server
        .coordinator()
        .get_session(resp.session_guid)
        .await
        .unwrap()
        .status
}

/// Sweeper over the server's stores with its own configuration.
fn sweeper(server: &TestServer, config: SweeperConfig) -> ExpirationSweeper {
    ExpirationSweeper::new(config, server.metadata(), server.state.chunks.clone())
}

#[tokio::test]
async fn test_sweep_expires_only_past_due_sessions() {
    let server = TestServer::new().await;
    let due = initiate(&server, "due.bin").await;
    let fresh = initiate(&server, "fresh.bin").await;
    server.force_expiry(due.session_guid).await;

    let stats = server.state.sweeper().run_once().await;
    assert_eq!(
        stats,
        SweepStats {
            sessions_processed: 1,
            sessions_expired: 1,
            chunks_deleted: 1,
            orphans_reclaimed: 0,
            errors: 0,
        }
    );

    assert_eq!(status_of(&server, &due).await, UploadStatus::Expired);
    assert_eq!(status_of(&server, &fresh).await, UploadStatus::Created);
    assert!(matches!(
        server.chunks.status(&due.chunk_upload_id).await,
        Err(StorageError::NotFound(_))
    ));
    assert!(server.chunks.status(&fresh.chunk_upload_id).await.is_ok());

    // Nothing left to do.
    let stats = server.state.sweeper().run_once().await;
    assert_eq!(stats.sessions_processed, 0);
}

#[tokio::test]
async fn test_sweep_processes_multiple_batches() {
    let server = TestServer::new().await;
    let mut sessions = Vec::new();
    for i in 0..5 {
        let resp = initiate(&server, &format!("{i}.bin")).await;
        server.force_expiry(resp.session_guid).await;
        sessions.push(resp);
    }

    let config = SweeperConfig {
        batch_size: 2,
        max_batches: 10,
        ..SweeperConfig::default()
    };
    let stats = sweeper(&server, config).run_once().await;
    assert_eq!(stats.sessions_expired, 5);
    assert_eq!(stats.chunks_deleted, 5);

    for resp in &sessions {
        assert_eq!(status_of(&server, resp).await, UploadStatus::Expired);
    }
}

#[tokio::test]
async fn test_sweep_stops_after_max_batches() {
    let server = TestServer::new().await;
    for i in 0..5 {
        let resp = initiate(&server, &format!("{i}.bin")).await;
        server.force_expiry(resp.session_guid).await;
    }

    let config = SweeperConfig {
        batch_size: 2,
        max_batches: 1,
        ..SweeperConfig::default()
    };
    let sweeper = sweeper(&server, config);

    assert_eq!(sweeper.run_once().await.sessions_expired, 2);
    assert_eq!(sweeper.run_once().await.sessions_expired, 2);
    assert_eq!(sweeper.run_once().await.sessions_expired, 1);
    assert_eq!(sweeper.run_once().await.sessions_expired, 0);
}

#[tokio::test]
async fn test_sweep_skips_sessions_completed_first() {
    let server = TestServer::new().await;
    let data = seeded_bytes(1, 16);
    let resp = initiate(&server, "done.bin").await;
    server.upload_all(&resp.chunk_upload_id, &data).await;
    server
        .coordinator()
        .complete(resp.session_guid, complete_request(&resp.chunk_upload_id))
        .await
        .unwrap();
    server.force_expiry(resp.session_guid).await;

    let stats = server.state.sweeper().run_once().await;
    assert_eq!(stats.sessions_processed, 0);
    assert_eq!(status_of(&server, &resp).await, UploadStatus::Completed);
}

#[tokio::test]
async fn test_failed_chunk_delete_is_counted_and_reclaimed_later() {
    let server = TestServer::new().await;
    let resp = initiate(&server, "stuck.bin").await;
    server.force_expiry(resp.session_guid).await;

    server.chunk_faults.fail_deletes(true);
    let stats = server.state.sweeper().run_once().await;
    assert_eq!(stats.sessions_expired, 1);
    assert_eq!(stats.chunks_deleted, 0);
    assert_eq!(stats.errors, 1);
    assert_eq!(status_of(&server, &resp).await, UploadStatus::Expired);
    assert!(server.chunks.status(&resp.chunk_upload_id).await.is_ok());

    // The session is terminal now, so its leftover chunk data is an orphan.
    server.chunk_faults.fail_deletes(false);
    let config = SweeperConfig {
        orphan_grace_secs: 0,
        ..SweeperConfig::default()
    };
    let stats = sweeper(&server, config).run_once().await;
    assert_eq!(stats.sessions_processed, 0);
    assert_eq!(stats.orphans_reclaimed, 1);
    assert!(matches!(
        server.chunks.status(&resp.chunk_upload_id).await,
        Err(StorageError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_orphan_pass_keeps_active_sessions_chunks() {
    let server = TestServer::with_config(|config: &mut AppConfig| {
        config.sweeper.orphan_grace_secs = 0;
    })
    .await;

    let active = initiate(&server, "active.bin").await;
    let paused = initiate(&server, "paused.bin").await;
    server
        .coordinator()
        .record_progress(paused.chunk_upload_id.as_str(), 1)
        .await
        .unwrap();
    server.coordinator().pause(paused.session_guid).await.unwrap();

    // Cancelled while the chunk store refused deletes: chunk data stays behind.
    let cancelled = initiate(&server, "cancelled.bin").await;
    server.chunk_faults.fail_deletes(true);
    server.coordinator().cancel(cancelled.session_guid).await.unwrap();
    server.chunk_faults.fail_deletes(false);

    let stray = server.chunks.create(8, &BTreeMap::new()).await.unwrap();

    let stats = server.state.sweeper().run_once().await;
    assert_eq!(stats.orphans_reclaimed, 2);
    assert_eq!(stats.errors, 0);

    assert!(server.chunks.status(&active.chunk_upload_id).await.is_ok());
    assert!(server.chunks.status(&paused.chunk_upload_id).await.is_ok());
    for id in [&cancelled.chunk_upload_id, &stray] {
        assert!(matches!(
            server.chunks.status(id).await,
            Err(StorageError::NotFound(_))
        ));
    }
    assert_eq!(status_of(&server, &active).await, UploadStatus::Created);
    assert_eq!(status_of(&server, &paused).await, UploadStatus::Paused);
}

#[tokio::test]
async fn test_orphan_pass_can_be_disabled() {
    let server = TestServer::with_config(|config: &mut AppConfig| {
        config.sweeper.orphan_grace_secs = 0;
        config.sweeper.reclaim_orphans = false;
    })
    .await;
    let stray = server.chunks.create(8, &BTreeMap::new()).await.unwrap();

    let stats = server.state.sweeper().run_once().await;
    assert_eq!(stats, SweepStats::default());
    assert!(server.chunks.status(&stray).await.is_ok());
}

#[tokio::test]
async fn test_chunk_store_outage_is_counted_not_fatal() {
    let server = TestServer::new().await;
    let resp = initiate(&server, "late.bin").await;
    server.force_expiry(resp.session_guid).await;

    server.chunk_faults.set_unavailable(true);
    let stats = server.state.sweeper().run_once().await;

    // Expiry only needs the metadata store; listing chunk uploads fails.
    assert_eq!(stats.sessions_expired, 1);
    assert_eq!(stats.errors, 1);
    assert_eq!(status_of(&server, &resp).await, UploadStatus::Expired);
}

#[tokio::test]
async fn test_spawned_sweeper_expires_sessions() {
    let server = TestServer::with_config(|config: &mut AppConfig| {
        config.sweeper.interval_secs = 1;
    })
    .await;
    let resp = initiate(&server, "bg.bin").await;
    server.force_expiry(resp.session_guid).await;

    let handle = Arc::new(server.state.sweeper()).spawn();

    let mut expired = false;
    for _ in 0..50 {
        if status_of(&server, &resp).await == UploadStatus::Expired {
            expired = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    handle.abort();
    assert!(expired, "background sweep should expire the session");
}
