//! Upload session handlers.

use crate::error::{UploadError, UploadResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use stowage_core::SessionId;
use stowage_core::session::{
    CompleteUploadRequest, CompleteUploadResponse, InitiateUploadRequest, InitiateUploadResponse,
    ProgressView, ResumeUploadResponse, SessionView, UpdateProgressRequest,
};

/// Default page size for listing sessions.
const DEFAULT_LIST_LIMIT: u32 = 100;

/// Query parameters for listing sessions.
#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    pub owner_id: Option<String>,
    pub limit: Option<u32>,
}

fn parse_session_guid(raw: &str) -> UploadResult<SessionId> {
    Ok(SessionId::parse(raw)?)
}

/// POST /v1/uploads - Initiate an upload session.
#[tracing::instrument(skip(state, body))]
pub async fn initiate_upload(
    State(state): State<AppState>,
    body: Result<Json<InitiateUploadRequest>, JsonRejection>,
) -> UploadResult<(StatusCode, Json<InitiateUploadResponse>)> {
    let Json(req) = body?;
    let resp = state.coordinator.initiate(req).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

/// GET /v1/uploads?owner_id= - List an owner's active sessions.
pub async fn list_uploads(
    State(state): State<AppState>,
    Query(query): Query<ListSessionsQuery>,
) -> UploadResult<Json<Vec<SessionView>>> {
    let owner_id = query
        .owner_id
        .ok_or_else(|| UploadError::InvalidArgument("owner_id is required".to_string()))?;
    let sessions = state
        .coordinator
        .list_active_by_owner(&owner_id, query.limit.unwrap_or(DEFAULT_LIST_LIMIT))
        .await?;
    Ok(Json(sessions.iter().map(SessionView::from).collect()))
}

/// GET /v1/uploads/{session_guid} - Get a session.
pub async fn get_upload(
    State(state): State<AppState>,
    Path(session_guid): Path<String>,
) -> UploadResult<Json<SessionView>> {
    let session_guid = parse_session_guid(&session_guid)?;
    let session = state.coordinator.get_session(session_guid).await?;
    Ok(Json(SessionView::from(&session)))
}

/// POST /v1/uploads/{session_guid}/complete - Promote a finished upload.
#[tracing::instrument(skip(state, body), fields(session_guid = %session_guid))]
pub async fn complete_upload(
    State(state): State<AppState>,
    Path(session_guid): Path<String>,
    body: Result<Json<CompleteUploadRequest>, JsonRejection>,
) -> UploadResult<Json<CompleteUploadResponse>> {
    let session_guid = parse_session_guid(&session_guid)?;
    let Json(req) = body?;
    let resp = state.coordinator.complete(session_guid, req).await?;
    Ok(Json(resp))
}

/// POST /v1/uploads/{session_guid}/cancel - Cancel a session.
#[tracing::instrument(skip(state), fields(session_guid = %session_guid))]
pub async fn cancel_upload(
    State(state): State<AppState>,
    Path(session_guid): Path<String>,
) -> UploadResult<StatusCode> {
    let session_guid = parse_session_guid(&session_guid)?;
    state.coordinator.cancel(session_guid).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/uploads/{session_guid}/pause - Pause an in-progress session.
#[tracing::instrument(skip(state), fields(session_guid = %session_guid))]
pub async fn pause_upload(
    State(state): State<AppState>,
    Path(session_guid): Path<String>,
) -> UploadResult<Json<SessionView>> {
    let session_guid = parse_session_guid(&session_guid)?;
    let session = state.coordinator.pause(session_guid).await?;
    Ok(Json(SessionView::from(&session)))
}

/// POST /v1/uploads/{session_guid}/resume - Resume a paused or failed session.
#[tracing::instrument(skip(state), fields(session_guid = %session_guid))]
pub async fn resume_upload(
    State(state): State<AppState>,
    Path(session_guid): Path<String>,
) -> UploadResult<Json<ResumeUploadResponse>> {
    let session_guid = parse_session_guid(&session_guid)?;
    let resp = state.coordinator.resume(session_guid).await?;
    Ok(Json(resp))
}

/// PUT /v1/progress/{chunk_upload_id} - Report upload progress.
pub async fn update_progress(
    State(state): State<AppState>,
    Path(chunk_upload_id): Path<String>,
    body: Result<Json<UpdateProgressRequest>, JsonRejection>,
) -> UploadResult<Json<ProgressView>> {
    let Json(req) = body?;
    let view = state
        .coordinator
        .record_progress(&chunk_upload_id, req.uploaded_bytes)
        .await?;
    Ok(Json(view))
}

/// GET /v1/progress/{chunk_upload_id} - Progress by chunk upload handle.
pub async fn get_progress(
    State(state): State<AppState>,
    Path(chunk_upload_id): Path<String>,
) -> UploadResult<Json<ProgressView>> {
    let view = state.coordinator.get_progress(&chunk_upload_id).await?;
    Ok(Json(view))
}
