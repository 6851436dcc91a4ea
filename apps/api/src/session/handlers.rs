//! Axum route handlers for the Session API.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::autosave::{SaveOperation, SaveOutcome};
use crate::collab::presence::Collaborator;
use crate::document::{ResumeDocument, SectionId};
use crate::errors::AppError;
use crate::scoring::CompletionSummary;
use crate::session::{MutationAck, SessionStatus};
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenSessionRequest {
    pub user_id: Uuid,
    pub resume_id: Uuid,
    pub display_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenSessionResponse {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub document: Arc<ResumeDocument>,
    pub completion: Arc<CompletionSummary>,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/sessions
///
/// Opens an editing session, or returns the one this user already has on the resume.
pub async fn handle_open_session(
    State(state): State<AppState>,
    Json(request): Json<OpenSessionRequest>,
) -> Result<Json<OpenSessionResponse>, AppError> {
    let display_name = request.display_name.trim();
    if display_name.is_empty() {
        return Err(AppError::Validation("displayName cannot be empty".to_string()));
    }

    let handle = state
        .sessions
        .open(request.user_id, request.resume_id, display_name.to_string())
        .await?;

    Ok(Json(OpenSessionResponse {
        session_id: handle.id,
        status: handle.status(),
        document: handle.document(),
        completion: handle.completion(),
    }))
}

/// GET /api/v1/sessions/:id
pub async fn handle_get_status(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionStatus>, AppError> {
    let handle = state.sessions.get(session_id).await?;
    Ok(Json(handle.status()))
}

/// GET /api/v1/sessions/:id/document
pub async fn handle_get_document(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Arc<ResumeDocument>>, AppError> {
    let handle = state.sessions.get(session_id).await?;
    Ok(Json(handle.document()))
}

/// PUT /api/v1/sessions/:id/sections/:section
///
/// Body is the new section payload, stored as-is.
pub async fn handle_section_change(
    State(state): State<AppState>,
    Path((session_id, section)): Path<(Uuid, String)>,
    Json(payload): Json<Value>,
) -> Result<Json<MutationAck>, AppError> {
    let section: SectionId = section.parse()?;
    let handle = state.sessions.get(session_id).await?;
    let ack = handle.on_section_change(section, payload).await?;
    Ok(Json(ack))
}

/// GET /api/v1/sessions/:id/completion
pub async fn handle_get_completion(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Arc<CompletionSummary>>, AppError> {
    let handle = state.sessions.get(session_id).await?;
    Ok(Json(handle.completion()))
}

/// GET /api/v1/sessions/:id/collaborators
pub async fn handle_get_collaborators(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Arc<Vec<Collaborator>>>, AppError> {
    let handle = state.sessions.get(session_id).await?;
    Ok(Json(handle.collaborators()))
}

/// POST /api/v1/sessions/:id/save
///
/// Waits for the save covering the current revision. A failed save is a 502;
/// the edits stay in the session either way.
pub async fn handle_save(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SaveOperation>, AppError> {
    let handle = state.sessions.get(session_id).await?;
    let operation = handle.save_now().await?;
    match operation.outcome {
        SaveOutcome::Failed { message } => Err(AppError::Persistence(message)),
        _ => Ok(Json(operation)),
    }
}

/// POST /api/v1/sessions/:id/undo
pub async fn handle_undo(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<MutationAck>, AppError> {
    let handle = state.sessions.get(session_id).await?;
    handle
        .undo()
        .await?
        .map(Json)
        .ok_or_else(|| AppError::Conflict("Nothing to undo".to_string()))
}

/// POST /api/v1/sessions/:id/redo
pub async fn handle_redo(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<MutationAck>, AppError> {
    let handle = state.sessions.get(session_id).await?;
    handle
        .redo()
        .await?
        .map(Json)
        .ok_or_else(|| AppError::Conflict("Nothing to redo".to_string()))
}

/// DELETE /api/v1/sessions/:id
pub async fn handle_close_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.sessions.close(session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
