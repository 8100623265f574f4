use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::detection::dom::DomNode;
use crate::detection::observer::HostEvent;
use crate::errors::AppError;
use crate::form::session::{AutofillPlan, FormSession};
use crate::models::profile::UserProfile;
use crate::reconcile::view::FormView;
use crate::state::AppState;
use crate::voice::interview::CoachView;
use crate::voice::live::SessionEvent;

async fn find_session(state: &AppState, id: Uuid) -> Result<Arc<FormSession>, AppError> {
    state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Session {id} not found")))
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    pub profile: Option<UserProfile>,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// POST /api/v1/sessions
pub async fn handle_create_session(
    State(state): State<AppState>,
    body: Option<Json<CreateSessionRequest>>,
) -> (StatusCode, Json<CreateSessionResponse>) {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let session = state.sessions.create(request.profile).await;
    (
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id: session.id,
            created_at: session.created_at,
        }),
    )
}

/// GET /api/v1/sessions/:id
pub async fn handle_get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<FormView>, AppError> {
    let session = find_session(&state, id).await?;
    Ok(Json(session.view().await))
}

/// DELETE /api/v1/sessions/:id
pub async fn handle_delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.sessions.remove(id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Session {id} not found")))
    }
}

/// GET /api/v1/sessions/:id/profile
pub async fn handle_get_profile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<UserProfile>, AppError> {
    let session = find_session(&state, id).await?;
    Ok(Json(session.profile().await))
}

/// PUT /api/v1/sessions/:id/profile
pub async fn handle_put_profile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(profile): Json<UserProfile>,
) -> Result<Json<UserProfile>, AppError> {
    let session = find_session(&state, id).await?;
    session.set_profile(profile.clone()).await;
    Ok(Json(profile))
}

/// POST /api/v1/sessions/:id/events
pub async fn handle_host_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(event): Json<HostEvent>,
) -> Result<StatusCode, AppError> {
    let session = find_session(&state, id).await?;
    session.push_event(event).await?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub snapshot: DomNode,
}

/// POST /api/v1/sessions/:id/scan
pub async fn handle_scan(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ScanRequest>,
) -> Result<Json<FormView>, AppError> {
    let session = find_session(&state, id).await?;
    Ok(Json(session.scan_now(&req.snapshot).await))
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub force: bool,
}

/// POST /api/v1/sessions/:id/analyze
pub async fn handle_analyze(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<AnalyzeRequest>>,
) -> Result<Json<FormView>, AppError> {
    let session = find_session(&state, id).await?;
    let force = body.map(|Json(r)| r.force).unwrap_or(true);
    Ok(Json(session.analyze(force).await))
}

/// POST /api/v1/sessions/:id/fields/:field_id/accept
pub async fn handle_accept(
    State(state): State<AppState>,
    Path((id, field_id)): Path<(Uuid, String)>,
) -> Result<Json<FormView>, AppError> {
    let session = find_session(&state, id).await?;
    Ok(Json(session.accept(&field_id).await?))
}

/// POST /api/v1/sessions/:id/fields/:field_id/skip
pub async fn handle_skip(
    State(state): State<AppState>,
    Path((id, field_id)): Path<(Uuid, String)>,
) -> Result<Json<FormView>, AppError> {
    let session = find_session(&state, id).await?;
    Ok(Json(session.skip(&field_id).await?))
}

/// POST /api/v1/sessions/:id/fields/:field_id/always-use
pub async fn handle_always_use(
    State(state): State<AppState>,
    Path((id, field_id)): Path<(Uuid, String)>,
) -> Result<Json<FormView>, AppError> {
    let session = find_session(&state, id).await?;
    Ok(Json(session.always_use(&field_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct EditRequest {
    pub value: String,
}

/// POST /api/v1/sessions/:id/fields/:field_id/edit
pub async fn handle_edit(
    State(state): State<AppState>,
    Path((id, field_id)): Path<(Uuid, String)>,
    Json(req): Json<EditRequest>,
) -> Result<Json<FormView>, AppError> {
    let session = find_session(&state, id).await?;
    Ok(Json(session.edit(&field_id, &req.value).await?))
}

/// POST /api/v1/sessions/:id/autofill
pub async fn handle_autofill(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<AutofillPlan>), AppError> {
    let session = find_session(&state, id).await?;
    Ok((StatusCode::ACCEPTED, Json(session.autofill().await)))
}

#[derive(Debug, Deserialize)]
pub struct StartDictationRequest {
    pub field_id: String,
}

/// POST /api/v1/sessions/:id/dictation/start
pub async fn handle_start_dictation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<StartDictationRequest>,
) -> Result<Json<FormView>, AppError> {
    let session = find_session(&state, id).await?;
    Ok(Json(session.start_dictation(&req.field_id).await?))
}

/// POST /api/v1/sessions/:id/dictation/stop
pub async fn handle_stop_dictation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<FormView>, AppError> {
    let session = find_session(&state, id).await?;
    Ok(Json(session.stop_dictation().await))
}

#[derive(Debug, Deserialize)]
pub struct TranscriptRequest {
    pub text: String,
    #[serde(default)]
    pub is_final: bool,
}

/// POST /api/v1/sessions/:id/dictation/transcript
pub async fn handle_dictation_transcript(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<TranscriptRequest>,
) -> Result<StatusCode, AppError> {
    let session = find_session(&state, id).await?;
    session.relay_transcript(req.text, req.is_final).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /api/v1/sessions/:id/dictation/audio
/// Body: raw little-endian PCM16 at 16 kHz.
pub async fn handle_dictation_audio(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let session = find_session(&state, id).await?;
    session.push_dictation_audio(body).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /api/v1/sessions/:id/coach/start
pub async fn handle_start_coach(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CoachView>, AppError> {
    let session = find_session(&state, id).await?;
    Ok(Json(session.start_coach().await?))
}

/// POST /api/v1/sessions/:id/coach/stop
pub async fn handle_stop_coach(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CoachView>, AppError> {
    let session = find_session(&state, id).await?;
    Ok(Json(session.stop_coach().await))
}

/// GET /api/v1/sessions/:id/coach
pub async fn handle_get_coach(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CoachView>, AppError> {
    let session = find_session(&state, id).await?;
    Ok(Json(session.coach_view().await))
}

/// POST /api/v1/sessions/:id/coach/transcript
pub async fn handle_coach_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(event): Json<SessionEvent>,
) -> Result<StatusCode, AppError> {
    let session = find_session(&state, id).await?;
    session.relay_coach_event(event).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /api/v1/sessions/:id/coach/audio
/// Body: raw little-endian PCM16 at 16 kHz.
pub async fn handle_coach_audio(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let session = find_session(&state, id).await?;
    session.push_coach_audio(body).await?;
    Ok(StatusCode::ACCEPTED)
}
