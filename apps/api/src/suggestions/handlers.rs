use axum::{
    extract::{Multipart, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::profile::{PartialProfile, UserProfile};
use crate::state::AppState;
use crate::suggestions::documents::{extract_text, DocumentKind};
use crate::suggestions::service::CompanyResearch;

const MAX_REWRITE_CHARS: usize = 10_000;

#[derive(Debug, Deserialize)]
pub struct RewriteRequest {
    pub text: String,
    pub target_role: String,
    /// Profile to draw achievements from. Defaults to the session's, then the demo profile.
    pub profile: Option<UserProfile>,
    pub session_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct RewriteResponse {
    pub text: String,
    /// False when the model was unavailable and the input came back unchanged.
    pub rewritten: bool,
}

/// POST /api/v1/rewrite
pub async fn handle_rewrite(
    State(state): State<AppState>,
    Json(req): Json<RewriteRequest>,
) -> Result<Json<RewriteResponse>, AppError> {
    if req.text.trim().is_empty() {
        return Err(AppError::Validation("text must not be empty".to_string()));
    }
    if req.text.chars().count() > MAX_REWRITE_CHARS {
        return Err(AppError::Validation(format!(
            "text must be at most {MAX_REWRITE_CHARS} characters"
        )));
    }

    let profile = resolve_profile(&state, req.profile, req.session_id).await?;
    match state.ai.rewrite_text(&req.text, &profile, &req.target_role).await {
        Ok(text) if !text.trim().is_empty() => Ok(Json(RewriteResponse {
            text,
            rewritten: true,
        })),
        Ok(_) => Ok(Json(RewriteResponse {
            text: req.text,
            rewritten: false,
        })),
        Err(e) => {
            warn!("Rewrite failed, returning original text: {e}");
            Ok(Json(RewriteResponse {
                text: req.text,
                rewritten: false,
            }))
        }
    }
}

async fn resolve_profile(
    state: &AppState,
    explicit: Option<UserProfile>,
    session_id: Option<Uuid>,
) -> Result<UserProfile, AppError> {
    if let Some(profile) = explicit {
        return Ok(profile);
    }
    match session_id {
        Some(id) => {
            let session = state
                .sessions
                .get(id)
                .await
                .ok_or_else(|| AppError::NotFound(format!("Session {id} not found")))?;
            Ok(session.profile().await)
        }
        None => Ok(UserProfile::demo()),
    }
}

#[derive(Debug, Deserialize)]
pub struct ResearchRequest {
    /// Company URL or name.
    pub target: String,
}

/// POST /api/v1/research
pub async fn handle_research(
    State(state): State<AppState>,
    Json(req): Json<ResearchRequest>,
) -> Result<Json<CompanyResearch>, AppError> {
    let target = req.target.trim();
    if target.is_empty() {
        return Err(AppError::Validation("target must not be empty".to_string()));
    }
    let research = state.ai.research_entity(target).await?;
    info!("Researched '{}' ({} sources)", target, research.sources.len());
    Ok(Json(research))
}

#[derive(Debug, Default, Deserialize)]
pub struct ParseQuery {
    /// When set, the parsed fragment is merged into this session's profile.
    pub session_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ParseResponse {
    pub partial: PartialProfile,
    pub profile: Option<UserProfile>,
}

/// POST /api/v1/profile/parse
/// Multipart upload with a `file` part (PDF, plain text or markdown).
pub async fn handle_parse_profile(
    State(state): State<AppState>,
    Query(query): Query<ParseQuery>,
    mut multipart: Multipart,
) -> Result<Json<ParseResponse>, AppError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let kind = DocumentKind::detect(field.content_type(), field.file_name())?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("Could not read upload: {e}")))?;
        upload = Some((kind, bytes));
        break;
    }
    let (kind, bytes) =
        upload.ok_or_else(|| AppError::Validation("Missing 'file' part".to_string()))?;

    let text = extract_text(kind, bytes).await?;
    let partial = state.ai.parse_document(&text).await?;

    let profile = match query.session_id {
        Some(id) => {
            let session = state
                .sessions
                .get(id)
                .await
                .ok_or_else(|| AppError::NotFound(format!("Session {id} not found")))?;
            let mut profile = session.profile().await;
            profile.merge(partial.clone());
            session.set_profile(profile.clone()).await;
            Some(profile)
        }
        None => None,
    };

    Ok(Json(ParseResponse { partial, profile }))
}
