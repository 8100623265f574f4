use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::errors::AppError;
use crate::preferences::store::PreferenceMap;
use crate::state::AppState;

/// GET /api/v1/preferences
pub async fn handle_list_preferences(State(state): State<AppState>) -> Json<PreferenceMap> {
    Json(state.preferences.entries().await)
}

/// DELETE /api/v1/preferences/:key
pub async fn handle_remove_preference(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.preferences.remove(&key).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("No preference stored under '{key}'")))
    }
}

/// DELETE /api/v1/preferences
pub async fn handle_clear_preferences(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    state.preferences.clear().await?;
    Ok(StatusCode::NO_CONTENT)
}
