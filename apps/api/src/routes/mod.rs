pub mod health;

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::form::handlers as form;
use crate::preferences::handlers as preferences;
use crate::state::AppState;
use crate::suggestions::handlers as suggestions;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Form sessions
        .route("/api/v1/sessions", post(form::handle_create_session))
        .route(
            "/api/v1/sessions/:id",
            get(form::handle_get_session).delete(form::handle_delete_session),
        )
        .route(
            "/api/v1/sessions/:id/profile",
            get(form::handle_get_profile).put(form::handle_put_profile),
        )
        .route("/api/v1/sessions/:id/events", post(form::handle_host_event))
        .route("/api/v1/sessions/:id/scan", post(form::handle_scan))
        .route("/api/v1/sessions/:id/analyze", post(form::handle_analyze))
        .route("/api/v1/sessions/:id/autofill", post(form::handle_autofill))
        // Field actions
        .route(
            "/api/v1/sessions/:id/fields/:field_id/accept",
            post(form::handle_accept),
        )
        .route(
            "/api/v1/sessions/:id/fields/:field_id/skip",
            post(form::handle_skip),
        )
        .route(
            "/api/v1/sessions/:id/fields/:field_id/always-use",
            post(form::handle_always_use),
        )
        .route(
            "/api/v1/sessions/:id/fields/:field_id/edit",
            post(form::handle_edit),
        )
        // Dictation
        .route(
            "/api/v1/sessions/:id/dictation/start",
            post(form::handle_start_dictation),
        )
        .route(
            "/api/v1/sessions/:id/dictation/stop",
            post(form::handle_stop_dictation),
        )
        .route(
            "/api/v1/sessions/:id/dictation/transcript",
            post(form::handle_dictation_transcript),
        )
        .route(
            "/api/v1/sessions/:id/dictation/audio",
            post(form::handle_dictation_audio),
        )
        // Interview coaching
        .route("/api/v1/sessions/:id/coach", get(form::handle_get_coach))
        .route(
            "/api/v1/sessions/:id/coach/start",
            post(form::handle_start_coach),
        )
        .route(
            "/api/v1/sessions/:id/coach/stop",
            post(form::handle_stop_coach),
        )
        .route(
            "/api/v1/sessions/:id/coach/transcript",
            post(form::handle_coach_event),
        )
        .route(
            "/api/v1/sessions/:id/coach/audio",
            post(form::handle_coach_audio),
        )
        // "Always use" vault
        .route(
            "/api/v1/preferences",
            get(preferences::handle_list_preferences).delete(preferences::handle_clear_preferences),
        )
        .route(
            "/api/v1/preferences/:key",
            delete(preferences::handle_remove_preference),
        )
        // One-shot AI helpers
        .route("/api/v1/rewrite", post(suggestions::handle_rewrite))
        .route("/api/v1/research", post(suggestions::handle_research))
        .route("/api/v1/profile/parse", post(suggestions::handle_parse_profile))
        .with_state(state)
}
