use std::sync::Arc;

use crate::config::Config;
use crate::form::registry::SessionRegistry;
use crate::preferences::store::PreferenceStore;
use crate::suggestions::service::AiService;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Swappable AI backend. `LlmAiService` in production.
    pub ai: Arc<dyn AiService>,
    pub preferences: PreferenceStore,
    pub sessions: SessionRegistry,
}
