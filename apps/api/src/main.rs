mod config;
mod detection;
mod errors;
mod form;
mod llm_client;
mod models;
mod preferences;
mod reconcile;
mod routes;
mod state;
mod suggestions;
mod voice;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::form::registry::SessionRegistry;
use crate::form::session::SessionDeps;
use crate::llm_client::LlmClient;
use crate::preferences::kv::{KeyValueStore, MemoryStore, RedisStore};
use crate::preferences::store::PreferenceStore;
use crate::routes::build_router;
use crate::state::AppState;
use crate::suggestions::service::{AiService, LlmAiService};
use crate::voice::live::RelayConnector;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ApplyWise API v{}", env!("CARGO_PKG_VERSION"));

    // Preference vault: Redis when configured, otherwise process memory
    let kv: Arc<dyn KeyValueStore> = match &config.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str())?;
            info!("Redis client initialized");
            Arc::new(RedisStore::new(client))
        }
        None => {
            warn!("REDIS_URL not set; always-use preferences will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };
    let preferences = PreferenceStore::new(kv);

    // Initialize LLM client
    let llm = LlmClient::new(config.anthropic_api_key.clone())?;
    info!("LLM client initialized (model: {})", llm_client::MODEL);
    let ai: Arc<dyn AiService> = Arc::new(LlmAiService::new(llm));

    let settings = config.session_settings();
    info!(
        "Scanning under {:?}, debounce {:?}, autofill at {:?}",
        settings.form_root_id, settings.scan_debounce, settings.autofill_min_confidence
    );
    let sessions = SessionRegistry::new(SessionDeps {
        ai: ai.clone(),
        preferences: preferences.clone(),
        connector: Arc::new(RelayConnector),
        settings,
    });

    let sweeper = sessions.spawn_sweeper(config.session_idle_ttl());
    info!("Idle sessions expire after {:?}", config.session_idle_ttl());

    // Build app state
    let state = AppState {
        config: config.clone(),
        ai,
        preferences,
        sessions,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // the extension calls from a chrome-extension:// origin

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    sweeper.abort();

    Ok(())
}
