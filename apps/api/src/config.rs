use std::time::Duration;

use anyhow::{Context, Result};

use crate::form::session::SessionSettings;
use crate::models::suggestion::ConfidenceTier;

/// Application configuration loaded from environment variables.
/// Startup fails if a required variable is missing or a value does not parse.
#[derive(Debug, Clone)]
pub struct Config {
    pub anthropic_api_key: String,
    /// Unset means preferences live in memory for the process lifetime.
    pub redis_url: Option<String>,
    pub port: u16,
    pub rust_log: String,
    /// Empty means scans cover the whole posted snapshot.
    pub form_root_id: String,
    pub scan_debounce_ms: u64,
    pub autofill_stagger_ms: u64,
    pub autofill_min_confidence: ConfidenceTier,
    /// Sessions untouched this long are closed and dropped.
    pub session_idle_ttl_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            redis_url: optional_env("REDIS_URL"),
            port: parse_env("PORT", "8080")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            form_root_id: std::env::var("FORM_ROOT_ID")
                .unwrap_or_else(|_| "applywise-form".to_string()),
            scan_debounce_ms: parse_env("SCAN_DEBOUNCE_MS", "1000")?,
            autofill_stagger_ms: parse_env("AUTOFILL_STAGGER_MS", "400")?,
            autofill_min_confidence: std::env::var("AUTOFILL_MIN_CONFIDENCE")
                .unwrap_or_else(|_| "high".to_string())
                .parse::<ConfidenceTier>()
                .map_err(anyhow::Error::msg)
                .context("AUTOFILL_MIN_CONFIDENCE must be one of high, medium, low")?,
            session_idle_ttl_secs: parse_env("SESSION_IDLE_TTL_SECS", "1800")?,
        })
    }

    pub fn session_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.session_idle_ttl_secs)
    }

    pub fn session_settings(&self) -> SessionSettings {
        let root = self.form_root_id.trim();
        SessionSettings {
            form_root_id: (!root.is_empty()).then(|| root.to_string()),
            scan_debounce: Duration::from_millis(self.scan_debounce_ms),
            autofill_stagger: Duration::from_millis(self.autofill_stagger_ms),
            autofill_min_confidence: self.autofill_min_confidence,
        }
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<T>()
        .with_context(|| format!("{key} must be a valid number"))
}
