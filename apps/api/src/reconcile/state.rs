use serde::{Deserialize, Serialize};

/// Per-field lifecycle. Dictation is tracked separately as an overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    Empty,
    AiSuggested,
    Accepted,
    Edited,
    Skipped,
}

/// Where the current value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    User,
    Suggestion,
    Autofill,
    Preference,
    Dictation,
}

/// Authoritative per-field record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciledFieldState {
    pub current_value: String,
    pub is_filled: bool,
    pub status: FieldStatus,
    pub source: Option<ValueSource>,
    /// Set once the user typed or dictated into the field this session.
    /// Preference auto-fill never touches such a field.
    pub user_touched: bool,
}

impl Default for ReconciledFieldState {
    fn default() -> Self {
        Self {
            current_value: String::new(),
            is_filled: false,
            status: FieldStatus::Empty,
            source: None,
            user_touched: false,
        }
    }
}

impl ReconciledFieldState {
    pub fn write(&mut self, value: String, status: FieldStatus, source: ValueSource) {
        self.is_filled = !value.trim().is_empty();
        self.current_value = value;
        self.status = status;
        self.source = Some(source);
        if matches!(source, ValueSource::User | ValueSource::Dictation) {
            self.user_touched = true;
        }
    }

    /// Whether an AI suggestion may still be offered or auto-applied.
    pub fn accepts_suggestions(&self) -> bool {
        matches!(self.status, FieldStatus::Empty | FieldStatus::AiSuggested)
    }
}

/// Appends a dictated fragment to committed content with exactly one
/// separating space, or none when there is no prior content.
pub fn merge_transcript(existing: &str, fragment: &str) -> String {
    let fragment = fragment.trim();
    if fragment.is_empty() {
        return existing.to_string();
    }
    if existing.trim().is_empty() {
        return fragment.to_string();
    }
    format!("{} {}", existing.trim_end(), fragment)
}

/// What the presentation layer shows while a dictation preview is pending.
pub fn preview_value(committed: &str, preview: &str) -> String {
    if preview.is_empty() {
        return committed.to_string();
    }
    if committed.is_empty() {
        return preview.to_string();
    }
    format!("{committed} {preview}")
}
