//! Reconciliation Engine: the single owner of per-field state.
//!
//! Merges scanner output, AI suggestions, preference hits, dictation and
//! direct edits into one value per field. Every method is synchronous and
//! infallible: a collaborator failure or a stale async result narrows to "no
//! state change" and is logged. Callers serialize access (one lock per form
//! session) and never hold that lock across an await.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::detection::observer::ScanBatch;
use crate::models::field::FieldDescriptor;
use crate::models::suggestion::{ConfidenceTier, SuggestionMap, SuggestionRecord};
use crate::preferences::store::{lookup_in, PreferenceMap};
use crate::reconcile::state::{
    merge_transcript, preview_value, FieldStatus, ReconciledFieldState, ValueSource,
};
use crate::reconcile::view::{FieldView, FormView};

// ────────────────────────────────────────────────────────────────────────────
// Outcomes
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScanOutcome {
    /// A newer scan was already applied; this one was discarded.
    Stale,
    Applied {
        id_set_changed: bool,
        preference_fills: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    Applied,
    UnknownField,
    NoSuggestion,
    /// The action was valid but left state unchanged.
    Unchanged { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    Applied { suggestion_count: usize },
    Stale,
}

/// Issued when a suggestion request starts; correlates the response with the
/// field set it was computed for.
#[derive(Debug, Clone)]
pub struct AnalysisTicket {
    pub generation: u64,
    pub fields: Vec<FieldDescriptor>,
}

/// One step of a bulk autofill, applied in order by the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedFill {
    pub field_id: String,
    pub value: String,
    pub confidence_tier: ConfidenceTier,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DictationStart {
    pub session_id: u64,
    /// Field whose dictation was stopped (and committed) to make room.
    pub superseded: Option<String>,
}

#[derive(Debug, Clone)]
struct DictationSlot {
    session_id: u64,
    field_id: String,
    preview: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Engine
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ReconciliationEngine {
    fields: Vec<FieldDescriptor>,
    states: HashMap<String, ReconciledFieldState>,
    suggestions: SuggestionMap,
    /// Bumped whenever the detected id set changes.
    field_generation: u64,
    /// Generation the current suggestion map was computed for.
    suggestions_generation: Option<u64>,
    /// Generation of the in-flight suggestion request, if any.
    outstanding: Option<u64>,
    last_scan_seq: u64,
    focused: Option<String>,
    dictation: Option<DictationSlot>,
    next_dictation_id: u64,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, field_id: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.id == field_id)
    }

    pub fn state(&self, field_id: &str) -> Option<&ReconciledFieldState> {
        self.states.get(field_id)
    }

    pub fn suggestion(&self, field_id: &str) -> Option<&SuggestionRecord> {
        self.suggestions.get(field_id)
    }

    pub fn is_analyzing(&self) -> bool {
        self.outstanding.is_some()
    }

    pub fn focused_field(&self) -> Option<&str> {
        self.focused.as_deref()
    }

    pub fn dictating_field(&self) -> Option<&str> {
        self.dictation.as_ref().map(|d| d.field_id.as_str())
    }

    pub fn active_dictation(&self) -> Option<u64> {
        self.dictation.as_ref().map(|d| d.session_id)
    }

    // ── Detection ──────────────────────────────────────────────────────────

    /// Applies a scan batch, then auto-fills untouched empty fields from the
    /// preference vault. Batches older than the last applied one are dropped.
    pub fn apply_scan(&mut self, batch: &ScanBatch, preferences: &PreferenceMap) -> ScanOutcome {
        if batch.seq <= self.last_scan_seq {
            debug!(
                "Discarding stale scan {} (last applied {})",
                batch.seq, self.last_scan_seq
            );
            return ScanOutcome::Stale;
        }
        self.last_scan_seq = batch.seq;

        let old_ids: BTreeSet<&str> = self.fields.iter().map(|f| f.id.as_str()).collect();
        let new_ids: BTreeSet<&str> = batch.fields.iter().map(|f| f.id.as_str()).collect();
        let id_set_changed = old_ids != new_ids;

        self.fields = batch.fields.clone();
        if id_set_changed {
            self.field_generation += 1;
        }
        for field in &self.fields {
            self.states.entry(field.id.clone()).or_default();
        }

        let preference_fills = self.apply_preferences(preferences);
        if id_set_changed {
            info!(
                "Detected {} fields (generation {}), {} filled from preferences",
                self.fields.len(),
                self.field_generation,
                preference_fills.len()
            );
        }

        ScanOutcome::Applied {
            id_set_changed,
            preference_fills,
        }
    }

    fn apply_preferences(&mut self, preferences: &PreferenceMap) -> Vec<String> {
        if preferences.is_empty() {
            return Vec::new();
        }
        let mut filled = Vec::new();
        for field in &self.fields {
            let Some(state) = self.states.get_mut(&field.id) else {
                continue;
            };
            if state.user_touched || state.is_filled {
                continue;
            }
            let Some(stored) = lookup_in(preferences, &field.id, &field.label) else {
                continue;
            };
            match field.resolve_value(stored) {
                Some(value) => {
                    state.write(value, FieldStatus::Accepted, ValueSource::Preference);
                    filled.push(field.id.clone());
                }
                None => warn!(
                    "Stored preference for '{}' matches none of its options",
                    field.id
                ),
            }
        }
        filled
    }

    /// Moves the focus pointer. Focus on an unrecognized element is ignored.
    pub fn set_focus(&mut self, field_id: &str) -> bool {
        if self.field(field_id).is_none() {
            debug!("Ignoring focus on unrecognized element '{field_id}'");
            return false;
        }
        self.focused = Some(field_id.to_string());
        true
    }

    // ── Suggestions ────────────────────────────────────────────────────────

    /// Starts a suggestion request for the current field set.
    ///
    /// Returns `None` when there are no fields, when a request for this field
    /// set is already in flight, or (unless `force`) when suggestions for this
    /// field set already exist.
    pub fn begin_analysis(&mut self, force: bool) -> Option<AnalysisTicket> {
        if self.fields.is_empty() {
            return None;
        }
        if self.outstanding == Some(self.field_generation) {
            debug!("Suggestion request already in flight for generation {}", self.field_generation);
            return None;
        }
        if !force && self.suggestions_generation == Some(self.field_generation) {
            return None;
        }
        self.outstanding = Some(self.field_generation);
        Some(AnalysisTicket {
            generation: self.field_generation,
            fields: self.fields.clone(),
        })
    }

    /// Completes a request started by [`begin_analysis`](Self::begin_analysis).
    /// The map replaces the previous one wholesale unless the field set has
    /// changed since the ticket was issued.
    pub fn complete_analysis(&mut self, ticket: &AnalysisTicket, map: SuggestionMap) -> AnalysisOutcome {
        if self.outstanding == Some(ticket.generation) {
            self.outstanding = None;
        }
        if ticket.generation != self.field_generation {
            debug!(
                "Discarding suggestions for generation {} (current {})",
                ticket.generation, self.field_generation
            );
            return AnalysisOutcome::Stale;
        }

        let known: BTreeSet<&str> = self.fields.iter().map(|f| f.id.as_str()).collect();
        let map: SuggestionMap = map
            .into_iter()
            .filter(|(id, _)| known.contains(id.as_str()))
            .map(|(id, record)| (id, record.normalized()))
            .collect();

        for (id, state) in self.states.iter_mut() {
            match (state.status, map.contains_key(id)) {
                (FieldStatus::Empty, true) => state.status = FieldStatus::AiSuggested,
                (FieldStatus::AiSuggested, false) => state.status = FieldStatus::Empty,
                _ => {}
            }
        }

        let suggestion_count = map.len();
        self.suggestions = map;
        self.suggestions_generation = Some(ticket.generation);
        AnalysisOutcome::Applied { suggestion_count }
    }

    // ── Field actions ──────────────────────────────────────────────────────

    /// Direct keystroke input. Always wins and dismisses the affordance.
    pub fn edit(&mut self, field_id: &str, value: &str) -> ActionOutcome {
        let Some(state) = self.states.get_mut(field_id) else {
            return ActionOutcome::UnknownField;
        };
        state.write(value.to_string(), FieldStatus::Edited, ValueSource::User);
        ActionOutcome::Applied
    }

    pub fn accept(&mut self, field_id: &str) -> ActionOutcome {
        self.apply_suggestion(field_id, ValueSource::Suggestion)
    }

    pub fn skip(&mut self, field_id: &str) -> ActionOutcome {
        let Some(state) = self.states.get_mut(field_id) else {
            return ActionOutcome::UnknownField;
        };
        if !state.accepts_suggestions() {
            return ActionOutcome::Unchanged {
                reason: "field already settled".to_string(),
            };
        }
        state.status = FieldStatus::Skipped;
        ActionOutcome::Applied
    }

    fn apply_suggestion(&mut self, field_id: &str, source: ValueSource) -> ActionOutcome {
        let Some(field) = self.fields.iter().find(|f| f.id == field_id) else {
            return ActionOutcome::UnknownField;
        };
        let Some(record) = self.suggestions.get(field_id) else {
            return ActionOutcome::NoSuggestion;
        };
        let Some(value) = field.resolve_value(&record.value) else {
            warn!(
                "Suggested value for '{field_id}' matches none of the field's options; not applied"
            );
            return ActionOutcome::Unchanged {
                reason: "suggested value matches no option".to_string(),
            };
        };
        let Some(state) = self.states.get_mut(field_id) else {
            return ActionOutcome::UnknownField;
        };
        state.write(value, FieldStatus::Accepted, source);
        ActionOutcome::Applied
    }

    // ── Bulk autofill ──────────────────────────────────────────────────────

    /// Lists, in form order, every suggestion at or above `threshold` that
    /// may still be applied. Edited, skipped and dictating fields are left out.
    pub fn autofill_plan(&self, threshold: ConfidenceTier) -> Vec<PlannedFill> {
        self.fields
            .iter()
            .filter(|field| self.dictating_field() != Some(field.id.as_str()))
            .filter_map(|field| {
                let record = self.suggestions.get(&field.id)?;
                let state = self.states.get(&field.id)?;
                (record.confidence_tier >= threshold && state.accepts_suggestions()).then(|| {
                    PlannedFill {
                        field_id: field.id.clone(),
                        value: record.value.clone(),
                        confidence_tier: record.confidence_tier,
                    }
                })
            })
            .collect()
    }

    /// Applies one planned fill. Re-checks eligibility, since the user may
    /// have typed into the field while earlier steps were animating.
    pub fn apply_planned(&mut self, fill: &PlannedFill) -> ActionOutcome {
        let eligible = self
            .states
            .get(&fill.field_id)
            .map(|s| s.accepts_suggestions())
            .unwrap_or(false);
        if !eligible || self.dictating_field() == Some(fill.field_id.as_str()) {
            return ActionOutcome::Unchanged {
                reason: "field changed since the plan was made".to_string(),
            };
        }
        match self.suggestions.get(&fill.field_id) {
            Some(current) if current.value == fill.value => {
                self.apply_suggestion(&fill.field_id, ValueSource::Autofill)
            }
            _ => ActionOutcome::Unchanged {
                reason: "suggestion replaced since the plan was made".to_string(),
            },
        }
    }

    // ── Dictation overlay ──────────────────────────────────────────────────

    /// Enters dictation on `field_id`. Any other active dictation is committed
    /// and closed first, so at most one field is ever dictating.
    pub fn begin_dictation(&mut self, field_id: &str) -> Result<DictationStart, ActionOutcome> {
        self.check_dictation_entry(field_id)?;
        let active = self.active_dictation();
        let superseded = active.and_then(|sid| self.end_dictation(sid));

        self.next_dictation_id += 1;
        let session_id = self.next_dictation_id;
        self.dictation = Some(DictationSlot {
            session_id,
            field_id: field_id.to_string(),
            preview: String::new(),
        });
        info!("Dictation {session_id} started on '{field_id}'");
        Ok(DictationStart {
            session_id,
            superseded,
        })
    }

    /// Dictation can start on an empty, suggested or edited field. Accepted
    /// and skipped fields must be edited first.
    pub fn check_dictation_entry(&self, field_id: &str) -> Result<(), ActionOutcome> {
        let Some(state) = self.states.get(field_id) else {
            return Err(ActionOutcome::UnknownField);
        };
        match state.status {
            FieldStatus::Empty | FieldStatus::AiSuggested | FieldStatus::Edited => Ok(()),
            FieldStatus::Accepted | FieldStatus::Skipped => Err(ActionOutcome::Unchanged {
                reason: format!("field is {:?}", state.status).to_lowercase(),
            }),
        }
    }

    /// Replaces the transient preview. Ignored for sessions no longer active.
    pub fn dictation_interim(&mut self, session_id: u64, hypothesis: &str) -> bool {
        match self.dictation.as_mut() {
            Some(slot) if slot.session_id == session_id => {
                slot.preview = hypothesis.trim().to_string();
                true
            }
            _ => false,
        }
    }

    /// Commits a final transcript segment and clears the preview.
    pub fn dictation_final(&mut self, session_id: u64, text: &str) -> bool {
        let field_id = match self.dictation.as_mut() {
            Some(slot) if slot.session_id == session_id => {
                slot.preview.clear();
                slot.field_id.clone()
            }
            _ => return false,
        };
        self.commit_transcript(&field_id, text);
        true
    }

    /// Leaves dictation, committing whatever preview was pending. Returns the
    /// field that was dictating, or `None` if `session_id` was not active.
    pub fn end_dictation(&mut self, session_id: u64) -> Option<String> {
        match &self.dictation {
            Some(slot) if slot.session_id == session_id => {}
            _ => return None,
        }
        let slot = self.dictation.take()?;
        self.commit_transcript(&slot.field_id, &slot.preview);
        info!("Dictation {} on '{}' stopped", slot.session_id, slot.field_id);
        Some(slot.field_id)
    }

    fn commit_transcript(&mut self, field_id: &str, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        if let Some(state) = self.states.get_mut(field_id) {
            let merged = merge_transcript(&state.current_value, text);
            state.write(merged, FieldStatus::Edited, ValueSource::Dictation);
        }
    }

    // ── Presentation ───────────────────────────────────────────────────────

    pub fn view(&self) -> FormView {
        let fields: Vec<FieldView> = self
            .fields
            .iter()
            .map(|field| self.field_view(field))
            .collect();
        let filled_count = fields.iter().filter(|f| f.is_filled).count();
        let progress_percent = match fields.len() {
            0 => 0,
            total => (filled_count * 100 / total) as u8,
        };
        FormView {
            total_fields: fields.len(),
            filled_count,
            progress_percent,
            analyzing: self.is_analyzing(),
            focused_field: self.focused.clone(),
            dictating_field: self.dictating_field().map(str::to_string),
            fields,
        }
    }

    fn field_view(&self, field: &FieldDescriptor) -> FieldView {
        let state = self.states.get(&field.id).cloned().unwrap_or_default();
        let suggestion = self.suggestions.get(&field.id).cloned();
        let dictating = self
            .dictation
            .as_ref()
            .filter(|slot| slot.field_id == field.id);
        let display_value = match dictating {
            Some(slot) => preview_value(&state.current_value, &slot.preview),
            None => state.current_value.clone(),
        };
        let show_affordance = suggestion.is_some()
            && self.focused.as_deref() == Some(field.id.as_str())
            && !state.is_filled
            && state.accepts_suggestions();

        FieldView {
            id: field.id.clone(),
            label: field.label.clone(),
            kind: field.kind.clone(),
            geometry: field.geometry,
            value: state.current_value,
            display_value,
            is_filled: state.is_filled,
            status: state.status,
            source: state.source,
            show_affordance,
            is_dictating: dictating.is_some(),
            suggestion,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
