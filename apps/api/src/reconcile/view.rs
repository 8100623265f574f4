use serde::Serialize;

use crate::models::field::{FieldKind, Geometry};
use crate::models::suggestion::SuggestionRecord;
use crate::reconcile::state::{FieldStatus, ValueSource};

/// Render-ready snapshot of one field.
#[derive(Debug, Clone, Serialize)]
pub struct FieldView {
    pub id: String,
    pub label: String,
    pub kind: FieldKind,
    pub geometry: Option<Geometry>,
    /// Committed value.
    pub value: String,
    /// Committed value with any dictation preview appended.
    pub display_value: String,
    pub is_filled: bool,
    pub status: FieldStatus,
    pub source: Option<ValueSource>,
    pub show_affordance: bool,
    pub is_dictating: bool,
    pub suggestion: Option<SuggestionRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FormView {
    pub fields: Vec<FieldView>,
    pub total_fields: usize,
    pub filled_count: usize,
    /// Share of detected fields that hold a value, 0-100.
    pub progress_percent: u8,
    pub analyzing: bool,
    pub focused_field: Option<String>,
    pub dictating_field: Option<String>,
}

#[cfg(test)]
impl FormView {
    pub fn field(&self, id: &str) -> Option<&FieldView> {
        self.fields.iter().find(|f| f.id == id)
    }
}
