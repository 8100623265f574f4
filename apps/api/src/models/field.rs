use serde::{Deserialize, Serialize};

/// Label used when no association, ARIA label, placeholder, name or title exists.
pub const UNKNOWN_FIELD_LABEL: &str = "Unknown Field";

/// Input category of a detected field. Drives how a value is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Email,
    Tel,
    Url,
    Number,
    Date,
    Password,
    Checkbox,
    Radio,
    File,
    Select,
    Textarea,
    AriaTextbox,
    ContentEditable,
    Other(String),
}

impl FieldKind {
    /// Maps an input `type` attribute to a kind. Unknown types are preserved.
    pub fn from_input_type(input_type: &str) -> Self {
        match input_type.trim().to_ascii_lowercase().as_str() {
            "" | "text" | "search" => FieldKind::Text,
            "email" => FieldKind::Email,
            "tel" => FieldKind::Tel,
            "url" => FieldKind::Url,
            "number" => FieldKind::Number,
            "date" | "month" | "week" | "datetime-local" => FieldKind::Date,
            "password" => FieldKind::Password,
            "checkbox" => FieldKind::Checkbox,
            "radio" => FieldKind::Radio,
            "file" => FieldKind::File,
            other => FieldKind::Other(other.to_string()),
        }
    }

    /// Enumerated inputs accept only one of their declared options.
    pub fn is_enumerated(&self) -> bool {
        matches!(self, FieldKind::Select)
    }
}

/// On-screen bounding box, used only to position the suggestion affordance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub text: String,
}

/// One detected interactive element. Replaced wholesale on every re-scan;
/// continuity between scans is by `id` only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub id: String,
    pub kind: FieldKind,
    pub label: String,
    /// `None` until first measured.
    pub geometry: Option<Geometry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<SelectOption>,
}

impl FieldDescriptor {
    /// Resolves the value that would actually be written into this field.
    ///
    /// Free-form kinds take the value as-is. Enumerated kinds take the first
    /// option whose text or value contains `value` case-insensitively, and
    /// yield `None` when nothing matches.
    pub fn resolve_value(&self, value: &str) -> Option<String> {
        if !self.kind.is_enumerated() {
            return Some(value.to_string());
        }
        let needle = value.trim().to_lowercase();
        if needle.is_empty() {
            return Some(String::new());
        }
        self.options
            .iter()
            .find(|opt| {
                opt.text.to_lowercase().contains(&needle)
                    || opt.value.to_lowercase().contains(&needle)
            })
            .map(|opt| opt.value.clone())
    }
}
