//! AI collaborator: form mapping, answer rewriting, resume parsing and
//! company research.
//!
//! `AppState` holds an `Arc<dyn AiService>`; tests swap in a fake.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::llm_client::prompts::json_system;
use crate::llm_client::{LlmClient, LlmError};
use crate::models::field::FieldDescriptor;
use crate::models::profile::{PartialProfile, UserProfile};
use crate::models::suggestion::{SuggestionMap, SuggestionRecord};
use crate::suggestions::prompts;

// ────────────────────────────────────────────────────────────────────────────
// Output models
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchSource {
    pub title: String,
    pub uri: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanyResearch {
    pub name: String,
    #[serde(alias = "mission")]
    pub summary: String,
    #[serde(alias = "culturePoints")]
    pub culture_points: Vec<String>,
    #[serde(alias = "talkingPoints")]
    pub talking_points: Vec<String>,
    pub sources: Vec<ResearchSource>,
}

// ────────────────────────────────────────────────────────────────────────────
// Trait definition
// ────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait AiService: Send + Sync {
    /// Proposes values for `fields`. Only ids present in `fields` are returned.
    async fn analyze_form(
        &self,
        fields: &[FieldDescriptor],
        profile: &UserProfile,
    ) -> Result<SuggestionMap, LlmError>;

    async fn rewrite_text(
        &self,
        text: &str,
        profile: &UserProfile,
        target_role: &str,
    ) -> Result<String, LlmError>;

    /// Turns extracted resume text into a profile fragment.
    async fn parse_document(&self, text: &str) -> Result<PartialProfile, LlmError>;

    async fn research_entity(&self, target: &str) -> Result<CompanyResearch, LlmError>;
}

// ────────────────────────────────────────────────────────────────────────────
// LlmAiService
// ────────────────────────────────────────────────────────────────────────────

pub struct LlmAiService {
    llm: LlmClient,
}

impl LlmAiService {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

#[derive(Debug, Deserialize)]
struct AnalyzeReply {
    #[serde(default)]
    suggestions: Vec<Value>,
}

#[async_trait]
impl AiService for LlmAiService {
    async fn analyze_form(
        &self,
        fields: &[FieldDescriptor],
        profile: &UserProfile,
    ) -> Result<SuggestionMap, LlmError> {
        let fields_json = serde_json::to_string(&prompt_fields(fields))?;
        let profile_json = serde_json::to_string(profile)?;
        let reply: AnalyzeReply = self
            .llm
            .call_json(
                &prompts::analyze_form_prompt(&fields_json, &profile_json),
                &json_system(prompts::ANALYZE_FORM_SYSTEM),
            )
            .await?;
        let map = suggestions_from_reply(reply.suggestions, fields);
        info!("Model suggested values for {}/{} fields", map.len(), fields.len());
        Ok(map)
    }

    async fn rewrite_text(
        &self,
        text: &str,
        profile: &UserProfile,
        target_role: &str,
    ) -> Result<String, LlmError> {
        let profile_json = serde_json::to_string(profile)?;
        self.llm
            .call_text(
                &prompts::rewrite_prompt(text, &profile_json, target_role),
                &prompts::rewrite_system(),
            )
            .await
    }

    async fn parse_document(&self, text: &str) -> Result<PartialProfile, LlmError> {
        self.llm
            .call_json(
                &prompts::parse_resume_prompt(text),
                &json_system(prompts::PARSE_RESUME_SYSTEM),
            )
            .await
    }

    async fn research_entity(&self, target: &str) -> Result<CompanyResearch, LlmError> {
        self.llm
            .call_json(
                &prompts::research_prompt(target),
                &json_system(prompts::RESEARCH_SYSTEM),
            )
            .await
    }
}

/// The slice of each descriptor the model needs. Geometry is left out.
fn prompt_fields(fields: &[FieldDescriptor]) -> Vec<Value> {
    fields
        .iter()
        .map(|f| {
            let mut entry = json!({ "id": f.id, "label": f.label, "kind": f.kind });
            if !f.options.is_empty() {
                let options: Vec<&str> = f.options.iter().map(|o| o.text.as_str()).collect();
                entry["options"] = json!(options);
            }
            entry
        })
        .collect()
}

/// Builds the suggestion map from raw reply records. Malformed records and
/// records for ids outside `fields` are dropped individually; a later record
/// for the same id replaces an earlier one.
pub fn suggestions_from_reply(records: Vec<Value>, fields: &[FieldDescriptor]) -> SuggestionMap {
    let known: HashSet<&str> = fields.iter().map(|f| f.id.as_str()).collect();
    let mut map = SuggestionMap::new();
    for raw in records {
        let record: SuggestionRecord = match serde_json::from_value(raw) {
            Ok(record) => record,
            Err(e) => {
                debug!("Skipping malformed suggestion record: {e}");
                continue;
            }
        };
        if !known.contains(record.field_id.as_str()) {
            debug!("Skipping suggestion for unknown field '{}'", record.field_id);
            continue;
        }
        map.insert(record.field_id.clone(), record.normalized());
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::field::{FieldKind, SelectOption};
    use crate::models::suggestion::{ConfidenceTier, LOW_CONFIDENCE_FALLBACK_RATIONALE};

    fn fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor {
                id: "email".to_string(),
                kind: FieldKind::Email,
                label: "Email".to_string(),
                geometry: None,
                options: vec![],
            },
            FieldDescriptor {
                id: "years".to_string(),
                kind: FieldKind::Select,
                label: "Years of experience".to_string(),
                geometry: None,
                options: vec![SelectOption {
                    value: "5+".to_string(),
                    text: "5+ years".to_string(),
                }],
            },
        ]
    }

    #[test]
    fn test_reply_filters_unknown_and_malformed() {
        let records = vec![
            json!({"fieldId": "email", "value": "a@b.c", "confidence": "high",
                   "source": "Personal Info", "reasoning": "Listed.", "sourceExcerpt": "a@b.c"}),
            json!({"field_id": "ghost", "value": "x", "confidence": "high",
                   "source": "?", "reasoning": "?"}),
            json!({"field_id": "years", "value": 5}),
        ];
        let map = suggestions_from_reply(records, &fields());
        assert_eq!(map.len(), 1);
        assert_eq!(map["email"].evidence_excerpt, "a@b.c");
    }

    #[test]
    fn test_reply_fills_low_confidence_rationale() {
        let records = vec![json!({"field_id": "years", "value": "5+ years", "confidence": "low",
                                  "source": "Work Experience", "reasoning": ""})];
        let map = suggestions_from_reply(records, &fields());
        assert_eq!(map["years"].confidence_tier, ConfidenceTier::Low);
        assert_eq!(map["years"].rationale, LOW_CONFIDENCE_FALLBACK_RATIONALE);
    }

    #[test]
    fn test_prompt_fields_lists_options_without_geometry() {
        let entries = prompt_fields(&fields());
        assert!(entries[0].get("options").is_none());
        assert_eq!(entries[1]["options"], json!(["5+ years"]));
        assert!(entries[1].get("geometry").is_none());
    }

    #[test]
    fn test_research_accepts_legacy_names() {
        let research: CompanyResearch = serde_json::from_value(json!({
            "name": "Acme", "mission": "Build rockets.",
            "culturePoints": ["Ownership"], "talkingPoints": []
        }))
        .unwrap();
        assert_eq!(research.summary, "Build rockets.");
        assert!(research.sources.is_empty());
    }
}
