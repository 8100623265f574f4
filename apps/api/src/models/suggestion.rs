use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Rationale attached to low-confidence records the model left unexplained.
pub const LOW_CONFIDENCE_FALLBACK_RATIONALE: &str =
    "Low confidence: no direct match for this field was found in the profile.";

/// Confidence tier reported by the model. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    Low,
    Medium,
    High,
}

impl FromStr for ConfidenceTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(ConfidenceTier::High),
            "medium" => Ok(ConfidenceTier::Medium),
            "low" => Ok(ConfidenceTier::Low),
            other => Err(format!("unknown confidence tier '{other}'")),
        }
    }
}

/// One AI-proposed value for a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionRecord {
    #[serde(alias = "fieldId")]
    pub field_id: String,
    pub value: String,
    #[serde(alias = "confidence")]
    pub confidence_tier: ConfidenceTier,
    /// Which part of the profile the value came from, e.g. "Work Experience".
    #[serde(alias = "source")]
    pub provenance_label: String,
    #[serde(alias = "reasoning")]
    pub rationale: String,
    #[serde(default, alias = "source_excerpt", alias = "sourceExcerpt")]
    pub evidence_excerpt: String,
}

impl SuggestionRecord {
    /// Enforces that low-confidence records always explain themselves.
    pub fn normalized(mut self) -> Self {
        if self.confidence_tier == ConfidenceTier::Low && self.rationale.trim().is_empty() {
            self.rationale = LOW_CONFIDENCE_FALLBACK_RATIONALE.to_string();
        }
        self
    }
}

/// Suggestions keyed by field id. Always replaced wholesale.
pub type SuggestionMap = HashMap<String, SuggestionRecord>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiers_are_ordered() {
        assert!(ConfidenceTier::High > ConfidenceTier::Medium);
        assert!(ConfidenceTier::Medium > ConfidenceTier::Low);
    }

    #[test]
    fn test_tier_parses_case_insensitively() {
        assert_eq!("HIGH".parse::<ConfidenceTier>(), Ok(ConfidenceTier::High));
        assert!("certain".parse::<ConfidenceTier>().is_err());
    }

    #[test]
    fn test_record_accepts_model_field_names() {
        let json = r#"{
            "field_id": "email-address",
            "value": "alex.rivera@example.com",
            "confidence": "high",
            "source": "Personal Info",
            "reasoning": "Email is listed in the profile.",
            "source_excerpt": "alex.rivera@example.com"
        }"#;
        let record: SuggestionRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.confidence_tier, ConfidenceTier::High);
        assert_eq!(record.provenance_label, "Personal Info");
        assert_eq!(record.evidence_excerpt, "alex.rivera@example.com");
    }

    #[test]
    fn test_low_confidence_gets_rationale() {
        let record = SuggestionRecord {
            field_id: "home-address".to_string(),
            value: "San Francisco, CA".to_string(),
            confidence_tier: ConfidenceTier::Low,
            provenance_label: "Personal Info".to_string(),
            rationale: "  ".to_string(),
            evidence_excerpt: String::new(),
        }
        .normalized();
        assert_eq!(record.rationale, LOW_CONFIDENCE_FALLBACK_RATIONALE);
    }
}
