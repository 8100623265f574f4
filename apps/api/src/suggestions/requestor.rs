use std::sync::Arc;

use tracing::warn;

use crate::models::field::FieldDescriptor;
use crate::models::profile::UserProfile;
use crate::models::suggestion::SuggestionMap;
use crate::suggestions::service::AiService;

/// Issues one suggestion round per detection batch. Never fails: any
/// collaborator error resolves to an empty map.
#[derive(Clone)]
pub struct SuggestionRequestor {
    ai: Arc<dyn AiService>,
}

impl SuggestionRequestor {
    pub fn new(ai: Arc<dyn AiService>) -> Self {
        Self { ai }
    }

    pub async fn request(&self, fields: &[FieldDescriptor], profile: &UserProfile) -> SuggestionMap {
        if fields.is_empty() {
            return SuggestionMap::new();
        }
        match self.ai.analyze_form(fields, profile).await {
            Ok(map) => map,
            Err(e) => {
                warn!("Suggestion request failed, continuing without suggestions: {e}");
                SuggestionMap::new()
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeAi;
    use super::*;
    use crate::models::field::FieldKind;

    fn one_field() -> Vec<FieldDescriptor> {
        vec![FieldDescriptor {
            id: "email".to_string(),
            kind: FieldKind::Email,
            label: "Email".to_string(),
            geometry: None,
            options: vec![],
        }]
    }

    #[tokio::test]
    async fn test_failing_backend_resolves_to_empty_map() {
        let requestor = SuggestionRequestor::new(Arc::new(FakeAi::failing()));
        let map = requestor.request(&one_field(), &UserProfile::demo()).await;
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn test_empty_field_list_skips_backend() {
        let ai = Arc::new(FakeAi::default());
        let requestor = SuggestionRequestor::new(ai.clone());
        requestor.request(&[], &UserProfile::demo()).await;
        assert_eq!(ai.call_count(), 0);
    }
}
