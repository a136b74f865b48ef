//! Intent classification
//!
//! One short, low-temperature model call per turn. Output is best-effort
//! JSON; anything unparseable falls back to a search-leaning default so a
//! flaky classifier never blocks a turn.

use loreforge_common::llm::{parse_llm_json, ChatModel, ChatRequest};
use loreforge_retrieval::SearchMode;
use serde::{Deserialize, Serialize};
use tracing::debug;

const INTENT_SYSTEM_PROMPT: &str = "Classify the user's message for a \
knowledge-base assistant. Respond with only a JSON object: \
{\"intent\": \"search\"|\"tool\"|\"conversational\"|\"command\", \
\"needsSearch\": bool, \"searchMode\": \"semantic\"|\"keyword\"|\"hybrid\"|\"graph\", \
\"suggestedTools\": [string], \"confidence\": 0.0-1.0}";

/// Turn intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Search,
    Tool,
    Conversational,
    Command,
}

/// Classification result with fallback defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentClassification {
    pub intent: Intent,

    #[serde(alias = "needsSearch")]
    pub needs_search: bool,

    #[serde(alias = "searchMode", default = "default_mode")]
    pub search_mode: SearchMode,

    #[serde(alias = "suggestedTools", default)]
    pub suggested_tools: Vec<String>,

    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn default_mode() -> SearchMode {
    SearchMode::Hybrid
}

fn default_confidence() -> f32 {
    0.5
}

impl Default for IntentClassification {
    /// The documented fallback when classification output cannot be parsed
    fn default() -> Self {
        Self {
            intent: Intent::Search,
            needs_search: true,
            search_mode: SearchMode::Hybrid,
            suggested_tools: Vec::new(),
            confidence: 0.5,
        }
    }
}

/// Classify a user message; never fails
pub async fn classify_intent(llm: &dyn ChatModel, message: &str) -> IntentClassification {
    let request = ChatRequest::prompt(INTENT_SYSTEM_PROMPT, message)
        .with_temperature(0.1)
        .with_max_tokens(200);

    let classification = match llm.complete(request).await {
        Ok(response) => parse_llm_json::<IntentClassification>(&response).unwrap_or_else(|| {
            debug!("Unparseable intent output, using default");
            IntentClassification::default()
        }),
        Err(e) => {
            debug!(error = %e, "Intent classification failed, using default");
            IntentClassification::default()
        }
    };

    debug!(
        intent = ?classification.intent,
        needs_search = classification.needs_search,
        mode = classification.search_mode.as_str(),
        confidence = classification.confidence,
        "Intent classified"
    );

    classification
}

#[cfg(test)]
mod tests {
    use super::*;
    use loreforge_common::llm::MockChatModel;

    #[tokio::test]
    async fn test_parses_camel_case_output() {
        let llm = MockChatModel::new(vec![
            r#"{"intent": "tool", "needsSearch": false, "searchMode": "keyword", "suggestedTools": ["chess_analyze"], "confidence": 0.92}"#,
        ]);
        let classification = classify_intent(&llm, "/chess e4 e5").await;
        assert_eq!(classification.intent, Intent::Tool);
        assert!(!classification.needs_search);
        assert_eq!(classification.search_mode, SearchMode::Keyword);
        assert_eq!(classification.suggested_tools, vec!["chess_analyze"]);
    }

    #[tokio::test]
    async fn test_prose_wrapped_json_parses() {
        let llm = MockChatModel::new(vec![
            "Here's my take: {\"intent\": \"conversational\", \"needsSearch\": false} done.",
        ]);
        let classification = classify_intent(&llm, "thanks!").await;
        assert_eq!(classification.intent, Intent::Conversational);
        assert!(!classification.needs_search);
        // Omitted fields get their documented defaults
        assert_eq!(classification.search_mode, SearchMode::Hybrid);
        assert!((classification.confidence - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_garbage_falls_back_to_search_default() {
        let llm = MockChatModel::new(vec!["I have no idea."]);
        let classification = classify_intent(&llm, "what is flow?").await;
        assert_eq!(classification.intent, Intent::Search);
        assert!(classification.needs_search);
        assert_eq!(classification.search_mode, SearchMode::Hybrid);
        assert!((classification.confidence - 0.5).abs() < 1e-6);
    }
}
