//! Context-block formatting
//!
//! Retained results become `{text, source, section, score}` entries,
//! rendered as a numbered block with the citation instruction the chat
//! orchestrator embeds in its system prompt.

use loreforge_common::types::SearchResult;
use serde::{Deserialize, Serialize};

/// One retrieved result, shaped for the LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedContext {
    pub text: String,
    pub source: String,
    pub section: String,
    pub score: f32,
}

impl From<&SearchResult> for RetrievedContext {
    fn from(result: &SearchResult) -> Self {
        Self {
            text: result.text.clone(),
            source: result.source.clone(),
            section: result.section.clone(),
            score: result.score,
        }
    }
}

/// Render retained results as the numbered context block
pub fn format_context_block(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return String::new();
    }

    let mut block = String::from(
        "Use the following retrieved context to ground your answer. \
         Cite sources as [source:section].\n\n",
    );
    for (index, result) in results.iter().enumerate() {
        block.push_str(&format!(
            "[{n}] (source: {source}, section: {section}, score: {score:.2})\n{text}\n\n",
            n = index + 1,
            source = result.source,
            section = result.section,
            score = result.score,
            text = result.text.trim(),
        ));
    }
    block.trim_end().to_string()
}
