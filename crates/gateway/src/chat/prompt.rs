//! System prompt assembly
//!
//! Persona (from configuration) + citation instruction + retrieved
//! context block + tool results. The persona is a deployment concern;
//! everything else is structural.

use loreforge_common::types::{Citation, SearchResult};
use loreforge_retrieval::format_context_block;

/// Assemble the per-turn system prompt
pub fn build_system_prompt(
    persona: &str,
    context: &[SearchResult],
    tool_results: &[String],
) -> String {
    let mut prompt = String::from(persona.trim());

    if !context.is_empty() {
        prompt.push_str("\n\n## Retrieved Context\n\n");
        prompt.push_str(&format_context_block(context));
    }

    if !tool_results.is_empty() {
        prompt.push_str("\n\n## Tool Results\n\n");
        for result in tool_results {
            prompt.push_str(result);
            prompt.push_str("\n\n");
        }
    }

    prompt.trim_end().to_string()
}

/// Citations for the results folded into the prompt
pub fn citations_for(context: &[SearchResult]) -> Vec<Citation> {
    context
        .iter()
        .map(|result| Citation {
            source: result.source.clone(),
            section: result.section.clone(),
            score: result.score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use loreforge_common::types::DocumentType;
    use chrono::Utc;
    use uuid::Uuid;

    fn make_result(source: &str, section: &str) -> SearchResult {
        SearchResult {
            id: Uuid::new_v4(),
            text: "body".to_string(),
            score: 0.75,
            source: source.to_string(),
            section: section.to_string(),
            doc_type: DocumentType::Documentation,
            tags: vec![],
            chunk_index: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_persona_only() {
        let prompt = build_system_prompt("Be helpful.", &[], &[]);
        assert_eq!(prompt, "Be helpful.");
    }

    #[test]
    fn test_sections_in_order() {
        let context = vec![make_result("CORE/a.md", "A")];
        let tools = vec!["**search_knowledge** (1 results):".to_string()];
        let prompt = build_system_prompt("Persona.", &context, &tools);

        let persona_at = prompt.find("Persona.").unwrap();
        let context_at = prompt.find("## Retrieved Context").unwrap();
        let tools_at = prompt.find("## Tool Results").unwrap();
        assert!(persona_at < context_at);
        assert!(context_at < tools_at);
        assert!(prompt.contains("[source:section]"));
    }

    #[test]
    fn test_citations_match_context() {
        let context = vec![make_result("CORE/a.md", "A"), make_result("CORE/b.md", "B")];
        let citations = citations_for(&context);
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].source, "CORE/a.md");
        assert_eq!(citations[1].section, "B");
    }
}
