//! Markdown formatting of tool outcomes
//!
//! Each outcome becomes a short Markdown fragment for the "Tool Results"
//! section of the assistant response.

use loreforge_common::types::ToolOutcome;
use serde_json::Value;

/// Snippet length for search-result previews
const SNIPPET_CHARS: usize = 160;

/// Render one outcome as Markdown
pub fn format_outcome(tool: &str, outcome: &ToolOutcome) -> String {
    if !outcome.success {
        let error = outcome.error.as_deref().unwrap_or("unknown error");
        return format!("**{}** failed: {}", tool, error);
    }

    match tool {
        "search_knowledge" | "hyde_search" | "multi_search" => format_search_results(tool, &outcome.data),
        _ => format_generic(tool, &outcome.data),
    }
}

fn format_search_results(tool: &str, data: &Value) -> String {
    let Some(results) = data.as_array() else {
        return format_generic(tool, data);
    };
    if results.is_empty() {
        return format!("**{}**: no results", tool);
    }

    let mut lines = vec![format!("**{}** ({} results):", tool, results.len())];
    for result in results {
        let source = result["source"].as_str().unwrap_or("unknown");
        let section = result["section"].as_str().unwrap_or("");
        let score = result["score"].as_f64().unwrap_or(0.0);
        let text = result["text"].as_str().unwrap_or("");
        lines.push(format!(
            "- `{}:{}` (score {:.2}) {}",
            source,
            section,
            score,
            snippet(text)
        ));
    }
    lines.join("\n")
}

fn format_generic(tool: &str, data: &Value) -> String {
    match data {
        Value::Null => format!("**{}**: done", tool),
        Value::String(s) => format!("**{}**: {}", tool, s),
        Value::Object(map) => {
            let mut lines = vec![format!("**{}**:", tool)];
            for (key, value) in map {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                lines.push(format!("- {}: {}", key, snippet(&rendered)));
            }
            lines.join("\n")
        }
        other => format!(
            "**{}**:\n```json\n{}\n```",
            tool,
            serde_json::to_string_pretty(other).unwrap_or_default()
        ),
    }
}

fn snippet(text: &str) -> String {
    let flattened = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.chars().count() <= SNIPPET_CHARS {
        flattened
    } else {
        let cut: String = flattened.chars().take(SNIPPET_CHARS).collect();
        format!("{}…", cut.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_outcome() {
        let outcome = ToolOutcome {
            tool: "chess_analyze".to_string(),
            data: Value::Null,
            success: false,
            error: Some("chess_analyze did not respond".to_string()),
        };
        let formatted = format_outcome("chess_analyze", &outcome);
        assert!(formatted.contains("failed"));
        assert!(formatted.contains("did not respond"));
    }

    #[test]
    fn test_search_results_rendered_as_list() {
        let outcome = ToolOutcome {
            tool: "search_knowledge".to_string(),
            data: serde_json::json!([
                {"source": "CORE/a.md", "section": "A", "score": 0.9, "text": "alpha body"},
                {"source": "CORE/b.md", "section": "B", "score": 0.4, "text": "beta body"}
            ]),
            success: true,
            error: None,
        };
        let formatted = format_outcome("search_knowledge", &outcome);
        assert!(formatted.contains("2 results"));
        assert!(formatted.contains("`CORE/a.md:A`"));
        assert!(formatted.contains("alpha body"));
    }

    #[test]
    fn test_object_data_rendered_as_fields() {
        let outcome = ToolOutcome {
            tool: "neural_metrics".to_string(),
            data: serde_json::json!({"focus": 0.7, "trend": "rising"}),
            success: true,
            error: None,
        };
        let formatted = format_outcome("neural_metrics", &outcome);
        assert!(formatted.contains("- focus: 0.7"));
        assert!(formatted.contains("- trend: rising"));
    }

    #[test]
    fn test_snippet_truncates() {
        let long = "word ".repeat(100);
        let short = snippet(&long);
        assert!(short.chars().count() <= SNIPPET_CHARS + 1);
        assert!(short.ends_with('…'));
    }
}
