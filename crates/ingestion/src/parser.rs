//! Markdown parsing
//!
//! Discovers `.md` files by recursive walk, splits YAML front matter from
//! the body, and walks the Markdown AST into ordered sections. Document
//! type falls back to a directory-prefix table; tags come from folder
//! tokens plus a closed keyword list scanned in the body.

use loreforge_common::errors::{AppError, Result};
use loreforge_common::types::{Document, DocumentType, Section};
use chrono::NaiveDate;
use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Parser, Tag, TagEnd};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Title given to the implicit section of heading-less documents
pub const FALLBACK_SECTION: &str = "Main Content";

/// Keywords promoted to tags when present in the body
const TAG_KEYWORDS: &[&str] = &[
    "clos",
    "neural",
    "cognitive",
    "ai",
    "research",
    "flow",
    "optimization",
    "architecture",
    "agent",
    "chess",
    "artifact",
    "music",
    "production",
];

/// Discover Markdown files under a root, sorted for stable ordering
pub fn discover_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("md"))
                .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// Parse one Markdown file into a Document
pub fn parse_file(root: &Path, path: &Path) -> Result<Document> {
    let content = std::fs::read_to_string(path)?;
    let relative = path
        .strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/");
    parse_content(&relative, &content)
}

/// Parse Markdown content under a relative source path
pub fn parse_content(relative_path: &str, content: &str) -> Result<Document> {
    let (front_matter, body) = split_front_matter(content)?;

    let title = front_matter
        .as_ref()
        .and_then(|fm| fm.title.clone())
        .unwrap_or_else(|| file_stem(relative_path));

    let doc_type = front_matter
        .as_ref()
        .and_then(|fm| fm.doc_type)
        .unwrap_or_else(|| infer_type(relative_path));

    let created = front_matter.as_ref().and_then(|fm| fm.date);

    let mut tags = folder_tags(relative_path);
    let body_lower = body.to_lowercase();
    for keyword in TAG_KEYWORDS {
        if body_lower.contains(keyword) && !tags.iter().any(|t| t == keyword) {
            tags.push((*keyword).to_string());
        }
    }
    if let Some(fm) = &front_matter {
        for tag in &fm.tags {
            let tag = tag.trim().to_lowercase();
            if !tag.is_empty() && !tags.iter().any(|t| *t == tag) {
                tags.push(tag);
            }
        }
    }

    let sections = build_sections(body);

    debug!(
        path = %relative_path,
        sections = sections.len(),
        doc_type = doc_type.as_str(),
        "Parsed document"
    );

    Ok(Document {
        title,
        doc_type,
        tags,
        created,
        path: relative_path.to_string(),
        raw: body.to_string(),
        sections,
        extra_front_matter: front_matter.map(|fm| fm.extra).unwrap_or_default(),
    })
}

/// Recognized front-matter keys; everything else is preserved
struct FrontMatter {
    title: Option<String>,
    doc_type: Option<DocumentType>,
    tags: Vec<String>,
    date: Option<NaiveDate>,
    extra: BTreeMap<String, serde_json::Value>,
}

/// Split front matter from the body
///
/// Malformed YAML between the fences fails the file with a recoverable
/// error; the caller continues with the remaining files.
fn split_front_matter(content: &str) -> Result<(Option<FrontMatter>, &str)> {
    let Some(rest) = content.strip_prefix("---") else {
        return Ok((None, content));
    };
    let Some(rest) = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n")) else {
        return Ok((None, content));
    };

    let Some(end) = rest.find("\n---").map(|i| (i, 4)).or_else(|| {
        rest.starts_with("---").then_some((0, 3))
    }) else {
        return Err(AppError::ParseFailure {
            message: "unterminated front matter".to_string(),
        });
    };
    let (end_index, fence_len) = end;
    let yaml = &rest[..end_index];
    let body = rest[end_index + fence_len..].trim_start_matches(['\r', '\n']);

    let value: serde_yaml::Value = serde_yaml::from_str(yaml).map_err(|e| AppError::ParseFailure {
        message: format!("front matter: {}", e),
    })?;

    let mapping = match value {
        serde_yaml::Value::Mapping(mapping) => mapping,
        serde_yaml::Value::Null => serde_yaml::Mapping::new(),
        _ => {
            return Err(AppError::ParseFailure {
                message: "front matter is not a mapping".to_string(),
            })
        }
    };

    let mut front_matter = FrontMatter {
        title: None,
        doc_type: None,
        tags: Vec::new(),
        date: None,
        extra: BTreeMap::new(),
    };

    for (key, value) in mapping {
        let Some(key) = key.as_str().map(str::to_string) else {
            continue;
        };
        match key.as_str() {
            "title" => front_matter.title = value.as_str().map(str::to_string),
            "type" => {
                front_matter.doc_type = value.as_str().and_then(DocumentType::parse);
            }
            "tags" => {
                front_matter.tags = match value {
                    serde_yaml::Value::Sequence(seq) => seq
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect(),
                    serde_yaml::Value::String(s) => {
                        s.split(',').map(|t| t.trim().to_string()).collect()
                    }
                    _ => Vec::new(),
                };
            }
            "date" => {
                front_matter.date = value
                    .as_str()
                    .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok());
            }
            _ => {
                if let Ok(json) = serde_json::to_value(&value) {
                    front_matter.extra.insert(key, json);
                }
            }
        }
    }

    Ok((Some(front_matter), body))
}

/// Directory-prefix table for type inference; unknown prefixes map to
/// documentation
fn infer_type(relative_path: &str) -> DocumentType {
    let prefix = relative_path
        .split('/')
        .next()
        .unwrap_or_default()
        .to_uppercase();
    match prefix.as_str() {
        "CORE" | "BIO" | "EXPERTISE" | "COMMUNICATION" => DocumentType::Documentation,
        "PROJECTS" | "CELAYA_SOLUTIONS" | "MUSIC" => DocumentType::Project,
        "PHILOSOPHY" => DocumentType::Philosophy,
        "COGNITIVE_PATTERNS" | "RESEARCH" | "MENTAL_ARTIFACTS" => DocumentType::Research,
        _ => DocumentType::Documentation,
    }
}

/// Folder tokens, lowercased with separators replaced by spaces
fn folder_tags(relative_path: &str) -> Vec<String> {
    let mut components: Vec<&str> = relative_path.split('/').collect();
    components.pop(); // drop the file name
    components
        .into_iter()
        .filter(|c| !c.is_empty())
        .map(|c| c.to_lowercase().replace(['_', '-'], " "))
        .collect()
}

fn file_stem(relative_path: &str) -> String {
    Path::new(relative_path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| relative_path.to_string())
}

fn heading_level_number(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

/// Walk the Markdown AST into sections
///
/// Every heading closes the current section and opens a new one whose
/// heading is the concatenated text of its inline children. Inline code
/// keeps its backticks; fenced code blocks are preserved intact. A
/// document without headings becomes a single "Main Content" section.
fn build_sections(body: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();

    let mut current_heading = FALLBACK_SECTION.to_string();
    let mut current_level: u8 = 1;
    let mut current_body = String::new();
    let mut opened_by_heading = false;

    let mut in_heading = false;
    let mut heading_text = String::new();
    let mut in_code_block = false;

    let mut close_section = |heading: &str, level: u8, body: &mut String, keep_empty: bool| {
        let trimmed = body.trim();
        if !trimmed.is_empty() || keep_empty {
            sections.push(Section {
                heading: heading.to_string(),
                level,
                body: trimmed.to_string(),
            });
        }
        body.clear();
    };

    for event in Parser::new(body) {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                close_section(
                    &current_heading,
                    current_level,
                    &mut current_body,
                    opened_by_heading,
                );
                in_heading = true;
                heading_text.clear();
                current_level = heading_level_number(level);
            }
            Event::End(TagEnd::Heading(_)) => {
                in_heading = false;
                current_heading = heading_text.trim().to_string();
                if current_heading.is_empty() {
                    current_heading = FALLBACK_SECTION.to_string();
                }
                opened_by_heading = true;
            }
            Event::Start(Tag::CodeBlock(kind)) => {
                in_code_block = true;
                let lang = match &kind {
                    CodeBlockKind::Fenced(lang) => lang.to_string(),
                    CodeBlockKind::Indented => String::new(),
                };
                current_body.push_str("```");
                current_body.push_str(&lang);
                current_body.push('\n');
            }
            Event::End(TagEnd::CodeBlock) => {
                in_code_block = false;
                if !current_body.ends_with('\n') {
                    current_body.push('\n');
                }
                current_body.push_str("```\n\n");
            }
            Event::Text(text) => {
                if in_heading {
                    heading_text.push_str(&text);
                } else {
                    current_body.push_str(&text);
                }
            }
            Event::Code(code) => {
                if in_heading {
                    heading_text.push('`');
                    heading_text.push_str(&code);
                    heading_text.push('`');
                } else {
                    current_body.push('`');
                    current_body.push_str(&code);
                    current_body.push('`');
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if in_heading {
                    heading_text.push(' ');
                } else {
                    current_body.push('\n');
                }
            }
            Event::End(TagEnd::Paragraph) => {
                if !in_code_block {
                    current_body.push_str("\n\n");
                }
            }
            Event::Start(Tag::Item) => {
                current_body.push_str("- ");
            }
            Event::End(TagEnd::Item) => {
                current_body.push('\n');
            }
            Event::End(TagEnd::List(_)) => {
                current_body.push('\n');
            }
            _ => {}
        }
    }

    close_section(
        &current_heading,
        current_level,
        &mut current_body,
        opened_by_heading,
    );

    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_follow_document_order() {
        let doc = parse_content(
            "CORE/notes.md",
            "# First\n\nalpha\n\n## Second\n\nbeta\n\n# Third\n\ngamma\n",
        )
        .unwrap();
        let headings: Vec<&str> = doc.sections.iter().map(|s| s.heading.as_str()).collect();
        assert_eq!(headings, vec!["First", "Second", "Third"]);
        assert_eq!(doc.sections[0].level, 1);
        assert_eq!(doc.sections[1].level, 2);
        assert_eq!(doc.sections[0].body, "alpha");
    }

    #[test]
    fn test_no_headings_yields_main_content() {
        let doc = parse_content("CORE/notes.md", "just a paragraph\n\nand another\n").unwrap();
        assert_eq!(doc.sections.len(), 1);
        assert_eq!(doc.sections[0].heading, FALLBACK_SECTION);
        assert!(doc.sections[0].body.contains("just a paragraph"));
    }

    #[test]
    fn test_section_bodies_bounded_by_document() {
        let content = "# A\n\none two three\n\n# B\n\nfour five\n";
        let doc = parse_content("CORE/notes.md", content).unwrap();
        let total: usize = doc.sections.iter().map(|s| s.body.len()).sum();
        assert!(total <= content.len());
    }

    #[test]
    fn test_code_blocks_preserved() {
        let doc = parse_content(
            "CORE/code.md",
            "# Code\n\nbefore\n\n```rust\nfn main() {}\n```\n\nafter uses `inline` code\n",
        )
        .unwrap();
        let body = &doc.sections[0].body;
        assert!(body.contains("```rust\nfn main() {}\n```"));
        assert!(body.contains("`inline`"));
    }

    #[test]
    fn test_front_matter_recognized_keys() {
        let doc = parse_content(
            "anywhere/notes.md",
            "---\ntitle: My Notes\ntype: research\ntags:\n  - alpha\n  - beta\ndate: 2024-03-01\ncustom: kept\n---\n\n# H\n\nbody\n",
        )
        .unwrap();
        assert_eq!(doc.title, "My Notes");
        assert_eq!(doc.doc_type, DocumentType::Research);
        assert!(doc.tags.contains(&"alpha".to_string()));
        assert!(doc.tags.contains(&"beta".to_string()));
        assert_eq!(
            doc.created,
            Some(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
        );
        assert_eq!(doc.extra_front_matter["custom"], serde_json::json!("kept"));
    }

    #[test]
    fn test_malformed_front_matter_is_recoverable_error() {
        let result = parse_content("CORE/bad.md", "---\ntitle: [unclosed\n---\n\nbody\n");
        assert!(matches!(result, Err(AppError::ParseFailure { .. })));
    }

    #[test]
    fn test_type_inference_table() {
        assert_eq!(infer_type("CORE/a.md"), DocumentType::Documentation);
        assert_eq!(infer_type("PROJECTS/a.md"), DocumentType::Project);
        assert_eq!(infer_type("MUSIC/track.md"), DocumentType::Project);
        assert_eq!(infer_type("PHILOSOPHY/a.md"), DocumentType::Philosophy);
        assert_eq!(infer_type("RESEARCH/a.md"), DocumentType::Research);
        assert_eq!(infer_type("COGNITIVE_PATTERNS/a.md"), DocumentType::Research);
        // Unknown prefixes default to documentation
        assert_eq!(infer_type("SCRATCH/a.md"), DocumentType::Documentation);
        assert_eq!(infer_type("a.md"), DocumentType::Documentation);
    }

    #[test]
    fn test_tags_from_folders_and_keywords() {
        let doc = parse_content(
            "COGNITIVE_PATTERNS/deep/flow-notes.md",
            "# Flow\n\nNotes about flow states and chess practice.\n",
        )
        .unwrap();
        assert!(doc.tags.contains(&"cognitive patterns".to_string()));
        assert!(doc.tags.contains(&"deep".to_string()));
        assert!(doc.tags.contains(&"flow".to_string()));
        assert!(doc.tags.contains(&"chess".to_string()));
    }

    #[test]
    fn test_discover_files_filters_markdown() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("CORE")).unwrap();
        std::fs::write(dir.path().join("CORE/a.md"), "# A\n").unwrap();
        std::fs::write(dir.path().join("CORE/skip.txt"), "nope").unwrap();
        std::fs::write(dir.path().join("b.MD"), "# B\n").unwrap();

        let files = discover_files(dir.path());
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| {
            f.extension()
                .map(|e| e.eq_ignore_ascii_case("md"))
                .unwrap_or(false)
        }));
    }
}
