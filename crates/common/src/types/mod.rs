//! Core data model shared across LoreForge services
//!
//! Documents and sections are the parser's output; chunks are the atomic
//! retrieval unit; search results, messages, and tool outcomes travel over
//! the HTTP API; node and relation types define the knowledge graph schema.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Namespace for deterministic chunk identifiers
const CHUNK_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6c6f_7265_666f_7267_6500_0000_0000_0001);

/// Document type, inferred from front matter or directory prefix
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Documentation,
    Project,
    Philosophy,
    Research,
}

impl DocumentType {
    /// All known types, for stats grouping
    pub const ALL: [DocumentType; 4] = [
        DocumentType::Documentation,
        DocumentType::Project,
        DocumentType::Philosophy,
        DocumentType::Research,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Documentation => "documentation",
            DocumentType::Project => "project",
            DocumentType::Philosophy => "philosophy",
            DocumentType::Research => "research",
        }
    }

    /// Parse from a front-matter value; unknown strings yield None
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "documentation" => Some(DocumentType::Documentation),
            "project" => Some(DocumentType::Project),
            "philosophy" => Some(DocumentType::Philosophy),
            "research" => Some(DocumentType::Research),
            _ => None,
        }
    }
}

/// One section of a parsed document, order-significant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Section {
    /// Concatenated inline text of the heading
    pub heading: String,

    /// Heading level (1-6)
    pub level: u8,

    /// Body content with paragraphs, code blocks, and lists preserved
    pub body: String,
}

/// Parsed representation of one Markdown file; immutable after parsing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Title from front matter or file stem
    pub title: String,

    /// Inferred or declared type
    pub doc_type: DocumentType,

    /// Union of folder tokens and body keywords
    pub tags: Vec<String>,

    /// Creation date from front matter, if present
    pub created: Option<NaiveDate>,

    /// Source path relative to the knowledge base root
    pub path: String,

    /// Raw body content (front matter stripped)
    pub raw: String,

    /// Ordered sections
    pub sections: Vec<Section>,

    /// Front-matter keys not otherwise recognized
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_front_matter: BTreeMap<String, serde_json::Value>,
}

/// The atomic retrieval unit persisted in the vector store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable identifier derived from (source, chunk_index)
    pub id: Uuid,

    /// Body text prefixed with its section heading
    pub text: String,

    /// Document path or title this chunk came from
    pub source: String,

    /// Section heading
    pub section: String,

    /// Position within the source
    pub chunk_index: u32,

    /// Total chunks for the source; backfilled once the document is complete
    pub total_chunks: u32,

    /// Document type
    pub doc_type: DocumentType,

    /// Document tags
    pub tags: Vec<String>,

    /// Ingestion timestamp
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    /// Deterministic identifier so re-ingesting a source upserts in place
    pub fn make_id(source: &str, chunk_index: u32) -> Uuid {
        let name = format!("{}:{}", source, chunk_index);
        Uuid::new_v5(&CHUNK_ID_NAMESPACE, name.as_bytes())
    }

    /// Dedup fingerprint
    pub fn fingerprint(&self) -> (String, u32) {
        (self.source.clone(), self.chunk_index)
    }
}

/// Estimated token count, approximated as ceil(chars / 4)
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// A scored retrieval hit, ordered by descending score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Chunk identifier
    pub id: Uuid,

    /// Chunk text
    pub text: String,

    /// Similarity / relevance score in [0, 1]
    pub score: f32,

    /// Source document path or title
    pub source: String,

    /// Section heading
    pub section: String,

    /// Document type
    pub doc_type: DocumentType,

    /// Document tags
    pub tags: Vec<String>,

    /// Position within the source
    pub chunk_index: u32,

    /// Ingestion timestamp
    pub created_at: DateTime<Utc>,
}

impl SearchResult {
    /// Dedup fingerprint, matching `Chunk::fingerprint`
    pub fn fingerprint(&self) -> (String, u32) {
        (self.source.clone(), self.chunk_index)
    }
}

/// Node labels in the knowledge graph
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NodeType {
    Concept,
    Project,
    Person,
    Tool,
    Document,
    Technique,
    Theory,
}

impl NodeType {
    pub const ALL: [NodeType; 7] = [
        NodeType::Concept,
        NodeType::Project,
        NodeType::Person,
        NodeType::Tool,
        NodeType::Document,
        NodeType::Technique,
        NodeType::Theory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Concept => "Concept",
            NodeType::Project => "Project",
            NodeType::Person => "Person",
            NodeType::Tool => "Tool",
            NodeType::Document => "Document",
            NodeType::Technique => "Technique",
            NodeType::Theory => "Theory",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "Concept" => Some(NodeType::Concept),
            "Project" => Some(NodeType::Project),
            "Person" => Some(NodeType::Person),
            "Tool" => Some(NodeType::Tool),
            "Document" => Some(NodeType::Document),
            "Technique" => Some(NodeType::Technique),
            "Theory" => Some(NodeType::Theory),
            _ => None,
        }
    }
}

/// Directed relation types between graph nodes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    RelatesTo,
    Enables,
    Requires,
    PartOf,
    DocumentedIn,
    Uses,
    Implements,
    Analyzes,
    DerivesFrom,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::RelatesTo => "RELATES_TO",
            RelationType::Enables => "ENABLES",
            RelationType::Requires => "REQUIRES",
            RelationType::PartOf => "PART_OF",
            RelationType::DocumentedIn => "DOCUMENTED_IN",
            RelationType::Uses => "USES",
            RelationType::Implements => "IMPLEMENTS",
            RelationType::Analyzes => "ANALYZES",
            RelationType::DerivesFrom => "DERIVES_FROM",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "RELATES_TO" => Some(RelationType::RelatesTo),
            "ENABLES" => Some(RelationType::Enables),
            "REQUIRES" => Some(RelationType::Requires),
            "PART_OF" => Some(RelationType::PartOf),
            "DOCUMENTED_IN" => Some(RelationType::DocumentedIn),
            "USES" => Some(RelationType::Uses),
            "IMPLEMENTS" => Some(RelationType::Implements),
            "ANALYZES" => Some(RelationType::Analyzes),
            "DERIVES_FROM" => Some(RelationType::DerivesFrom),
            _ => None,
        }
    }
}

/// A typed graph node, keyed by (node_type, name)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub name: String,
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

/// Message role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Citation attached to an assistant message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    pub section: String,
    pub score: f32,
}

/// Outcome of one tool dispatch, attached to an assistant message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub tool: String,
    pub data: serde_json::Value,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_deterministic() {
        let a = Chunk::make_id("PROJECTS/alpha.md", 0);
        let b = Chunk::make_id("PROJECTS/alpha.md", 0);
        let c = Chunk::make_id("PROJECTS/alpha.md", 1);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_doc_type_parse() {
        assert_eq!(DocumentType::parse("Research"), Some(DocumentType::Research));
        assert_eq!(DocumentType::parse("unknown"), None);
    }

    #[test]
    fn test_relation_round_trip() {
        for rel in [
            RelationType::RelatesTo,
            RelationType::DocumentedIn,
            RelationType::DerivesFrom,
        ] {
            assert_eq!(RelationType::parse(rel.as_str()), Some(rel));
        }
        assert_eq!(RelationType::parse("FRIENDS_WITH"), None);
    }

    #[test]
    fn test_node_type_serde_names() {
        let json = serde_json::to_string(&NodeType::Technique).unwrap();
        assert_eq!(json, "\"Technique\"");
    }
}
