//! Knowledge graph construction
//!
//! Prompts the chat model for entities and relationships per document,
//! merges them into the graph store, and links every extracted entity to
//! its source through a DOCUMENTED_IN edge. Extraction failures are
//! logged and skipped so one bad document never stops an ingestion run.

use loreforge_common::errors::{AppError, Result};
use loreforge_common::llm::{parse_llm_json, ChatModel, ChatRequest};
use loreforge_common::graph::GraphStore;
use loreforge_common::types::{Document, NodeType, RelationType};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Only this much content is sent per document to bound extraction cost
const EXTRACTION_CONTENT_LIMIT: usize = 3000;

const EXTRACTION_SYSTEM_PROMPT: &str = "You extract a knowledge graph from notes. \
Respond with only a JSON object of the form \
{\"entities\": [{\"name\", \"type\", \"description\"}], \
\"relationships\": [{\"from\", \"to\", \"type\", \"description\"}]}. \
Entity types: Concept, Project, Person, Tool, Document, Technique, Theory. \
Relationship types: RELATES_TO, ENABLES, REQUIRES, PART_OF, DOCUMENTED_IN, \
USES, IMPLEMENTS, ANALYZES, DERIVES_FROM.";

#[derive(Debug, Deserialize)]
struct ExtractedEntity {
    name: String,
    #[serde(rename = "type", default)]
    entity_type: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExtractedRelationship {
    from: String,
    to: String,
    #[serde(rename = "type", default)]
    relation_type: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Extraction {
    #[serde(default)]
    entities: Vec<ExtractedEntity>,
    #[serde(default)]
    relationships: Vec<ExtractedRelationship>,
}

/// Per-document extraction outcome
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtractionStats {
    pub entities: usize,
    pub relationships: usize,
}

/// LLM-assisted entity/relation extraction into the graph store
pub struct GraphBuilder {
    llm: Arc<dyn ChatModel>,
    graph: Arc<dyn GraphStore>,
}

impl GraphBuilder {
    pub fn new(llm: Arc<dyn ChatModel>, graph: Arc<dyn GraphStore>) -> Self {
        Self { llm, graph }
    }

    /// Declare graph constraints before the first merge
    pub async fn ensure_constraints(&self) -> Result<()> {
        self.graph.ensure_constraints().await
    }

    /// Extract and merge one document's graph contribution
    pub async fn build_for_document(&self, document: &Document) -> Result<ExtractionStats> {
        let content: String = document.raw.chars().take(EXTRACTION_CONTENT_LIMIT).collect();
        let prompt = format!(
            "Document title: {title}\nDocument type: {doc_type}\n\nContent:\n{content}",
            title = document.title,
            doc_type = document.doc_type.as_str(),
        );

        let response = self
            .llm
            .complete(
                ChatRequest::prompt(EXTRACTION_SYSTEM_PROMPT, prompt)
                    .with_temperature(0.0)
                    .with_max_tokens(1200),
            )
            .await?;

        let extraction: Extraction =
            parse_llm_json(&response).ok_or_else(|| AppError::ParseFailure {
                message: format!("entity extraction for {}", document.path),
            })?;

        // A Document node is created for each source; its name is the
        // source path so graph-mode retrieval can filter the vector store
        let mut doc_props = BTreeMap::new();
        doc_props.insert("title".to_string(), document.title.clone());
        doc_props.insert("type".to_string(), document.doc_type.as_str().to_string());
        self.graph
            .merge_node(NodeType::Document, &document.path, &doc_props)
            .await?;

        let mut stats = ExtractionStats::default();

        for entity in &extraction.entities {
            let name = entity.name.trim();
            if name.is_empty() {
                continue;
            }
            let node_type = entity
                .entity_type
                .as_deref()
                .and_then(NodeType::parse)
                .unwrap_or(NodeType::Concept);

            let mut props = BTreeMap::new();
            if let Some(description) = &entity.description {
                props.insert("description".to_string(), description.clone());
            }
            props.insert("source".to_string(), document.title.clone());
            props.insert("type".to_string(), document.doc_type.as_str().to_string());

            self.graph.merge_node(node_type, name, &props).await?;
            self.graph
                .merge_edge(name, &document.path, RelationType::DocumentedIn, None)
                .await?;
            stats.entities += 1;
        }

        for relationship in &extraction.relationships {
            let from = relationship.from.trim();
            let to = relationship.to.trim();
            if from.is_empty() || to.is_empty() {
                continue;
            }
            // Missing relation types default to RELATES_TO
            let relation = relationship
                .relation_type
                .as_deref()
                .and_then(RelationType::parse)
                .unwrap_or(RelationType::RelatesTo);

            self.graph
                .merge_edge(from, to, relation, relationship.description.as_deref())
                .await?;
            stats.relationships += 1;
        }

        debug!(
            path = %document.path,
            entities = stats.entities,
            relationships = stats.relationships,
            "Graph extraction merged"
        );

        Ok(stats)
    }

    /// Build the graph for many documents, continuing past failures
    pub async fn build_for_documents(&self, documents: &[Document]) -> usize {
        let mut succeeded = 0;
        for document in documents {
            match self.build_for_document(document).await {
                Ok(_) => succeeded += 1,
                Err(e) => {
                    warn!(path = %document.path, error = %e, "Graph extraction failed, skipping");
                }
            }
        }
        succeeded
    }
}
