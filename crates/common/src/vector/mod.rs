//! Vector store adapter
//!
//! Presents vector, keyword (BM25), and alpha-weighted hybrid search over
//! a single chunk collection, with structured filter pushdown. Backends:
//! - `WeaviateVectorStore`: REST schema/batch + GraphQL Get/Aggregate
//! - `MemoryVectorStore`: in-process store for tests and store-less boot
//!
//! Whether a backend accepts a compound `Or` filter over sources is an
//! adapter capability (`supports_or_filter`); callers that need it must
//! fall back to per-source queries when unsupported.

mod memory;

pub use memory::MemoryVectorStore;

use crate::config::VectorStoreConfig;
use crate::errors::{AppError, Result};
use crate::types::{Chunk, DocumentType, SearchResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Structured search predicate, pushed down to the store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "operator", rename_all = "PascalCase")]
pub enum WhereFilter {
    Equal { path: String, value: String },
    Or { operands: Vec<WhereFilter> },
    And { operands: Vec<WhereFilter> },
}

impl WhereFilter {
    /// Equality on a single property
    pub fn equal(path: impl Into<String>, value: impl Into<String>) -> Self {
        WhereFilter::Equal {
            path: path.into(),
            value: value.into(),
        }
    }

    /// Compound Or over `source` equality, used by graph-mode retrieval
    pub fn source_any(sources: &[String]) -> Option<Self> {
        match sources.len() {
            0 => None,
            1 => Some(Self::equal("source", sources[0].clone())),
            _ => Some(WhereFilter::Or {
                operands: sources
                    .iter()
                    .map(|s| Self::equal("source", s.clone()))
                    .collect(),
            }),
        }
    }

    /// Evaluate against a chunk; the in-memory backend and tests use this
    pub fn matches(&self, chunk: &Chunk) -> bool {
        match self {
            WhereFilter::Equal { path, value } => match path.as_str() {
                "source" => chunk.source == *value,
                "section" => chunk.section == *value,
                "doc_type" | "type" => chunk.doc_type.as_str() == value,
                "tags" => chunk.tags.iter().any(|t| t == value),
                _ => false,
            },
            WhereFilter::Or { operands } => operands.iter().any(|f| f.matches(chunk)),
            WhereFilter::And { operands } => operands.iter().all(|f| f.matches(chunk)),
        }
    }
}

/// Collection statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorStoreStats {
    #[serde(rename = "totalChunks")]
    pub total_chunks: u64,
    #[serde(rename = "byType")]
    pub by_type: BTreeMap<String, u64>,
}

/// Trait over the chunk collection
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if absent; records the embedding model in
    /// collection metadata so all vectors share model and dimension
    async fn ensure_schema(&self) -> Result<()>;

    /// Idempotent batch upsert of chunks with their vectors
    async fn upsert_batch(&self, items: &[(Chunk, Vec<f32>)]) -> Result<()>;

    /// Dense similarity search; scores in [0, 1]
    async fn vector_search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<&WhereFilter>,
    ) -> Result<Vec<SearchResult>>;

    /// Sparse keyword search; scores in [0, 1]
    async fn bm25_search(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&WhereFilter>,
    ) -> Result<Vec<SearchResult>>;

    /// Weighted fusion; alpha 1 is pure vector, 0 is pure BM25
    async fn hybrid_search(
        &self,
        query: &str,
        vector: &[f32],
        alpha: f32,
        limit: usize,
        filter: Option<&WhereFilter>,
    ) -> Result<Vec<SearchResult>>;

    /// Remove every chunk of one source; returns the number removed
    async fn delete_by_source(&self, source: &str) -> Result<u64>;

    /// Destroy and recreate the collection
    async fn reset(&self) -> Result<()>;

    /// Totals and per-type counts
    async fn stats(&self) -> Result<VectorStoreStats>;

    /// Whether compound Or filters are pushed down natively
    fn supports_or_filter(&self) -> bool;
}

/// Weaviate-backed vector store
///
/// Objects carry deterministic ids derived from `(source, chunk_index)`,
/// so re-ingestion upserts in place.
pub struct WeaviateVectorStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    class_name: String,
    embedding_model: String,
    or_filter_pushdown: bool,
}

impl WeaviateVectorStore {
    pub fn from_config(config: &VectorStoreConfig, embedding_model: &str) -> Result<Self> {
        let url = config.url.clone().ok_or_else(|| AppError::ConfigMissing {
            key: "vector_store.url".to_string(),
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            class_name: config.class_name.clone(),
            embedding_model: embedding_model.to_string(),
            or_filter_pushdown: config.or_filter_pushdown,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    /// Render a filter as a GraphQL where argument
    fn filter_to_graphql(filter: &WhereFilter) -> String {
        match filter {
            WhereFilter::Equal { path, value } => format!(
                "{{path: [{}], operator: Equal, valueText: {}}}",
                serde_json::to_string(path).unwrap_or_default(),
                serde_json::to_string(value).unwrap_or_default(),
            ),
            WhereFilter::Or { operands } => format!(
                "{{operator: Or, operands: [{}]}}",
                operands
                    .iter()
                    .map(Self::filter_to_graphql)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            WhereFilter::And { operands } => format!(
                "{{operator: And, operands: [{}]}}",
                operands
                    .iter()
                    .map(Self::filter_to_graphql)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }

    fn vector_literal(vector: &[f32]) -> String {
        let joined = vector
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        format!("[{}]", joined)
    }

    async fn graphql(&self, query: String) -> Result<serde_json::Value> {
        let response = self
            .request(reqwest::Method::POST, "/v1/graphql")
            .json(&serde_json::json!({ "query": query }))
            .send()
            .await
            .map_err(|e| AppError::unavailable("vector store", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::bad_response(
                "vector store",
                format!("{}: {}", status, body),
            ));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::bad_response("vector store", e))?;

        if let Some(errors) = body.get("errors").and_then(|e| e.as_array()) {
            if !errors.is_empty() {
                return Err(AppError::bad_response(
                    "vector store",
                    serde_json::to_string(errors).unwrap_or_default(),
                ));
            }
        }

        Ok(body)
    }

    /// Run a Get query and parse hits; `score_expr` names the _additional
    /// field carrying relevance, mapped to [0, 1] by `normalize`
    async fn get_query(
        &self,
        search_clause: &str,
        limit: usize,
        filter: Option<&WhereFilter>,
        score_field: &str,
        normalize: fn(f32) -> f32,
    ) -> Result<Vec<SearchResult>> {
        let where_clause = filter
            .map(|f| format!(", where: {}", Self::filter_to_graphql(f)))
            .unwrap_or_default();

        let query = format!(
            "{{ Get {{ {class}(limit: {limit}, {search}{where_clause}) {{ \
             text source section doc_type tags chunk_index total_chunks created_at \
             _additional {{ id {score_field} }} }} }} }}",
            class = self.class_name,
            limit = limit,
            search = search_clause,
        );

        let body = self.graphql(query).await?;
        let hits = body["data"]["Get"][&self.class_name]
            .as_array()
            .cloned()
            .unwrap_or_default();

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let additional = &hit["_additional"];
            let raw_score = additional[score_field]
                .as_f64()
                .or_else(|| additional[score_field].as_str().and_then(|s| s.parse().ok()))
                .unwrap_or(0.0) as f32;

            let id = additional["id"]
                .as_str()
                .and_then(|s| Uuid::parse_str(s).ok())
                .unwrap_or_else(Uuid::nil);

            let doc_type = hit["doc_type"]
                .as_str()
                .and_then(DocumentType::parse)
                .unwrap_or(DocumentType::Documentation);

            let created_at = hit["created_at"]
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(Utc::now);

            results.push(SearchResult {
                id,
                text: hit["text"].as_str().unwrap_or_default().to_string(),
                score: normalize(raw_score),
                source: hit["source"].as_str().unwrap_or_default().to_string(),
                section: hit["section"].as_str().unwrap_or_default().to_string(),
                doc_type,
                tags: hit["tags"]
                    .as_array()
                    .map(|a| {
                        a.iter()
                            .filter_map(|t| t.as_str().map(String::from))
                            .collect()
                    })
                    .unwrap_or_default(),
                chunk_index: hit["chunk_index"].as_u64().unwrap_or(0) as u32,
                created_at,
            });
        }

        Ok(results)
    }

    fn object_payload(&self, chunk: &Chunk, vector: &[f32]) -> serde_json::Value {
        serde_json::json!({
            "class": self.class_name,
            "id": chunk.id,
            "vector": vector,
            "properties": {
                "text": chunk.text,
                "source": chunk.source,
                "section": chunk.section,
                "doc_type": chunk.doc_type.as_str(),
                "tags": chunk.tags,
                "chunk_index": chunk.chunk_index,
                "total_chunks": chunk.total_chunks,
                "created_at": chunk.created_at.to_rfc3339(),
            }
        })
    }
}

#[async_trait]
impl VectorStore for WeaviateVectorStore {
    async fn ensure_schema(&self) -> Result<()> {
        let existing = self
            .request(
                reqwest::Method::GET,
                &format!("/v1/schema/{}", self.class_name),
            )
            .send()
            .await
            .map_err(|e| AppError::unavailable("vector store", e))?;

        if existing.status().is_success() {
            return Ok(());
        }

        let text_prop = |name: &str| {
            serde_json::json!({ "name": name, "dataType": ["text"] })
        };
        let schema = serde_json::json!({
            "class": self.class_name,
            "vectorizer": "none",
            "description": format!("Knowledge chunks embedded with {}", self.embedding_model),
            "properties": [
                text_prop("text"),
                text_prop("source"),
                text_prop("section"),
                text_prop("doc_type"),
                { "name": "tags", "dataType": ["text[]"] },
                { "name": "chunk_index", "dataType": ["int"] },
                { "name": "total_chunks", "dataType": ["int"] },
                { "name": "created_at", "dataType": ["date"] },
            ],
        });

        let response = self
            .request(reqwest::Method::POST, "/v1/schema")
            .json(&schema)
            .send()
            .await
            .map_err(|e| AppError::unavailable("vector store", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::bad_response(
                "vector store",
                format!("schema init {}: {}", status, body),
            ));
        }

        Ok(())
    }

    async fn upsert_batch(&self, items: &[(Chunk, Vec<f32>)]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let objects: Vec<serde_json::Value> = items
            .iter()
            .map(|(chunk, vector)| self.object_payload(chunk, vector))
            .collect();

        let response = self
            .request(reqwest::Method::POST, "/v1/batch/objects")
            .json(&serde_json::json!({ "objects": objects }))
            .send()
            .await
            .map_err(|e| AppError::unavailable("vector store", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::bad_response(
                "vector store",
                format!("batch upsert {}: {}", status, body),
            ));
        }

        Ok(())
    }

    async fn vector_search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<&WhereFilter>,
    ) -> Result<Vec<SearchResult>> {
        let clause = format!("nearVector: {{vector: {}}}", Self::vector_literal(vector));
        // Cosine distance in [0, 2]; score = 1 - distance, clamped
        self.get_query(&clause, limit, filter, "distance", |d| {
            (1.0 - d).clamp(0.0, 1.0)
        })
        .await
    }

    async fn bm25_search(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&WhereFilter>,
    ) -> Result<Vec<SearchResult>> {
        let clause = format!(
            "bm25: {{query: {}}}",
            serde_json::to_string(query).unwrap_or_default()
        );
        // BM25 scores are unbounded; squash into [0, 1)
        self.get_query(&clause, limit, filter, "score", |s| s / (s + 1.0))
            .await
    }

    async fn hybrid_search(
        &self,
        query: &str,
        vector: &[f32],
        alpha: f32,
        limit: usize,
        filter: Option<&WhereFilter>,
    ) -> Result<Vec<SearchResult>> {
        let clause = format!(
            "hybrid: {{query: {}, vector: {}, alpha: {}}}",
            serde_json::to_string(query).unwrap_or_default(),
            Self::vector_literal(vector),
            alpha.clamp(0.0, 1.0),
        );
        self.get_query(&clause, limit, filter, "score", |s| s.clamp(0.0, 1.0))
            .await
    }

    async fn delete_by_source(&self, source: &str) -> Result<u64> {
        let body = serde_json::json!({
            "match": {
                "class": self.class_name,
                "where": {
                    "path": ["source"],
                    "operator": "Equal",
                    "valueText": source,
                }
            },
            "output": "minimal",
        });

        let response = self
            .request(reqwest::Method::DELETE, "/v1/batch/objects")
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::unavailable("vector store", e))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(AppError::bad_response(
                "vector store",
                format!("delete by source: {}", status),
            ));
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::bad_response("vector store", e))?;
        Ok(parsed["results"]["matches"].as_u64().unwrap_or(0))
    }

    async fn reset(&self) -> Result<()> {
        let response = self
            .request(
                reqwest::Method::DELETE,
                &format!("/v1/schema/{}", self.class_name),
            )
            .send()
            .await
            .map_err(|e| AppError::unavailable("vector store", e))?;

        // 404 means the collection never existed; recreate either way
        if !response.status().is_success() && response.status().as_u16() != 404 {
            return Err(AppError::bad_response(
                "vector store",
                format!("reset: {}", response.status()),
            ));
        }

        self.ensure_schema().await
    }

    async fn stats(&self) -> Result<VectorStoreStats> {
        let total_query = format!(
            "{{ Aggregate {{ {class} {{ meta {{ count }} }} }} }}",
            class = self.class_name
        );
        let body = self.graphql(total_query).await?;
        let total_chunks = body["data"]["Aggregate"][&self.class_name][0]["meta"]["count"]
            .as_u64()
            .unwrap_or(0);

        let grouped_query = format!(
            "{{ Aggregate {{ {class}(groupBy: [\"doc_type\"]) {{ groupedBy {{ value }} meta {{ count }} }} }} }}",
            class = self.class_name
        );
        let grouped = self.graphql(grouped_query).await?;
        let mut by_type = BTreeMap::new();
        if let Some(groups) = grouped["data"]["Aggregate"][&self.class_name].as_array() {
            for group in groups {
                if let Some(value) = group["groupedBy"]["value"].as_str() {
                    by_type.insert(
                        value.to_string(),
                        group["meta"]["count"].as_u64().unwrap_or(0),
                    );
                }
            }
        }

        Ok(VectorStoreStats {
            total_chunks,
            by_type,
        })
    }

    fn supports_or_filter(&self) -> bool {
        self.or_filter_pushdown
    }
}

/// Create a vector store based on configuration
///
/// Falls back to the in-memory store when no URL is configured.
pub fn create_vector_store(
    config: &VectorStoreConfig,
    embedding_model: &str,
) -> Result<std::sync::Arc<dyn VectorStore>> {
    match &config.url {
        Some(_) => Ok(std::sync::Arc::new(WeaviateVectorStore::from_config(
            config,
            embedding_model,
        )?)),
        None => {
            tracing::warn!("No vector store URL configured, using in-memory store");
            Ok(std::sync::Arc::new(MemoryVectorStore::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_to_graphql_equal() {
        let filter = WhereFilter::equal("source", "CORE/a.md");
        let rendered = WeaviateVectorStore::filter_to_graphql(&filter);
        assert_eq!(
            rendered,
            "{path: [\"source\"], operator: Equal, valueText: \"CORE/a.md\"}"
        );
    }

    #[test]
    fn test_filter_to_graphql_or() {
        let filter = WhereFilter::source_any(&["a.md".to_string(), "b.md".to_string()]).unwrap();
        let rendered = WeaviateVectorStore::filter_to_graphql(&filter);
        assert!(rendered.starts_with("{operator: Or, operands: ["));
        assert!(rendered.contains("\"a.md\""));
        assert!(rendered.contains("\"b.md\""));
    }

    #[test]
    fn test_source_any_single_is_plain_equal() {
        let filter = WhereFilter::source_any(&["only.md".to_string()]).unwrap();
        assert_eq!(filter, WhereFilter::equal("source", "only.md"));
        assert!(WhereFilter::source_any(&[]).is_none());
    }

    #[test]
    fn test_filter_matches_chunk() {
        let chunk = Chunk {
            id: Chunk::make_id("CORE/a.md", 0),
            text: "Heading\n\nbody".to_string(),
            source: "CORE/a.md".to_string(),
            section: "Heading".to_string(),
            chunk_index: 0,
            total_chunks: 1,
            doc_type: DocumentType::Documentation,
            tags: vec!["core".to_string()],
            created_at: Utc::now(),
        };

        assert!(WhereFilter::equal("source", "CORE/a.md").matches(&chunk));
        assert!(WhereFilter::equal("doc_type", "documentation").matches(&chunk));
        assert!(WhereFilter::equal("tags", "core").matches(&chunk));
        assert!(!WhereFilter::equal("source", "other.md").matches(&chunk));

        let either = WhereFilter::source_any(&["x.md".to_string(), "CORE/a.md".to_string()])
            .unwrap();
        assert!(either.matches(&chunk));
    }
}
