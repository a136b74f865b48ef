//! Advanced search
//!
//! Candidate generation per mode with an over-fetch factor, cached query
//! rewriting, optional reranking, fingerprint deduplication, and a result
//! cache keyed by the query embedding. Graph mode narrows the vector
//! search to sources reachable from entities extracted out of the query,
//! falling back to hybrid when the graph yields nothing.

use crate::rewrite::QueryRewriter;
use loreforge_common::cache::{keys, CacheStore, CacheStoreExt};
use loreforge_common::embeddings::Embedder;
use loreforge_common::errors::Result;
use loreforge_common::graph::GraphStore;
use loreforge_common::llm::{ChatModel, ChatRequest};
use loreforge_common::rerank::Reranker;
use loreforge_common::types::SearchResult;
use loreforge_common::vector::{VectorStore, WhereFilter};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

const HYDE_SYSTEM_PROMPT: &str = "Write a concise hypothetical answer to the \
question as if you already knew the facts. First person, direct, no \
preamble. Keep it short.";

/// Search mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Semantic,
    Keyword,
    Hybrid,
    Graph,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Semantic => "semantic",
            SearchMode::Keyword => "keyword",
            SearchMode::Hybrid => "hybrid",
            SearchMode::Graph => "graph",
        }
    }
}

impl Default for SearchMode {
    fn default() -> Self {
        SearchMode::Hybrid
    }
}

/// Per-request search options
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub mode: SearchMode,
    pub filter: Option<WhereFilter>,
    pub limit: usize,
    pub rerank: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            mode: SearchMode::Hybrid,
            filter: None,
            limit: 10,
            rerank: true,
        }
    }
}

/// Engine tuning knobs
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Candidate over-fetch factor ahead of rerank/dedup
    pub overfetch_factor: usize,

    /// Vector/keyword weighting for hybrid mode
    pub hybrid_alpha: f32,

    /// Documents gathered per extracted entity in graph mode
    pub graph_documents_per_entity: usize,

    /// TTL for cached result sets
    pub search_ttl_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            overfetch_factor: 3,
            hybrid_alpha: 0.7,
            graph_documents_per_entity: 5,
            search_ttl_secs: 3600,
        }
    }
}

/// The retrieval engine
pub struct RetrievalEngine {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    graph: Option<Arc<dyn GraphStore>>,
    cache: Arc<dyn CacheStore>,
    llm: Arc<dyn ChatModel>,
    reranker: Arc<dyn Reranker>,
    rewriter: QueryRewriter,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        graph: Option<Arc<dyn GraphStore>>,
        cache: Arc<dyn CacheStore>,
        llm: Arc<dyn ChatModel>,
        reranker: Arc<dyn Reranker>,
        rewriter: QueryRewriter,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            vectors,
            graph,
            cache,
            llm,
            reranker,
            rewriter,
            config,
        }
    }

    /// Advanced search: rewrite, over-fetch, rerank, dedup, cache
    pub async fn advanced_search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let query_vec = self.embedder.embed(query).await?;
        let cache_key = self.cache_key(options, &query_vec);

        if let Some(cached) = self
            .cache
            .get_json::<Vec<SearchResult>>(&cache_key)
            .await?
        {
            loreforge_common::metrics::record_cache(true, "search");
            return Ok(take(cached, options.limit));
        }
        loreforge_common::metrics::record_cache(false, "search");

        // Rewriting failure degrades to the original query
        let rewritten = match self.rewriter.rewrite(query).await {
            Ok(rewritten) => rewritten,
            Err(e) => {
                warn!(error = %e, "Query rewrite failed, using original query");
                query.to_string()
            }
        };

        let fetch = options.limit * self.config.overfetch_factor;
        let filter = options.filter.as_ref();

        let candidates = match options.mode {
            SearchMode::Semantic => self.vectors.vector_search(&query_vec, fetch, filter).await?,
            SearchMode::Keyword => self.vectors.bm25_search(&rewritten, fetch, filter).await?,
            SearchMode::Hybrid => {
                self.vectors
                    .hybrid_search(&rewritten, &query_vec, self.config.hybrid_alpha, fetch, filter)
                    .await?
            }
            SearchMode::Graph => {
                self.graph_candidates(query, &rewritten, &query_vec, fetch, filter)
                    .await?
            }
        };

        let mut results = candidates;
        if options.rerank && results.len() > options.limit {
            results = self.reranker.rerank(&rewritten, results, None).await;
        }

        let results = dedup(results);

        if let Err(e) = self
            .cache
            .put_json(&cache_key, &results, self.config.search_ttl_secs)
            .await
        {
            warn!(error = %e, "Failed to cache search results, continuing");
        }

        Ok(take(results, options.limit))
    }

    /// HyDE: embed a hypothetical answer and search with that vector
    pub async fn hyde_search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let hypothetical = self
            .llm
            .complete(
                ChatRequest::prompt(HYDE_SYSTEM_PROMPT, query)
                    .with_temperature(0.7)
                    .with_max_tokens(500),
            )
            .await?;

        debug!(chars = hypothetical.len(), "Generated hypothetical answer");

        let vector = self.embedder.embed(&hypothetical).await?;
        let results = self.vectors.vector_search(&vector, limit, None).await?;
        Ok(dedup(results))
    }

    /// Multi-query: union hybrid results for the original and its rewrite
    pub async fn multi_query_search(
        &self,
        query: &str,
        extra_variants: &[String],
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let mut queries = vec![query.to_string()];
        match self.rewriter.rewrite(query).await {
            Ok(rewritten) if rewritten != query => queries.push(rewritten),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Query rewrite failed for multi-query"),
        }
        for variant in extra_variants {
            let variant = variant.trim();
            if !variant.is_empty() && !queries.iter().any(|q| q == variant) {
                queries.push(variant.to_string());
            }
        }

        let fetch = limit * self.config.overfetch_factor;
        let mut merged: Vec<SearchResult> = Vec::new();
        let mut seen: HashSet<uuid::Uuid> = HashSet::new();

        for candidate_query in &queries {
            let vector = self.embedder.embed(candidate_query).await?;
            let results = self
                .vectors
                .hybrid_search(candidate_query, &vector, self.config.hybrid_alpha, fetch, None)
                .await?;
            for result in results {
                if seen.insert(result.id) {
                    merged.push(result);
                } else if let Some(existing) = merged.iter_mut().find(|r| r.id == result.id) {
                    // Union keeps the best score seen for a chunk
                    if result.score > existing.score {
                        existing.score = result.score;
                    }
                }
            }
        }

        merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(take(dedup(merged), limit))
    }

    /// Graph mode: entities -> documents -> source-restricted vector search
    async fn graph_candidates(
        &self,
        query: &str,
        rewritten: &str,
        query_vec: &[f32],
        fetch: usize,
        filter: Option<&WhereFilter>,
    ) -> Result<Vec<SearchResult>> {
        let Some(graph) = &self.graph else {
            debug!("Graph store absent, falling back to hybrid");
            return self
                .vectors
                .hybrid_search(rewritten, query_vec, self.config.hybrid_alpha, fetch, filter)
                .await;
        };

        let entities = match self.rewriter.extract_entities(query).await {
            Ok(entities) => entities,
            Err(e) => {
                warn!(error = %e, "Entity extraction failed, falling back to hybrid");
                Vec::new()
            }
        };

        let mut sources: Vec<String> = Vec::new();
        for entity in &entities {
            match graph
                .documents_for(entity, self.config.graph_documents_per_entity)
                .await
            {
                Ok(documents) => {
                    for document in documents {
                        if !sources.contains(&document) {
                            sources.push(document);
                        }
                    }
                }
                Err(e) => warn!(entity = %entity, error = %e, "Graph lookup failed"),
            }
        }

        if sources.is_empty() {
            debug!("No graph documents found, falling back to hybrid");
            return self
                .vectors
                .hybrid_search(rewritten, query_vec, self.config.hybrid_alpha, fetch, filter)
                .await;
        }

        if sources.len() > 1 && !self.vectors.supports_or_filter() {
            // Backend cannot express a compound Or over sources: batch
            // per-source queries and merge by score
            let mut merged: Vec<SearchResult> = Vec::new();
            for source in &sources {
                let filter = WhereFilter::equal("source", source.clone());
                merged.extend(
                    self.vectors
                        .vector_search(query_vec, fetch, Some(&filter))
                        .await?,
                );
            }
            merged.sort_by(|a, b| {
                b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal)
            });
            merged.truncate(fetch);
            return Ok(merged);
        }

        let source_filter = WhereFilter::source_any(&sources);
        self.vectors
            .vector_search(query_vec, fetch, source_filter.as_ref())
            .await
    }

    fn cache_key(&self, options: &SearchOptions, query_vec: &[f32]) -> String {
        let base = keys::search_results(options.mode.as_str(), query_vec);
        match &options.filter {
            // Filters change the candidate set, so they join the key
            Some(filter) => {
                let digest = keys::hash_hex(
                    serde_json::to_string(filter).unwrap_or_default().as_bytes(),
                );
                format!("{}:{}", base, digest)
            }
            None => base,
        }
    }
}

/// Deduplicate by (source, chunk_index), keeping the first occurrence
fn dedup(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen: HashSet<(String, u32)> = HashSet::new();
    results
        .into_iter()
        .filter(|result| seen.insert(result.fingerprint()))
        .collect()
}

fn take(mut results: Vec<SearchResult>, limit: usize) -> Vec<SearchResult> {
    results.truncate(limit);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use loreforge_common::cache::MemoryCache;
    use loreforge_common::embeddings::MockEmbedder;
    use loreforge_common::graph::MemoryGraphStore;
    use loreforge_common::llm::MockChatModel;
    use loreforge_common::rerank::NoopReranker;
    use loreforge_common::types::{Chunk, DocumentType, NodeType, RelationType};
    use loreforge_common::vector::MemoryVectorStore;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn make_chunk(source: &str, index: u32, text: &str) -> (Chunk, Vec<f32>) {
        let chunk = Chunk {
            id: Chunk::make_id(source, index),
            text: text.to_string(),
            source: source.to_string(),
            section: "Main Content".to_string(),
            chunk_index: index,
            total_chunks: 0,
            doc_type: DocumentType::Documentation,
            tags: vec![],
            created_at: Utc::now(),
        };
        let mut vector = vec![0.0f32; 8];
        for (i, byte) in text.bytes().enumerate() {
            vector[i % 8] += byte as f32 / 255.0;
        }
        (chunk, vector)
    }

    struct Fixture {
        engine: RetrievalEngine,
        embedder: Arc<MockEmbedder>,
        llm: Arc<MockChatModel>,
    }

    async fn fixture(graph: Option<Arc<MemoryGraphStore>>, llm_script: Vec<&str>) -> Fixture {
        let vectors = Arc::new(MemoryVectorStore::new());
        vectors
            .upsert_batch(&[
                make_chunk("CORE/flow.md", 0, "flow states and deep work"),
                make_chunk("CORE/flow.md", 1, "interruptions break concentration"),
                make_chunk("MUSIC/mix.md", 0, "music production mixing notes"),
            ])
            .await
            .unwrap();

        let embedder = Arc::new(MockEmbedder::new(8));
        let cache = Arc::new(MemoryCache::new());
        let llm = Arc::new(MockChatModel::new(llm_script));
        let rewriter = QueryRewriter::new(llm.clone(), cache.clone(), 3600);

        let engine = RetrievalEngine::new(
            embedder.clone(),
            vectors,
            graph.map(|g| g as Arc<dyn GraphStore>),
            cache,
            llm.clone(),
            Arc::new(NoopReranker),
            rewriter,
            RetrievalConfig::default(),
        );
        Fixture {
            engine,
            embedder,
            llm,
        }
    }

    #[tokio::test]
    async fn test_results_ordered_and_limited() {
        let f = fixture(None, vec!["flow deep work"]).await;
        let options = SearchOptions {
            mode: SearchMode::Hybrid,
            limit: 2,
            ..SearchOptions::default()
        };
        let results = f.engine.advanced_search("flow", &options).await.unwrap();
        assert!(results.len() <= 2);
        for window in results.windows(2) {
            assert!(window[0].score >= window[1].score);
        }
    }

    #[tokio::test]
    async fn test_identical_searches_identical_results() {
        let f = fixture(None, vec!["flow deep work"]).await;
        let options = SearchOptions::default();

        let first = f.engine.advanced_search("flow", &options).await.unwrap();
        let second = f.engine.advanced_search("flow", &options).await.unwrap();
        let ids = |rs: &[SearchResult]| rs.iter().map(|r| r.id).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
        // Second call was served from the result cache: one rewrite only
        assert_eq!(f.llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_dedup_by_fingerprint() {
        let results = vec![
            make_chunk("a.md", 0, "x").0,
            make_chunk("a.md", 0, "x").0,
            make_chunk("a.md", 1, "y").0,
        ]
        .into_iter()
        .map(|chunk| SearchResult {
            id: chunk.id,
            text: chunk.text,
            score: 0.5,
            source: chunk.source,
            section: chunk.section,
            doc_type: chunk.doc_type,
            tags: chunk.tags,
            chunk_index: chunk.chunk_index,
            created_at: chunk.created_at,
        })
        .collect::<Vec<_>>();

        let deduped = dedup(results);
        assert_eq!(deduped.len(), 2);
        let mut fingerprints: Vec<_> = deduped.iter().map(|r| r.fingerprint()).collect();
        fingerprints.dedup();
        assert_eq!(fingerprints.len(), 2);
    }

    #[tokio::test]
    async fn test_keyword_mode_uses_rewritten_query() {
        // The rewrite introduces the keyword that actually matches
        let f = fixture(None, vec!["music production"]).await;
        let options = SearchOptions {
            mode: SearchMode::Keyword,
            rerank: false,
            ..SearchOptions::default()
        };
        let results = f.engine.advanced_search("mixing tunes", &options).await.unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].source, "MUSIC/mix.md");
    }

    #[tokio::test]
    async fn test_graph_mode_restricts_to_entity_documents() {
        let graph = Arc::new(MemoryGraphStore::new());
        let none = BTreeMap::new();
        graph.merge_node(NodeType::Concept, "flow", &none).await.unwrap();
        graph
            .merge_node(NodeType::Document, "CORE/flow.md", &none)
            .await
            .unwrap();
        graph
            .merge_edge("flow", "CORE/flow.md", RelationType::DocumentedIn, None)
            .await
            .unwrap();

        // Script: rewrite, then entity extraction
        let f = fixture(Some(graph), vec!["flow focus", "[\"flow\"]"]).await;
        let options = SearchOptions {
            mode: SearchMode::Graph,
            rerank: false,
            ..SearchOptions::default()
        };
        let results = f.engine.advanced_search("what is flow?", &options).await.unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.source == "CORE/flow.md"));
    }

    #[tokio::test]
    async fn test_graph_mode_falls_back_without_entities() {
        let graph = Arc::new(MemoryGraphStore::new());
        let f = fixture(Some(graph), vec!["flow focus", "[]"]).await;
        let options = SearchOptions {
            mode: SearchMode::Graph,
            rerank: false,
            ..SearchOptions::default()
        };
        // Empty entity list: hybrid fallback still returns results
        let results = f.engine.advanced_search("what is flow?", &options).await.unwrap();
        assert!(!results.is_empty());
    }

    #[tokio::test]
    async fn test_hyde_single_embedding_call() {
        let f = fixture(None, vec!["I reach flow by removing interruptions."]).await;
        let before = f.embedder.call_count();
        let results = f.engine.hyde_search("how do I reach flow?", 2).await.unwrap();
        assert!(results.len() <= 2);
        // Exactly one embedding call: the hypothetical answer
        assert_eq!(f.embedder.call_count(), before + 1);
    }

    #[tokio::test]
    async fn test_multi_query_unions_by_id() {
        let f = fixture(None, vec!["music production mixing"]).await;
        let results = f
            .engine
            .multi_query_search("mixing music", &[], 10)
            .await
            .unwrap();
        assert!(!results.is_empty());
        let mut ids: Vec<_> = results.iter().map(|r| r.id).collect();
        let before = ids.len();
        ids.dedup();
        assert_eq!(ids.len(), before);
        for window in results.windows(2) {
            assert!(window[0].score >= window[1].score);
        }
    }
}
