//! Ingestion pipeline
//!
//! Orchestrates scan -> parse -> chunk -> embed -> upsert -> graph build
//! with progress reporting. Per-file parse failures and per-document
//! graph-extraction failures are logged and skipped; embedding and
//! storage failures abort the run with a summary.

use crate::chunker::{chunk_document, ChunkerConfig};
use crate::graph_builder::GraphBuilder;
use crate::parser;
use loreforge_common::config::IngestionConfig;
use loreforge_common::embeddings::CachedEmbedder;
use loreforge_common::errors::Result;
use loreforge_common::types::{Chunk, Document};
use loreforge_common::vector::VectorStore;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// Vector upserts are sent in batches of this size
const UPSERT_BATCH_SIZE: usize = 64;

/// Pipeline stage, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    Reading,
    Chunking,
    Embedding,
    Storing,
    Complete,
}

/// Progress event emitted between pipeline steps
#[derive(Debug, Clone, Serialize)]
pub struct IngestProgress {
    pub stage: IngestStage,
    pub files_processed: usize,
    pub total_files: usize,
    pub chunks_processed: usize,
    pub total_chunks: usize,
    pub message: String,
}

/// Final run summary
#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestSummary {
    pub files_discovered: usize,
    pub documents_parsed: usize,
    pub chunks_created: usize,
    pub graph_documents: usize,
    pub failures: Vec<String>,
}

/// The ingestion pipeline
pub struct IngestionPipeline {
    config: IngestionConfig,
    embedder: Arc<CachedEmbedder>,
    vectors: Arc<dyn VectorStore>,
    graph_builder: Option<GraphBuilder>,
}

impl IngestionPipeline {
    pub fn new(
        config: IngestionConfig,
        embedder: Arc<CachedEmbedder>,
        vectors: Arc<dyn VectorStore>,
        graph_builder: Option<GraphBuilder>,
    ) -> Self {
        Self {
            config,
            embedder,
            vectors,
            graph_builder,
        }
    }

    fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig {
            max_tokens: self.config.max_tokens,
            overlap: self.config.overlap,
        }
    }

    /// Run the full pipeline over the knowledge base directory
    #[instrument(skip_all, fields(dir = %self.config.knowledge_dir))]
    pub async fn run(
        &self,
        on_progress: impl Fn(&IngestProgress) + Send + Sync,
    ) -> Result<IngestSummary> {
        let started = Instant::now();
        let root = Path::new(&self.config.knowledge_dir).to_path_buf();

        // Schema and constraints come first so a misconfigured store
        // fails before any parsing work
        self.vectors.ensure_schema().await?;
        if let Some(builder) = &self.graph_builder {
            builder.ensure_constraints().await?;
        }

        let files = parser::discover_files(&root);
        let total_files = files.len();
        let mut summary = IngestSummary {
            files_discovered: total_files,
            ..IngestSummary::default()
        };

        on_progress(&IngestProgress {
            stage: IngestStage::Reading,
            files_processed: 0,
            total_files,
            chunks_processed: 0,
            total_chunks: 0,
            message: format!("Discovered {} Markdown files", total_files),
        });

        // Parse, continuing past per-file failures
        let mut documents: Vec<Document> = Vec::with_capacity(total_files);
        for (index, file) in files.iter().enumerate() {
            match parser::parse_file(&root, file) {
                Ok(document) => documents.push(document),
                Err(e) => {
                    warn!(path = %file.display(), error = %e, "Parse failed, skipping file");
                    summary.failures.push(format!("{}: {}", file.display(), e));
                }
            }
            on_progress(&IngestProgress {
                stage: IngestStage::Reading,
                files_processed: index + 1,
                total_files,
                chunks_processed: 0,
                total_chunks: 0,
                message: format!("Parsed {}/{} files", index + 1, total_files),
            });
        }
        summary.documents_parsed = documents.len();

        let summary = self
            .index_documents(documents, summary, total_files, &on_progress)
            .await?;

        loreforge_common::metrics::record_ingestion(
            started.elapsed().as_secs_f64(),
            summary.documents_parsed,
            summary.chunks_created,
        );

        info!(
            files = summary.files_discovered,
            documents = summary.documents_parsed,
            chunks = summary.chunks_created,
            graph_documents = summary.graph_documents,
            failures = summary.failures.len(),
            "Ingestion complete"
        );

        Ok(summary)
    }

    /// Re-ingest a single file: purge its chunks, then run the document
    /// through the same chunk/embed/store/graph steps
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn reingest_file(&self, path: &Path) -> Result<IngestSummary> {
        let root = Path::new(&self.config.knowledge_dir);
        let document = parser::parse_file(root, path)?;

        let removed = self.vectors.delete_by_source(&document.path).await?;
        info!(removed, source = %document.path, "Purged previous chunks");

        let summary = IngestSummary {
            files_discovered: 1,
            documents_parsed: 1,
            ..IngestSummary::default()
        };
        self.index_documents(vec![document], summary, 1, &|_| {})
            .await
    }

    /// Chunk, embed, upsert, and graph-build a set of parsed documents
    async fn index_documents(
        &self,
        documents: Vec<Document>,
        mut summary: IngestSummary,
        total_files: usize,
        on_progress: &(impl Fn(&IngestProgress) + Send + Sync),
    ) -> Result<IngestSummary> {
        let chunker_config = self.chunker_config();
        let mut chunks: Vec<Chunk> = Vec::new();
        for document in &documents {
            chunks.extend(chunk_document(document, &chunker_config));
        }
        let total_chunks = chunks.len();
        summary.chunks_created = total_chunks;

        on_progress(&IngestProgress {
            stage: IngestStage::Chunking,
            files_processed: total_files,
            total_files,
            chunks_processed: 0,
            total_chunks,
            message: format!("Created {} chunks", total_chunks),
        });

        // Embedding failures abort the run
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self
            .embedder
            .embed_documents(&texts, |done, total| {
                on_progress(&IngestProgress {
                    stage: IngestStage::Embedding,
                    files_processed: total_files,
                    total_files,
                    chunks_processed: done,
                    total_chunks: total,
                    message: format!("Embedded {}/{} chunks", done, total),
                });
            })
            .await?;

        // Storage failures abort the run
        let items: Vec<(Chunk, Vec<f32>)> = chunks.into_iter().zip(vectors).collect();
        let mut stored = 0;
        for batch in items.chunks(UPSERT_BATCH_SIZE) {
            self.vectors.upsert_batch(batch).await?;
            stored += batch.len();
            on_progress(&IngestProgress {
                stage: IngestStage::Storing,
                files_processed: total_files,
                total_files,
                chunks_processed: stored,
                total_chunks,
                message: format!("Stored {}/{} chunks", stored, total_chunks),
            });
        }

        // Graph extraction is throttled to protect the LLM endpoint and
        // continues past per-document failures
        if let Some(builder) = &self.graph_builder {
            let throttle = Duration::from_millis(self.config.graph_throttle_ms);
            for (index, document) in documents.iter().enumerate() {
                if index > 0 {
                    tokio::time::sleep(throttle).await;
                }
                match builder.build_for_document(document).await {
                    Ok(_) => summary.graph_documents += 1,
                    Err(e) => {
                        warn!(path = %document.path, error = %e, "Graph extraction failed, skipping");
                        summary.failures.push(format!("graph {}: {}", document.path, e));
                    }
                }
            }
        }

        on_progress(&IngestProgress {
            stage: IngestStage::Complete,
            files_processed: total_files,
            total_files,
            chunks_processed: total_chunks,
            total_chunks,
            message: format!(
                "Ingested {} documents into {} chunks",
                summary.documents_parsed, total_chunks
            ),
        });

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loreforge_common::cache::MemoryCache;
    use loreforge_common::embeddings::{CachedEmbedder, Embedder, MockEmbedder};
    use loreforge_common::graph::{GraphStore, MemoryGraphStore};
    use loreforge_common::llm::MockChatModel;
    use loreforge_common::vector::MemoryVectorStore;
    use std::sync::Mutex;

    const EXTRACTION: &str = r#"{"entities": [{"name": "alpha", "type": "Concept"}], "relationships": []}"#;

    fn write_corpus(dir: &Path) {
        std::fs::write(dir.join("a.md"), "# A\n\npara1\n\npara2\n").unwrap();
        std::fs::write(dir.join("b.md"), "# B\n\n```\ncode\n```\n\ntrailing\n").unwrap();
    }

    fn make_pipeline(
        dir: &Path,
        graph: Option<Arc<MemoryGraphStore>>,
    ) -> (IngestionPipeline, Arc<MemoryVectorStore>, Arc<MockEmbedder>) {
        let config = IngestionConfig {
            knowledge_dir: dir.to_string_lossy().to_string(),
            max_tokens: 600,
            overlap: 100,
            graph_throttle_ms: 0,
        };
        let inner = Arc::new(MockEmbedder::new(16));
        let embedder = Arc::new(CachedEmbedder::new(
            inner.clone() as Arc<dyn Embedder>,
            Arc::new(MemoryCache::new()),
            3600,
        ));
        let vectors = Arc::new(MemoryVectorStore::new());
        let builder = graph.map(|g| {
            GraphBuilder::new(
                Arc::new(MockChatModel::new(vec![]).with_fallback(EXTRACTION)),
                g as Arc<dyn GraphStore>,
            )
        });
        let pipeline = IngestionPipeline::new(
            config,
            embedder,
            vectors.clone() as Arc<dyn loreforge_common::vector::VectorStore>,
            builder,
        );
        (pipeline, vectors, inner)
    }

    #[tokio::test]
    async fn test_two_file_corpus_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path());
        let graph = Arc::new(MemoryGraphStore::new());
        let (pipeline, vectors, _) = make_pipeline(dir.path(), Some(graph.clone()));

        let summary = pipeline.run(|_| {}).await.unwrap();
        assert_eq!(summary.files_discovered, 2);
        assert_eq!(summary.documents_parsed, 2);
        assert_eq!(summary.chunks_created, 2);
        assert_eq!(summary.graph_documents, 2);
        assert!(summary.failures.is_empty());

        let stats = vectors.stats().await.unwrap();
        assert_eq!(stats.total_chunks, 2);

        // One Document node per file, at minimum
        let graph_stats = graph.stats().await.unwrap();
        assert!(graph_stats.total_nodes >= 2);

        // Each chunk's section matches its file heading
        let results = vectors.bm25_search("para1", 10, None).await.unwrap();
        assert_eq!(results[0].section, "A");
        let results = vectors.bm25_search("trailing", 10, None).await.unwrap();
        assert_eq!(results[0].section, "B");
    }

    #[tokio::test]
    async fn test_progress_stage_ordering() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path());
        let (pipeline, _, _) = make_pipeline(dir.path(), None);

        let stages = Mutex::new(Vec::new());
        pipeline
            .run(|progress| stages.lock().unwrap().push(progress.stage))
            .await
            .unwrap();

        let stages = stages.into_inner().unwrap();
        assert_eq!(stages.first(), Some(&IngestStage::Reading));
        assert_eq!(stages.last(), Some(&IngestStage::Complete));
        // Stages never regress
        let order = |s: &IngestStage| match s {
            IngestStage::Reading => 0,
            IngestStage::Chunking => 1,
            IngestStage::Embedding => 2,
            IngestStage::Storing => 3,
            IngestStage::Complete => 4,
        };
        for window in stages.windows(2) {
            assert!(order(&window[0]) <= order(&window[1]));
        }
    }

    #[tokio::test]
    async fn test_bad_file_continues() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path());
        std::fs::write(dir.path().join("bad.md"), "---\ntitle: [broken\n---\nbody\n").unwrap();
        let (pipeline, vectors, _) = make_pipeline(dir.path(), None);

        let summary = pipeline.run(|_| {}).await.unwrap();
        assert_eq!(summary.files_discovered, 3);
        assert_eq!(summary.documents_parsed, 2);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(vectors.stats().await.unwrap().total_chunks, 2);
    }

    #[tokio::test]
    async fn test_ingestion_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path());
        let (pipeline, vectors, _) = make_pipeline(dir.path(), None);

        pipeline.run(|_| {}).await.unwrap();
        let first = vectors.stats().await.unwrap().total_chunks;
        pipeline.run(|_| {}).await.unwrap();
        let second = vectors.stats().await.unwrap().total_chunks;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_reingest_single_file() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path());
        let (pipeline, vectors, _) = make_pipeline(dir.path(), None);
        pipeline.run(|_| {}).await.unwrap();

        // Rewrite a.md with two sections; re-ingest just that file
        std::fs::write(
            dir.path().join("a.md"),
            "# A\n\nnew body\n\n# A2\n\nsecond section\n",
        )
        .unwrap();
        let summary = pipeline
            .reingest_file(&dir.path().join("a.md"))
            .await
            .unwrap();
        assert_eq!(summary.chunks_created, 2);

        let stats = vectors.stats().await.unwrap();
        // b.md still has one chunk; a.md now has two
        assert_eq!(stats.total_chunks, 3);
    }
}
