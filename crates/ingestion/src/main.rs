//! LoreForge ingestion CLI
//!
//! Ingests a knowledge-base directory (default `./knowledgebase`):
//! 1. Parses Markdown into documents
//! 2. Chunks and embeds them
//! 3. Upserts chunks into the vector store
//! 4. Extracts the knowledge graph
//!
//! Progress goes to stdout, errors to stderr; exit code is non-zero on
//! any unrecoverable failure.

use loreforge_ingestion::graph_builder::GraphBuilder;
use loreforge_ingestion::pipeline::{IngestProgress, IngestionPipeline};
use loreforge_common::{cache, config::AppConfig, embeddings, graph, llm, vector, VERSION};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing; progress lines go to stdout, logs to stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    info!("Starting LoreForge ingestion v{}", VERSION);

    // Load configuration
    let mut config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        anyhow::anyhow!(e)
    })?;

    // The knowledge-base directory may be overridden on the command line
    if let Some(dir) = std::env::args().nth(1) {
        config.ingestion.knowledge_dir = dir;
    }

    // Wire up providers; in-memory fallbacks keep partial operation
    // possible but a real run wants every endpoint configured
    let cache = cache::create_cache(&config.cache).await?;
    let embedder = embeddings::create_embedder(
        &config.embedding,
        cache.clone(),
        config.cache.embedding_ttl_secs,
    );
    let vectors = vector::create_vector_store(&config.vector_store, &config.embedding.model)?;
    let graph_builder = match graph::create_graph_store(&config.graph_store).await? {
        Some(graph_store) => Some(GraphBuilder::new(
            llm::create_chat_model(&config.llm),
            graph_store,
        )),
        None => {
            info!("Graph store disabled, skipping graph build");
            None
        }
    };

    let pipeline = IngestionPipeline::new(
        config.ingestion.clone(),
        embedder,
        vectors,
        graph_builder,
    );

    let summary = pipeline.run(print_progress).await.map_err(|e| {
        eprintln!("Ingestion failed: {}", e);
        anyhow::anyhow!(e)
    })?;

    println!(
        "Done: {} files, {} documents, {} chunks, {} graph documents",
        summary.files_discovered,
        summary.documents_parsed,
        summary.chunks_created,
        summary.graph_documents
    );
    if !summary.failures.is_empty() {
        eprintln!("{} file(s) skipped:", summary.failures.len());
        for failure in &summary.failures {
            eprintln!("  {}", failure);
        }
    }

    Ok(())
}

fn print_progress(progress: &IngestProgress) {
    println!(
        "[{stage:?}] files {files}/{total_files} chunks {chunks}/{total_chunks} - {message}",
        stage = progress.stage,
        files = progress.files_processed,
        total_files = progress.total_files,
        chunks = progress.chunks_processed,
        total_chunks = progress.total_chunks,
        message = progress.message,
    );
}
