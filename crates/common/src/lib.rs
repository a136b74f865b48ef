//! LoreForge Common Library
//!
//! Shared code for all LoreForge services including:
//! - Data model (documents, sections, chunks, search results, graph types)
//! - Provider client abstractions (embedder, chat model, reranker)
//! - Vector-store and graph-store adapters
//! - Cache adapter with TTL categories and rate limiting
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod cache;
pub mod config;
pub mod embeddings;
pub mod errors;
pub mod graph;
pub mod llm;
pub mod metrics;
pub mod rerank;
pub mod types;
pub mod vector;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{AppError, Result};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;

/// Maximum texts per embedding batch request
pub const EMBEDDING_BATCH_SIZE: usize = 128;
