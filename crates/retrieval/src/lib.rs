//! LoreForge retrieval engine
//!
//! Hybrid search over the knowledge corpus:
//! - `engine`: advanced search with semantic / keyword / hybrid / graph
//!   modes, over-fetch, reranking, dedup, and result caching, plus the
//!   HyDE and multi-query variants
//! - `rewrite`: cached LLM query rewriting and entity extraction
//! - `format`: context-block formatting for the chat prompt

pub mod engine;
pub mod format;
pub mod rewrite;

pub use engine::{RetrievalConfig, RetrievalEngine, SearchMode, SearchOptions};
pub use format::{format_context_block, RetrievedContext};
pub use rewrite::QueryRewriter;
