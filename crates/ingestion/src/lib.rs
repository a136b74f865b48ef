//! LoreForge ingestion pipeline
//!
//! Turns a directory of Markdown files into indexed, embedded chunks and
//! a knowledge graph:
//! - `parser`: file discovery, front matter, section tree, type inference
//! - `chunker`: token-budgeted, overlap-aware semantic chunking
//! - `graph_builder`: LLM-assisted entity/relation extraction
//! - `pipeline`: scan -> parse -> chunk -> embed -> upsert -> graph build

pub mod chunker;
pub mod graph_builder;
pub mod parser;
pub mod pipeline;
