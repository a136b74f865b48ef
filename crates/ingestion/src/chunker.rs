//! Semantic chunking
//!
//! Splits each section body on blank-line boundaries into blocks, then
//! accumulates blocks into token-budgeted chunks. Fenced code blocks and
//! list runs are atomic; adjacent chunks share an overlap seeded from the
//! trailing blocks of the previous chunk; every chunk text is prefixed
//! with its section heading for attribution.

use loreforge_common::types::{estimate_tokens, Chunk, Document};
use chrono::Utc;
use tracing::debug;

/// Chunker configuration
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Token budget per chunk
    pub max_tokens: usize,

    /// Overlap between adjacent chunks in tokens
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_tokens: 600,
            overlap: 100,
        }
    }
}

/// Chunk a document; `chunk_index` runs across the whole source and
/// `total_chunks` is backfilled once the document is complete
pub fn chunk_document(document: &Document, config: &ChunkerConfig) -> Vec<Chunk> {
    let created_at = Utc::now();
    let mut chunks: Vec<Chunk> = Vec::new();

    for section in &document.sections {
        if section.body.trim().is_empty() {
            continue;
        }

        let blocks = split_blocks(&section.body);
        if blocks.is_empty() {
            continue;
        }

        let mut current: Vec<String> = Vec::new();
        let mut seeded_len = 0;

        let mut emit = |blocks_in_chunk: &[String], chunks: &mut Vec<Chunk>| {
            let body = blocks_in_chunk.join("\n\n");
            let text = format!("{}\n\n{}", section.heading, body);
            let index = chunks.len() as u32;
            chunks.push(Chunk {
                id: Chunk::make_id(&document.path, index),
                text,
                source: document.path.clone(),
                section: section.heading.clone(),
                chunk_index: index,
                total_chunks: 0,
                doc_type: document.doc_type,
                tags: document.tags.clone(),
                created_at,
            });
        };

        for block in blocks {
            let block_tokens = estimate_tokens(&block);
            let current_tokens: usize = current.iter().map(|b| estimate_tokens(b)).sum();

            if !current.is_empty()
                && current.len() > seeded_len
                && current_tokens + block_tokens > config.max_tokens
            {
                emit(&current, &mut chunks);
                current = overlap_suffix(&current, config.overlap * 4);
                seeded_len = current.len();
            }

            current.push(block);
        }

        // Emit the remainder unless it is nothing but carried-over overlap
        if current.len() > seeded_len {
            emit(&current, &mut chunks);
        }
    }

    let total = chunks.len() as u32;
    for chunk in &mut chunks {
        chunk.total_chunks = total;
    }

    debug!(
        path = %document.path,
        chunks = chunks.len(),
        "Chunked document"
    );

    chunks
}

/// Split a section body on blank-line boundaries, keeping fenced code
/// blocks intact
fn split_blocks(body: &str) -> Vec<String> {
    let mut blocks: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut in_fence = false;

    for line in body.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            current.push(line);
            continue;
        }

        if line.trim().is_empty() && !in_fence {
            if !current.is_empty() {
                blocks.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }

    if !current.is_empty() {
        blocks.push(current.join("\n"));
    }

    blocks
}

/// Trailing blocks of the previous chunk whose cumulative character
/// length stays within the overlap budget
fn overlap_suffix(blocks: &[String], max_chars: usize) -> Vec<String> {
    if max_chars == 0 {
        return Vec::new();
    }

    let mut suffix: Vec<String> = Vec::new();
    let mut used = 0;
    for block in blocks.iter().rev() {
        let len = block.chars().count();
        if used + len > max_chars {
            break;
        }
        used += len;
        suffix.push(block.clone());
    }
    suffix.reverse();
    suffix
}
