//! In-memory vector store
//!
//! Backs tests and store-less boot. Implements cosine similarity for
//! vector search, Okapi BM25 for keyword search, and alpha-weighted
//! fusion over min-max-normalized scores for hybrid search, so ordering
//! semantics match a real backend: alpha 1 reproduces vector ordering,
//! alpha 0 reproduces BM25 ordering.

use super::{VectorStore, VectorStoreStats, WhereFilter};
use crate::embeddings::cosine_similarity;
use crate::errors::Result;
use crate::types::{Chunk, SearchResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

#[derive(Default)]
pub struct MemoryVectorStore {
    entries: RwLock<Vec<(Chunk, Vec<f32>)>>,
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

fn to_result(chunk: &Chunk, score: f32) -> SearchResult {
    SearchResult {
        id: chunk.id,
        text: chunk.text.clone(),
        score,
        source: chunk.source.clone(),
        section: chunk.section.clone(),
        doc_type: chunk.doc_type,
        tags: chunk.tags.clone(),
        chunk_index: chunk.chunk_index,
        created_at: chunk.created_at,
    }
}

/// Sort by descending score with a stable tiebreak on (source, index)
fn sort_scored(results: &mut [(f32, SearchResult)]) {
    results.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.source.cmp(&b.1.source))
            .then_with(|| a.1.chunk_index.cmp(&b.1.chunk_index))
    });
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("store lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn filtered(&self, filter: Option<&WhereFilter>) -> Vec<(Chunk, Vec<f32>)> {
        self.entries
            .read()
            .expect("store lock")
            .iter()
            .filter(|(chunk, _)| filter.map_or(true, |f| f.matches(chunk)))
            .cloned()
            .collect()
    }

    /// Raw cosine relevance per chunk: 1 - distance, clamped to [0, 1]
    fn vector_scores(vector: &[f32], entries: &[(Chunk, Vec<f32>)]) -> Vec<f32> {
        entries
            .iter()
            .map(|(_, v)| cosine_similarity(vector, v).clamp(0.0, 1.0))
            .collect()
    }

    /// Okapi BM25 over the filtered corpus
    fn bm25_scores(query: &str, entries: &[(Chunk, Vec<f32>)]) -> Vec<f32> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() || entries.is_empty() {
            return vec![0.0; entries.len()];
        }

        let docs: Vec<Vec<String>> = entries
            .iter()
            .map(|(chunk, _)| tokenize(&chunk.text))
            .collect();
        let doc_count = docs.len() as f32;
        let avg_len = docs.iter().map(|d| d.len()).sum::<usize>() as f32 / doc_count;

        // Document frequency per query term
        let mut df: HashMap<&str, f32> = HashMap::new();
        for term in &query_terms {
            let count = docs
                .iter()
                .filter(|doc| doc.iter().any(|t| t == term))
                .count() as f32;
            df.insert(term.as_str(), count);
        }

        docs.iter()
            .map(|doc| {
                let doc_len = doc.len() as f32;
                let mut score = 0.0;
                for term in &query_terms {
                    let tf = doc.iter().filter(|t| *t == term).count() as f32;
                    if tf == 0.0 {
                        continue;
                    }
                    let n = df[term.as_str()];
                    let idf = ((doc_count - n + 0.5) / (n + 0.5) + 1.0).ln();
                    let denom = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * doc_len / avg_len.max(1.0));
                    score += idf * tf * (BM25_K1 + 1.0) / denom;
                }
                score
            })
            .collect()
    }

    /// Min-max normalize into [0, 1]; all-equal scores map to 1
    fn normalize(scores: &[f32]) -> Vec<f32> {
        let max = scores.iter().cloned().fold(f32::MIN, f32::max);
        let min = scores.iter().cloned().fold(f32::MAX, f32::min);
        if scores.is_empty() || max <= min {
            return scores.iter().map(|&s| if s > 0.0 { 1.0 } else { 0.0 }).collect();
        }
        scores.iter().map(|&s| (s - min) / (max - min)).collect()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert_batch(&self, items: &[(Chunk, Vec<f32>)]) -> Result<()> {
        let mut entries = self.entries.write().expect("store lock");
        for (chunk, vector) in items {
            match entries.iter_mut().find(|(c, _)| c.id == chunk.id) {
                Some(slot) => *slot = (chunk.clone(), vector.clone()),
                None => entries.push((chunk.clone(), vector.clone())),
            }
        }
        Ok(())
    }

    async fn vector_search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<&WhereFilter>,
    ) -> Result<Vec<SearchResult>> {
        let entries = self.filtered(filter);
        let scores = Self::vector_scores(vector, &entries);
        let mut scored: Vec<(f32, SearchResult)> = entries
            .iter()
            .zip(scores)
            .map(|((chunk, _), score)| (score, to_result(chunk, score)))
            .collect();
        sort_scored(&mut scored);
        Ok(scored.into_iter().take(limit).map(|(_, r)| r).collect())
    }

    async fn bm25_search(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&WhereFilter>,
    ) -> Result<Vec<SearchResult>> {
        let entries = self.filtered(filter);
        let raw = Self::bm25_scores(query, &entries);
        let normalized = Self::normalize(&raw);
        let mut scored: Vec<(f32, SearchResult)> = Vec::new();
        for (i, (chunk, _)) in entries.iter().enumerate() {
            if raw[i] > 0.0 {
                scored.push((normalized[i], to_result(chunk, normalized[i])));
            }
        }
        sort_scored(&mut scored);
        Ok(scored.into_iter().take(limit).map(|(_, r)| r).collect())
    }

    async fn hybrid_search(
        &self,
        query: &str,
        vector: &[f32],
        alpha: f32,
        limit: usize,
        filter: Option<&WhereFilter>,
    ) -> Result<Vec<SearchResult>> {
        let alpha = alpha.clamp(0.0, 1.0);
        let entries = self.filtered(filter);
        let vector_norm = Self::normalize(&Self::vector_scores(vector, &entries));
        let bm25_norm = Self::normalize(&Self::bm25_scores(query, &entries));

        let mut scored: Vec<(f32, SearchResult)> = Vec::new();
        for (i, (chunk, _)) in entries.iter().enumerate() {
            let fused = alpha * vector_norm[i] + (1.0 - alpha) * bm25_norm[i];
            scored.push((fused, to_result(chunk, fused)));
        }
        sort_scored(&mut scored);
        Ok(scored.into_iter().take(limit).map(|(_, r)| r).collect())
    }

    async fn delete_by_source(&self, source: &str) -> Result<u64> {
        let mut entries = self.entries.write().expect("store lock");
        let before = entries.len();
        entries.retain(|(chunk, _)| chunk.source != source);
        Ok((before - entries.len()) as u64)
    }

    async fn reset(&self) -> Result<()> {
        self.entries.write().expect("store lock").clear();
        Ok(())
    }

    async fn stats(&self) -> Result<VectorStoreStats> {
        let entries = self.entries.read().expect("store lock");
        let mut by_type: BTreeMap<String, u64> = BTreeMap::new();
        for (chunk, _) in entries.iter() {
            *by_type.entry(chunk.doc_type.as_str().to_string()).or_insert(0) += 1;
        }
        Ok(VectorStoreStats {
            total_chunks: entries.len() as u64,
            by_type,
        })
    }

    fn supports_or_filter(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentType;
    use chrono::Utc;

    fn make_chunk(source: &str, index: u32, text: &str) -> (Chunk, Vec<f32>) {
        make_typed_chunk(source, index, text, DocumentType::Documentation)
    }

    fn make_typed_chunk(
        source: &str,
        index: u32,
        text: &str,
        doc_type: DocumentType,
    ) -> (Chunk, Vec<f32>) {
        let chunk = Chunk {
            id: Chunk::make_id(source, index),
            text: text.to_string(),
            source: source.to_string(),
            section: "Main Content".to_string(),
            chunk_index: index,
            total_chunks: 0,
            doc_type,
            tags: vec![],
            created_at: Utc::now(),
        };
        // Vector encodes a crude direction per text for similarity tests
        let mut vector = vec![0.0f32; 8];
        for (i, byte) in text.bytes().enumerate() {
            vector[i % 8] += byte as f32 / 255.0;
        }
        (chunk, vector)
    }

    async fn seeded_store() -> MemoryVectorStore {
        let store = MemoryVectorStore::new();
        store
            .upsert_batch(&[
                make_chunk("a.md", 0, "chess openings and chess endgames"),
                make_chunk("a.md", 1, "neural networks for flow states"),
                make_chunk("b.md", 0, "music production workflow notes"),
            ])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_upsert_idempotent() {
        let store = MemoryVectorStore::new();
        let item = make_chunk("a.md", 0, "text");
        store.upsert_batch(std::slice::from_ref(&item)).await.unwrap();
        store.upsert_batch(std::slice::from_ref(&item)).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_bm25_matches_keyword() {
        let store = seeded_store().await;
        let results = store.bm25_search("chess", 10, None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, "a.md");
        assert_eq!(results[0].chunk_index, 0);
        assert!(results[0].score > 0.0 && results[0].score <= 1.0);
    }

    #[tokio::test]
    async fn test_hybrid_alpha_one_matches_vector_ordering() {
        let store = seeded_store().await;
        let (_, query_vec) = make_chunk("q.md", 0, "chess openings and chess endgames");

        let vector_order: Vec<_> = store
            .vector_search(&query_vec, 10, None)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        let hybrid_order: Vec<_> = store
            .hybrid_search("chess", &query_vec, 1.0, 10, None)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(vector_order, hybrid_order);
    }

    #[tokio::test]
    async fn test_hybrid_alpha_zero_matches_bm25_ordering() {
        let store = seeded_store().await;
        let (_, query_vec) = make_chunk("q.md", 0, "anything");

        let bm25_top = store
            .bm25_search("music production", 10, None)
            .await
            .unwrap()
            .first()
            .map(|r| r.id);
        let hybrid_top = store
            .hybrid_search("music production", &query_vec, 0.0, 10, None)
            .await
            .unwrap()
            .first()
            .map(|r| r.id);
        assert_eq!(bm25_top, hybrid_top);
    }

    #[tokio::test]
    async fn test_filter_pushdown() {
        let store = seeded_store().await;
        let filter = WhereFilter::equal("source", "b.md");
        let (_, query_vec) = make_chunk("q.md", 0, "music");
        let results = store
            .vector_search(&query_vec, 10, Some(&filter))
            .await
            .unwrap();
        assert!(results.iter().all(|r| r.source == "b.md"));
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_source() {
        let store = seeded_store().await;
        let removed = store.delete_by_source("a.md").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_reset_and_stats() {
        let store = MemoryVectorStore::new();
        store
            .upsert_batch(&[
                make_typed_chunk("a.md", 0, "one", DocumentType::Research),
                make_typed_chunk("b.md", 0, "two", DocumentType::Project),
                make_typed_chunk("b.md", 1, "three", DocumentType::Project),
            ])
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_chunks, 3);
        assert_eq!(stats.by_type.get("project"), Some(&2));
        assert_eq!(stats.by_type.get("research"), Some(&1));

        store.reset().await.unwrap();
        assert_eq!(store.stats().await.unwrap().total_chunks, 0);
    }
}
