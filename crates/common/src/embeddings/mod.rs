//! Embedding service abstraction
//!
//! Provides a unified interface over embedding generation:
//! - An OpenAI-compatible HTTP client with retry and backoff
//! - A cache-through wrapper keyed by (model, text) with a 24h TTL
//! - A mock embedder for testing
//! - Cosine similarity for in-process rank fusion and tests

use crate::cache::{keys, CacheStore, CacheStoreExt};
use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts; output order matches input
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// Cosine similarity with a length guard
///
/// Returns 0.0 for mismatched lengths or zero-magnitude inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// OpenAI-compatible embedding client
pub struct HttpEmbedder {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
    max_retries: u32,
}

#[derive(Serialize)]
struct EmbeddingRequest {
    input: Vec<String>,
    model: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    /// Build from configuration; a missing API key fails at first use
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimension: config.dimension,
            max_retries: config.max_retries,
        }
    }

    /// Make a request with retry and exponential backoff
    async fn request_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(100 * 2_u64.pow(attempt));
                tokio::time::sleep(delay).await;
            }

            match self.make_request(texts).await {
                Ok(embeddings) => return Ok(embeddings),
                Err(e @ AppError::ConfigMissing { .. }) => return Err(e),
                Err(e) => {
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        error = %e,
                        "Embedding request failed, retrying"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            AppError::unavailable("embedder", "unknown error after retries")
        }))
    }

    async fn make_request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = self.api_key.as_ref().ok_or_else(|| AppError::ConfigMissing {
            key: "embedding.api_key".to_string(),
        })?;
        let url = format!("{}/embeddings", self.api_base);

        let request = EmbeddingRequest {
            input: texts.to_vec(),
            model: self.model.clone(),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::unavailable("embedder", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::bad_response(
                "embedder",
                format!("{}: {}", status, body),
            ));
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| AppError::bad_response("embedder", e))?;

        if result.data.len() != texts.len() {
            return Err(AppError::bad_response(
                "embedder",
                format!("expected {} vectors, got {}", texts.len(), result.data.len()),
            ));
        }

        Ok(result.data.into_iter().map(|e| e.embedding).collect())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.request_with_retry(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| AppError::bad_response("embedder", "empty response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(crate::EMBEDDING_BATCH_SIZE) {
            let embeddings = self.request_with_retry(batch).await?;
            all_embeddings.extend(embeddings);
        }

        Ok(all_embeddings)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic mock embedder for testing
///
/// Vectors are a stable function of the input text so cache tests and
/// similarity assertions behave reproducibly.
pub struct MockEmbedder {
    dimension: usize,
    calls: std::sync::atomic::AtomicUsize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Number of embed/embed_batch texts served so far
    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        // Simple seeded pseudo-vector; identical text yields identical output
        let mut state: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in text.bytes() {
            state ^= byte as u64;
            state = state.wrapping_mul(0x100_0000_01b3);
        }
        (0..self.dimension)
            .map(|i| {
                let mut x = state.wrapping_add(i as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
                x ^= x >> 33;
                ((x % 2000) as f32 / 1000.0) - 1.0
            })
            .collect()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls
            .fetch_add(texts.len(), std::sync::atomic::Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Cache-through wrapper around any embedder
///
/// Key: `embedding:<sha256(model ':' text)>`, TTL from configuration
/// (~24h). Batch calls preserve input order and only forward cache misses
/// to the inner embedder.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Arc<dyn CacheStore>,
    ttl_secs: u64,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, cache: Arc<dyn CacheStore>, ttl_secs: u64) -> Self {
        Self {
            inner,
            cache,
            ttl_secs,
        }
    }

    /// Embed a large document set in batches with a progress callback
    pub async fn embed_documents(
        &self,
        texts: &[String],
        mut progress: impl FnMut(usize, usize) + Send,
    ) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(crate::EMBEDDING_BATCH_SIZE) {
            let embedded = self.embed_batch(batch).await?;
            vectors.extend(embedded);
            progress(vectors.len(), texts.len());
        }
        Ok(vectors)
    }

    fn cache_key(&self, text: &str) -> String {
        keys::embedding(self.inner.model_name(), text)
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = self.cache_key(text);
        if let Some(cached) = self.cache.get_json::<Vec<f32>>(&key).await? {
            return Ok(cached);
        }

        let vector = self.inner.embed(text).await?;
        if let Err(e) = self.cache.put_json(&key, &vector, self.ttl_secs).await {
            warn!(error = %e, "Failed to cache embedding, continuing");
        }
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut missing: Vec<usize> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            let key = self.cache_key(text);
            match self.cache.get_json::<Vec<f32>>(&key).await? {
                Some(cached) => vectors[i] = Some(cached),
                None => missing.push(i),
            }
        }

        if !missing.is_empty() {
            let to_embed: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let embedded = self.inner.embed_batch(&to_embed).await?;
            for (&i, vector) in missing.iter().zip(embedded.into_iter()) {
                let key = self.cache_key(&texts[i]);
                if let Err(e) = self.cache.put_json(&key, &vector, self.ttl_secs).await {
                    warn!(error = %e, "Failed to cache embedding, continuing");
                }
                vectors[i] = Some(vector);
            }
        }

        Ok(vectors
            .into_iter()
            .map(|v| v.expect("all indices filled"))
            .collect())
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

/// Create a cache-through embedder based on configuration
pub fn create_embedder(
    config: &EmbeddingConfig,
    cache: Arc<dyn CacheStore>,
    cache_ttl_secs: u64,
) -> Arc<CachedEmbedder> {
    let inner: Arc<dyn Embedder> = Arc::new(HttpEmbedder::from_config(config));
    Arc::new(CachedEmbedder::new(inner, cache, cache_ttl_secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    #[test]
    fn test_cosine_identity() {
        let v = vec![0.3, -0.2, 0.9];
        let neg: Vec<f32> = v.iter().map(|x| -x).collect();
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&v, &neg) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_symmetry() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![-1.0, 0.5, 2.0];
        assert!((cosine_similarity(&a, &b) - cosine_similarity(&b, &a)).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_length_guard() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn test_mock_embedder_deterministic() {
        let embedder = MockEmbedder::new(32);
        let a = embedder.embed("same text").await.unwrap();
        let b = embedder.embed("same text").await.unwrap();
        let c = embedder.embed("other text").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }

    #[tokio::test]
    async fn test_cached_embedder_single_remote_call() {
        let inner = Arc::new(MockEmbedder::new(16));
        let cache = Arc::new(MemoryCache::new());
        let cached = CachedEmbedder::new(inner.clone(), cache, 3600);

        let first = cached.embed("hello").await.unwrap();
        let second = cached.embed("hello").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(inner.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cached_batch_preserves_order() {
        let inner = Arc::new(MockEmbedder::new(16));
        let cache = Arc::new(MemoryCache::new());
        let cached = CachedEmbedder::new(inner.clone(), cache, 3600);

        // Warm one of three entries
        cached.embed("b").await.unwrap();

        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let batch = cached.embed_batch(&texts).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0], cached.embed("a").await.unwrap());
        assert_eq!(batch[1], cached.embed("b").await.unwrap());
        // Only "a" and "c" went to the inner embedder for the batch
        assert_eq!(inner.call_count(), 3);
    }

    #[tokio::test]
    async fn test_embed_documents_progress() {
        let inner = Arc::new(MockEmbedder::new(8));
        let cache = Arc::new(MemoryCache::new());
        let cached = CachedEmbedder::new(inner, cache, 3600);

        let texts: Vec<String> = (0..5).map(|i| format!("doc {}", i)).collect();
        let mut reported = Vec::new();
        let vectors = cached
            .embed_documents(&texts, |done, total| reported.push((done, total)))
            .await
            .unwrap();
        assert_eq!(vectors.len(), 5);
        assert_eq!(reported.last(), Some(&(5, 5)));
    }
}
