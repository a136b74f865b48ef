//! Second-stage reranking
//!
//! Provides:
//! - The `Reranker` trait over candidate reordering
//! - A Cohere/Jina-style HTTP client that degrades to the original order
//!   on any provider error
//! - Metadata boosting (type weights, recency decay) and multi-query
//!   score averaging

use crate::config::RerankConfig;
use crate::errors::{AppError, Result};
use crate::types::{DocumentType, SearchResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// Trait for cross-encoder reranking
///
/// Implementations never fail the enclosing request: a provider error
/// yields the candidates unchanged (truncated to `top_n`).
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<SearchResult>,
        top_n: Option<usize>,
    ) -> Vec<SearchResult>;
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_n: Option<usize>,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankItem>,
}

#[derive(Deserialize)]
struct RerankItem {
    index: usize,
    relevance_score: f32,
}

/// HTTP reranker against a Cohere/Jina-style `/rerank` endpoint
pub struct HttpReranker {
    client: reqwest::Client,
    api_base: Option<String>,
    api_key: Option<String>,
    model: String,
}

impl HttpReranker {
    pub fn from_config(config: &RerankConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_base: config.api_base.as_ref().map(|b| b.trim_end_matches('/').to_string()),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    async fn call_provider(
        &self,
        query: &str,
        candidates: &[SearchResult],
        top_n: Option<usize>,
    ) -> Result<Vec<SearchResult>> {
        let api_base = self.api_base.as_ref().ok_or_else(|| AppError::ConfigMissing {
            key: "rerank.api_base".to_string(),
        })?;
        let api_key = self.api_key.as_ref().ok_or_else(|| AppError::ConfigMissing {
            key: "rerank.api_key".to_string(),
        })?;

        let request = RerankRequest {
            model: &self.model,
            query,
            documents: candidates.iter().map(|c| c.text.as_str()).collect(),
            top_n,
        };

        let response = self
            .client
            .post(format!("{}/rerank", api_base))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::unavailable("reranker", e))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(AppError::bad_response("reranker", status));
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .map_err(|e| AppError::bad_response("reranker", e))?;

        let mut reranked = Vec::with_capacity(parsed.results.len());
        for item in parsed.results {
            let Some(candidate) = candidates.get(item.index) else {
                return Err(AppError::bad_response(
                    "reranker",
                    format!("index {} out of range", item.index),
                ));
            };
            let mut result = candidate.clone();
            result.score = item.relevance_score.clamp(0.0, 1.0);
            reranked.push(result);
        }

        reranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(reranked)
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<SearchResult>,
        top_n: Option<usize>,
    ) -> Vec<SearchResult> {
        if candidates.is_empty() {
            return candidates;
        }

        match self.call_provider(query, &candidates, top_n).await {
            Ok(reranked) => reranked,
            Err(e) => {
                warn!(error = %e, "Rerank failed, keeping original order");
                let mut passthrough = candidates;
                if let Some(n) = top_n {
                    passthrough.truncate(n);
                }
                passthrough
            }
        }
    }
}

/// Passthrough reranker, used when reranking is disabled
#[derive(Default)]
pub struct NoopReranker;

#[async_trait]
impl Reranker for NoopReranker {
    async fn rerank(
        &self,
        _query: &str,
        mut candidates: Vec<SearchResult>,
        top_n: Option<usize>,
    ) -> Vec<SearchResult> {
        if let Some(n) = top_n {
            candidates.truncate(n);
        }
        candidates
    }
}

/// Create a reranker based on configuration
///
/// Disabled or endpoint-less configurations get the passthrough reranker.
pub fn create_reranker(config: &RerankConfig) -> std::sync::Arc<dyn Reranker> {
    if config.enabled && config.api_base.is_some() {
        std::sync::Arc::new(HttpReranker::from_config(config))
    } else {
        std::sync::Arc::new(NoopReranker)
    }
}

/// Multiplicative type weights with a neutral default
#[derive(Debug, Clone)]
pub struct MetadataBoost {
    /// Per-type score multipliers
    pub type_weights: HashMap<DocumentType, f32>,

    /// Exponential recency decay per day (0 disables)
    pub recency_decay_per_day: f32,
}

impl Default for MetadataBoost {
    fn default() -> Self {
        Self {
            type_weights: HashMap::new(),
            recency_decay_per_day: 0.0,
        }
    }
}

impl MetadataBoost {
    /// Boost scores multiplicatively by type and recency, then re-sort
    pub fn apply(&self, mut results: Vec<SearchResult>, now: DateTime<Utc>) -> Vec<SearchResult> {
        for result in &mut results {
            let type_weight = self
                .type_weights
                .get(&result.doc_type)
                .copied()
                .unwrap_or(1.0);
            let age_days = (now - result.created_at).num_seconds().max(0) as f32 / 86_400.0;
            let recency = (-self.recency_decay_per_day * age_days).exp();
            result.score = (result.score * type_weight * recency).clamp(0.0, 1.0);
        }
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results
    }
}

/// Rerank against several query phrasings and average per-chunk scores
pub async fn rerank_multi(
    reranker: &dyn Reranker,
    queries: &[String],
    candidates: Vec<SearchResult>,
    top_n: Option<usize>,
) -> Vec<SearchResult> {
    if queries.len() <= 1 {
        let query = queries.first().map(String::as_str).unwrap_or_default();
        return reranker.rerank(query, candidates, top_n).await;
    }

    let mut totals: HashMap<Uuid, (SearchResult, f32, u32)> = HashMap::new();
    for query in queries {
        let scored = reranker.rerank(query, candidates.clone(), None).await;
        for result in scored {
            let entry = totals
                .entry(result.id)
                .or_insert_with(|| (result.clone(), 0.0, 0));
            entry.1 += result.score;
            entry.2 += 1;
        }
    }

    let mut averaged: Vec<SearchResult> = totals
        .into_values()
        .map(|(mut result, total, count)| {
            result.score = total / count.max(1) as f32;
            result
        })
        .collect();
    averaged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    if let Some(n) = top_n {
        averaged.truncate(n);
    }
    averaged
}
