//! Search handlers

use axum::{extract::State, Json};
use loreforge_common::errors::{AppError, Result};
use loreforge_common::types::SearchResult;
use loreforge_common::vector::WhereFilter;
use loreforge_retrieval::{SearchMode, SearchOptions};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use validator::Validate;

use crate::AppState;

/// Retrieval method: standard advanced search, HyDE, or multi-query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMethod {
    Standard,
    Hyde,
    Multi,
}

impl SearchMethod {
    fn as_str(&self) -> &'static str {
        match self {
            SearchMethod::Standard => "standard",
            SearchMethod::Hyde => "hyde",
            SearchMethod::Multi => "multi",
        }
    }
}

/// Search request
#[derive(Debug, Deserialize, Validate)]
pub struct SearchBody {
    #[validate(length(min = 1, max = 1000))]
    pub query: String,

    #[serde(default)]
    pub mode: SearchMode,

    #[serde(default = "default_limit")]
    pub limit: usize,

    #[serde(default = "default_rerank")]
    pub rerank: bool,

    #[serde(default = "default_method")]
    pub method: SearchMethod,

    #[serde(default)]
    pub filters: Option<WhereFilter>,

    /// Extra query phrasings for the multi-query method
    #[serde(default)]
    pub variants: Vec<String>,
}

fn default_limit() -> usize {
    10
}
fn default_rerank() -> bool {
    true
}
fn default_method() -> SearchMethod {
    SearchMethod::Standard
}

/// Search response
#[derive(Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub count: usize,
    pub query: String,
    pub method: String,
    pub mode: String,
}

/// Perform a search
pub async fn search(
    State(state): State<AppState>,
    Json(body): Json<SearchBody>,
) -> Result<Json<SearchResponse>> {
    let start = Instant::now();

    body.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        details: vec![e.to_string()],
    })?;

    let results = match body.method {
        SearchMethod::Standard => {
            let options = SearchOptions {
                mode: body.mode,
                filter: body.filters.clone(),
                limit: body.limit,
                rerank: body.rerank,
            };
            state.engine.advanced_search(&body.query, &options).await?
        }
        SearchMethod::Hyde => state.engine.hyde_search(&body.query, body.limit).await?,
        SearchMethod::Multi => {
            state
                .engine
                .multi_query_search(&body.query, &body.variants, body.limit)
                .await?
        }
    };

    let latency = start.elapsed();
    loreforge_common::metrics::record_search(
        latency.as_secs_f64(),
        body.mode.as_str(),
        body.method.as_str(),
        results.len(),
    );

    tracing::info!(
        query = %body.query,
        mode = body.mode.as_str(),
        method = body.method.as_str(),
        results = results.len(),
        latency_ms = latency.as_millis() as u64,
        "Search completed"
    );

    Ok(Json(SearchResponse {
        count: results.len(),
        results,
        query: body.query,
        method: body.method.as_str().to_string(),
        mode: body.mode.as_str().to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_defaults() {
        let body: SearchBody = serde_json::from_str(r#"{"query": "flow"}"#).unwrap();
        assert_eq!(body.mode, SearchMode::Hybrid);
        assert_eq!(body.limit, 10);
        assert!(body.rerank);
        assert_eq!(body.method, SearchMethod::Standard);
        assert!(body.filters.is_none());
    }

    #[test]
    fn test_body_explicit_method_and_mode() {
        let body: SearchBody = serde_json::from_str(
            r#"{"query": "flow", "mode": "semantic", "method": "hyde", "limit": 3, "rerank": false}"#,
        )
        .unwrap();
        assert_eq!(body.mode, SearchMode::Semantic);
        assert_eq!(body.method, SearchMethod::Hyde);
        assert_eq!(body.limit, 3);
        assert!(!body.rerank);
    }

    #[test]
    fn test_empty_query_fails_validation() {
        let body: SearchBody = serde_json::from_str(r#"{"query": ""}"#).unwrap();
        assert!(body.validate().is_err());
    }

    #[test]
    fn test_filters_deserialize() {
        let body: SearchBody = serde_json::from_str(
            r#"{"query": "q", "filters": {"operator": "Equal", "path": "doc_type", "value": "research"}}"#,
        )
        .unwrap();
        assert_eq!(
            body.filters,
            Some(WhereFilter::equal("doc_type", "research"))
        );
    }
}
