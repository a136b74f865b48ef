//! Health check handlers

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub cache: CheckResult,
    pub vector_store: CheckResult,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn check<T>(result: Result<T, impl std::fmt::Display>, latency_ms: u64) -> CheckResult {
    match result {
        Ok(_) => CheckResult {
            status: "up".to_string(),
            latency_ms: Some(latency_ms),
            error: None,
        },
        Err(e) => CheckResult {
            status: "down".to_string(),
            latency_ms: None,
            error: Some(e.to_string()),
        },
    }
}

/// Liveness probe - always returns healthy if the server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

/// Readiness probe - checks the cache and vector store
pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    let start = std::time::Instant::now();
    let cache_check = check(
        state.cache.ping().await,
        start.elapsed().as_millis() as u64,
    );

    let start = std::time::Instant::now();
    let vector_check = check(
        state.vectors.stats().await,
        start.elapsed().as_millis() as u64,
    );

    let all_healthy = cache_check.status == "up" && vector_check.status == "up";

    Json(ReadyResponse {
        status: if all_healthy { "ready" } else { "not_ready" }.to_string(),
        checks: HealthChecks {
            cache: cache_check,
            vector_store: vector_check,
        },
    })
}
