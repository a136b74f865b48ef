//! Admin handlers: stats and full rebuild

use axum::{extract::State, Json};
use chrono::Utc;
use loreforge_common::errors::Result;
use loreforge_common::graph::GraphStats;
use loreforge_common::vector::VectorStoreStats;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct StatsResponse {
    #[serde(rename = "vectorDatabase")]
    pub vector_database: VectorStoreStats,

    #[serde(rename = "knowledgeGraph")]
    pub knowledge_graph: GraphStats,

    pub cache: CacheStats,

    pub timestamp: String,
}

#[derive(Serialize)]
pub struct CacheStats {
    #[serde(rename = "totalKeys")]
    pub total_keys: u64,
}

#[derive(Serialize)]
pub struct RebuildResponse {
    pub success: bool,
    pub message: String,
    pub timestamp: String,
}

/// Aggregate store statistics
pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let vector_database = state.vectors.stats().await?;

    let knowledge_graph = match &state.graph {
        Some(graph) => graph.stats().await?,
        None => GraphStats::default(),
    };

    let total_keys = state.cache.total_keys().await?;

    Ok(Json(StatsResponse {
        vector_database,
        knowledge_graph,
        cache: CacheStats { total_keys },
        timestamp: Utc::now().to_rfc3339(),
    }))
}

/// Clear the vector store, knowledge graph, and cache
pub async fn rebuild(State(state): State<AppState>) -> Result<Json<RebuildResponse>> {
    state.vectors.reset().await?;
    if let Some(graph) = &state.graph {
        graph.reset().await?;
    }
    state.cache.flush().await?;

    tracing::info!("All stores cleared for rebuild");

    Ok(Json(RebuildResponse {
        success: true,
        message: "Vector store, knowledge graph, and cache cleared. Re-run ingestion to rebuild."
            .to_string(),
        timestamp: Utc::now().to_rfc3339(),
    }))
}
