//! LoreForge API Gateway
//!
//! The main entry point for all external API requests.
//! Handles:
//! - Streaming chat over the knowledge base
//! - Search (standard, HyDE, multi-query)
//! - Tool execution
//! - Admin stats and rebuild
//! - Rate limiting and observability (logging, metrics, request ids)

mod chat;
mod handlers;
mod middleware;
mod tools;

use axum::{
    routing::{get, post},
    Router,
};
use loreforge_common::{
    cache::{self, CacheStore},
    config::AppConfig,
    embeddings,
    errors::Result,
    graph::{self, GraphStore},
    llm, metrics, rerank,
    vector::{self, VectorStore},
    VERSION,
};
use loreforge_retrieval::{QueryRewriter, RetrievalConfig, RetrievalEngine};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use chat::ChatOrchestrator;
use middleware::rate_limit::{create_rate_limiter, rate_limit_middleware};
use tools::ToolDispatcher;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub cache: Arc<dyn CacheStore>,
    pub vectors: Arc<dyn VectorStore>,
    pub graph: Option<Arc<dyn GraphStore>>,
    pub engine: Arc<RetrievalEngine>,
    pub orchestrator: Arc<ChatOrchestrator>,
    pub tools: Arc<ToolDispatcher>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        anyhow::anyhow!(e)
    })?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.observability.log_level.clone()));
    if config.observability.json_logging {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }

    info!("Starting LoreForge API Gateway v{}", VERSION);

    // Initialize metrics
    metrics::register_metrics();

    // Wire up providers and build shared state
    let config = Arc::new(config);
    let state = build_state(config.clone()).await?;

    // Build the router
    let app = create_router(state, &config);

    // Start the server
    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Build all provider handles and the shared state
///
/// Providers with missing endpoints fall back to in-memory
/// implementations (or fail lazily at first use for credentialed
/// clients), keeping the process bootable for partial operation.
async fn build_state(config: Arc<AppConfig>) -> Result<AppState> {
    let cache = cache::create_cache(&config.cache).await?;
    let embedder = embeddings::create_embedder(
        &config.embedding,
        cache.clone(),
        config.cache.embedding_ttl_secs,
    );
    let vectors = vector::create_vector_store(&config.vector_store, &config.embedding.model)?;
    let graph = graph::create_graph_store(&config.graph_store).await?;
    let llm_client = llm::create_chat_model(&config.llm);
    let intent_client = llm::create_intent_model(&config.llm);
    let reranker = rerank::create_reranker(&config.rerank);

    let rewriter = QueryRewriter::new(
        llm_client.clone(),
        cache.clone(),
        config.cache.rewrite_ttl_secs,
    );
    let engine = Arc::new(RetrievalEngine::new(
        embedder,
        vectors.clone(),
        graph.clone(),
        cache.clone(),
        llm_client.clone(),
        reranker,
        rewriter,
        RetrievalConfig {
            search_ttl_secs: config.cache.search_ttl_secs,
            ..RetrievalConfig::default()
        },
    ));

    let tools = Arc::new(ToolDispatcher::new(&config.tools, engine.clone()));
    let orchestrator = Arc::new(ChatOrchestrator::new(
        llm_client,
        intent_client,
        engine.clone(),
        tools.clone(),
        config.chat.clone(),
    ));

    Ok(AppState {
        config,
        cache,
        vectors,
        graph,
        engine,
        orchestrator,
        tools,
    })
}

/// Create the main application router
fn create_router(state: AppState, config: &AppConfig) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // API routes
    let api_routes = Router::new()
        .route("/chat", post(handlers::chat::chat))
        .route("/search", post(handlers::search::search))
        .route("/tools/execute", post(handlers::tools::execute))
        .route("/admin/stats", get(handlers::admin::stats))
        .route("/admin/rebuild", post(handlers::admin::rebuild));

    // Global token bucket ahead of every route
    let limiter = create_rate_limiter(
        config.rate_limit.global_requests_per_second,
        config.rate_limit.burst,
    );
    let rate_layer = axum::middleware::from_fn(move |request, next| {
        let limiter = limiter.clone();
        async move { rate_limit_middleware(limiter, request, next).await }
    });

    // Compose the app
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .layer(rate_layer)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
