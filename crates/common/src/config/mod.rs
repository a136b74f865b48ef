//! Configuration management for LoreForge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with LOREFORGE__)
//! - Configuration files (config/default.toml, config/<env>.toml)
//! - Default values
//!
//! Credentials and endpoints are optional at load time; a missing value
//! surfaces as `ConfigMissing` at first use so the process stays bootable
//! for partial operation.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Chat model configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Embedding endpoint configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Rerank endpoint configuration
    #[serde(default)]
    pub rerank: RerankConfig,

    /// Vector store configuration
    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    /// Graph store configuration
    #[serde(default)]
    pub graph_store: GraphStoreConfig,

    /// Cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Remote tool endpoints
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Chat orchestrator configuration
    #[serde(default)]
    pub chat: ChatConfig,

    /// Ingestion pipeline configuration
    #[serde(default)]
    pub ingestion: IngestionConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// OpenAI-compatible API base URL
    #[serde(default = "default_llm_base")]
    pub api_base: String,

    /// API key; checked at first use
    pub api_key: Option<String>,

    /// Model for answer generation
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Model for short classification calls (falls back to `model`)
    pub intent_model: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries for one-shot completions
    #[serde(default = "default_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// OpenAI-compatible API base URL
    #[serde(default = "default_llm_base")]
    pub api_base: String,

    /// API key; checked at first use
    pub api_key: Option<String>,

    /// Embedding model identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RerankConfig {
    /// Rerank API base URL (Cohere/Jina-style `/rerank`)
    pub api_base: Option<String>,

    /// API key; checked at first use
    pub api_key: Option<String>,

    /// Rerank model identifier
    #[serde(default = "default_rerank_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_rerank_timeout")]
    pub timeout_secs: u64,

    /// Enable reranking globally
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorStoreConfig {
    /// Vector store base URL; absent means in-memory store
    pub url: Option<String>,

    /// API key for the vector store, if required
    pub api_key: Option<String>,

    /// Collection (class) name for knowledge chunks
    #[serde(default = "default_class_name")]
    pub class_name: String,

    /// Whether the backend accepts compound Or filters over sources.
    /// When false the retrieval engine batches per-source queries instead.
    #[serde(default = "default_enabled")]
    pub or_filter_pushdown: bool,

    /// Request timeout in seconds
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GraphStoreConfig {
    /// Bolt URI (e.g. bolt://localhost:7687); absent means in-memory store
    pub uri: Option<String>,

    /// Username
    pub user: Option<String>,

    /// Password
    pub password: Option<String>,

    /// Enable the graph store and the `graph` search mode
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Redis URL; absent means in-memory cache
    pub url: Option<String>,

    /// Key prefix for namespacing
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// TTL for cached search result sets in seconds
    #[serde(default = "default_search_ttl")]
    pub search_ttl_secs: u64,

    /// TTL for cached embeddings in seconds
    #[serde(default = "default_embedding_ttl")]
    pub embedding_ttl_secs: u64,

    /// TTL for cached query rewrites in seconds
    #[serde(default = "default_rewrite_ttl")]
    pub rewrite_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per window, per identifier
    #[serde(default = "default_rate_limit")]
    pub requests_per_window: u32,

    /// Window length in seconds
    #[serde(default = "default_rate_window")]
    pub window_secs: u64,

    /// Process-global requests per second (token bucket)
    #[serde(default = "default_global_rps")]
    pub global_requests_per_second: u32,

    /// Process-global burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolsConfig {
    /// Base URL for remote analytic tool endpoints
    pub endpoint_base: Option<String>,

    /// Bearer credential for remote tool calls; checked at dispatch
    pub bearer_token: Option<String>,

    /// Per-call timeout in seconds
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatConfig {
    /// System persona; a deployment concern, not a core invariant
    #[serde(default = "default_persona")]
    pub persona: String,

    /// Retrieval results folded into the context block
    #[serde(default = "default_context_limit")]
    pub context_limit: usize,

    /// Maximum tokens for the streamed answer
    #[serde(default = "default_max_answer_tokens")]
    pub max_answer_tokens: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestionConfig {
    /// Knowledge base directory
    #[serde(default = "default_knowledge_dir")]
    pub knowledge_dir: String,

    /// Token budget per chunk
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Overlap between adjacent chunks in tokens
    #[serde(default = "default_overlap")]
    pub overlap: usize,

    /// Delay between per-document graph extractions in milliseconds
    #[serde(default = "default_graph_throttle")]
    pub graph_throttle_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logging: bool,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 3100 }
fn default_request_timeout() -> u64 { 60 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_llm_base() -> String { "https://api.openai.com/v1".to_string() }
fn default_llm_model() -> String { "gpt-4o-mini".to_string() }
fn default_llm_timeout() -> u64 { 60 }
fn default_retries() -> u32 { 3 }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_embedding_timeout() -> u64 { 30 }
fn default_rerank_model() -> String { "rerank-v3.5".to_string() }
fn default_rerank_timeout() -> u64 { 15 }
fn default_class_name() -> String { "KnowledgeChunk".to_string() }
fn default_store_timeout() -> u64 { 20 }
fn default_key_prefix() -> String { "loreforge".to_string() }
fn default_search_ttl() -> u64 { 3600 }
fn default_embedding_ttl() -> u64 { 86_400 }
fn default_rewrite_ttl() -> u64 { 3600 }
fn default_rate_limit() -> u32 { 60 }
fn default_rate_window() -> u64 { 60 }
fn default_global_rps() -> u32 { 50 }
fn default_burst() -> u32 { 100 }
fn default_enabled() -> bool { true }
fn default_tool_timeout() -> u64 { 30 }
fn default_context_limit() -> usize { 8 }
fn default_max_answer_tokens() -> u32 { 2048 }
fn default_knowledge_dir() -> String { "./knowledgebase".to_string() }
fn default_max_tokens() -> usize { 600 }
fn default_overlap() -> usize { 100 }
fn default_graph_throttle() -> u64 { 1000 }
fn default_log_level() -> String { "info".to_string() }
fn default_service_name() -> String { "loreforge".to_string() }

fn default_persona() -> String {
    "You are a knowledgeable assistant answering questions about a personal \
     knowledge base. Ground every claim in the supplied context and keep \
     answers direct."
        .to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: default_llm_base(),
            api_key: None,
            model: default_llm_model(),
            intent_model: None,
            timeout_secs: default_llm_timeout(),
            max_retries: default_retries(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_base: default_llm_base(),
            api_key: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_retries(),
        }
    }
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            api_base: None,
            api_key: None,
            model: default_rerank_model(),
            timeout_secs: default_rerank_timeout(),
            enabled: default_enabled(),
        }
    }
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            class_name: default_class_name(),
            or_filter_pushdown: default_enabled(),
            timeout_secs: default_store_timeout(),
        }
    }
}

impl Default for GraphStoreConfig {
    fn default() -> Self {
        Self {
            uri: None,
            user: None,
            password: None,
            enabled: default_enabled(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: None,
            key_prefix: default_key_prefix(),
            search_ttl_secs: default_search_ttl(),
            embedding_ttl_secs: default_embedding_ttl(),
            rewrite_ttl_secs: default_rewrite_ttl(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: default_rate_limit(),
            window_secs: default_rate_window(),
            global_requests_per_second: default_global_rps(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            endpoint_base: None,
            bearer_token: None,
            timeout_secs: default_tool_timeout(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            persona: default_persona(),
            context_limit: default_context_limit(),
            max_answer_tokens: default_max_answer_tokens(),
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            knowledge_dir: default_knowledge_dir(),
            max_tokens: default_max_tokens(),
            overlap: default_overlap(),
            graph_throttle_ms: default_graph_throttle(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: false,
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("LOREFORGE_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with LOREFORGE__ prefix
            // e.g., LOREFORGE__SERVER__PORT=3101
            .add_source(
                Environment::with_prefix("LOREFORGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            rerank: RerankConfig::default(),
            vector_store: VectorStoreConfig::default(),
            graph_store: GraphStoreConfig::default(),
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
            tools: ToolsConfig::default(),
            chat: ChatConfig::default(),
            ingestion: IngestionConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
