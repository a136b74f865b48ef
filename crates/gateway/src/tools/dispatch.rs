//! Tool validation and execution
//!
//! Dispatch lifecycle: Parsed -> Validated -> Executing -> Success |
//! Failed. Validation enforces required parameters and coerces declared
//! types; undeclared parameters are dropped, never errored. Local tools
//! call the retrieval engine; remote tools POST the validated payload
//! with bearer credentials and a per-call timeout. Remote failures become
//! `{success: false, error}` outcomes without leaking HTTP status.

use super::format::format_outcome;
use super::parser::{parse_command, ParsedCommand};
use super::{LocalTool, ParamKind, ToolBinding, ToolDescriptor, ToolRegistry};
use loreforge_common::config::ToolsConfig;
use loreforge_common::errors::{AppError, Result};
use loreforge_common::types::ToolOutcome;
use loreforge_retrieval::{RetrievalEngine, SearchMode, SearchOptions};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Dispatch lifecycle state; Failed is terminal within a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Parsed,
    Validated,
    Executing,
    Success,
    Failed,
}

/// A formatted dispatch result for inclusion in the assistant response
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub outcome: ToolOutcome,
    pub formatted: String,
    pub state: DispatchState,
}

/// Validates and executes tools against their descriptors
pub struct ToolDispatcher {
    registry: ToolRegistry,
    engine: Arc<RetrievalEngine>,
    http: reqwest::Client,
    bearer_token: Option<String>,
    timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(config: &ToolsConfig, engine: Arc<RetrievalEngine>) -> Self {
        Self {
            registry: ToolRegistry::builtin(config),
            engine,
            http: reqwest::Client::new(),
            bearer_token: config.bearer_token.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Execute a tool by name with JSON parameters
    ///
    /// Validation failures are errors (the HTTP layer turns them into
    /// 400s); execution failures are non-success outcomes.
    pub async fn execute(&self, name: &str, parameters: Value) -> Result<DispatchResult> {
        let descriptor = self.registry.get(name).ok_or_else(|| AppError::NotFound {
            what: format!("tool '{}'", name),
        })?;

        let raw = match parameters {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => {
                return Err(AppError::Validation {
                    message: "parameters must be an object".to_string(),
                    details: vec!["parameters must be an object".to_string()],
                })
            }
        };

        let validated = validate_arguments(descriptor, raw)?;
        Ok(self.run(descriptor, validated).await)
    }

    /// Parse and execute a slash command line
    ///
    /// Unknown commands and validation failures become failed outcomes so
    /// a chat turn never aborts on a bad tool invocation.
    pub async fn execute_command(&self, line: &str) -> Option<DispatchResult> {
        let ParsedCommand { command, arguments } = parse_command(line)?;

        let Some(descriptor) = self.registry.by_command(&command) else {
            let outcome = ToolOutcome {
                tool: command.clone(),
                data: Value::Null,
                success: false,
                error: Some(format!("Unknown command: {}", command)),
            };
            return Some(DispatchResult {
                formatted: format_outcome(&command, &outcome),
                outcome,
                state: DispatchState::Failed,
            });
        };

        match validate_arguments(descriptor, arguments) {
            Ok(validated) => Some(self.run(descriptor, validated).await),
            Err(e) => {
                let outcome = ToolOutcome {
                    tool: descriptor.name.to_string(),
                    data: Value::Null,
                    success: false,
                    error: Some(e.to_string()),
                };
                Some(DispatchResult {
                    formatted: format_outcome(descriptor.name, &outcome),
                    outcome,
                    state: DispatchState::Failed,
                })
            }
        }
    }

    /// Run a validated dispatch to completion
    async fn run(&self, descriptor: &ToolDescriptor, arguments: Map<String, Value>) -> DispatchResult {
        let started = Instant::now();
        let mut state = DispatchState::Executing;

        let outcome = match &descriptor.binding {
            ToolBinding::Local(local) => self.run_local(*local, &arguments).await,
            ToolBinding::Remote(url) => self.run_remote(descriptor, url.as_deref(), &arguments).await,
        };

        let outcome = match outcome {
            Ok(data) => {
                state = DispatchState::Success;
                ToolOutcome {
                    tool: descriptor.name.to_string(),
                    data,
                    success: true,
                    error: None,
                }
            }
            Err(e) => {
                state = DispatchState::Failed;
                warn!(tool = descriptor.name, error = %e, "Tool dispatch failed");
                ToolOutcome {
                    tool: descriptor.name.to_string(),
                    data: Value::Null,
                    success: false,
                    // Short sentence only; never the raw HTTP status
                    error: Some(short_error(&e)),
                }
            }
        };

        let duration = started.elapsed().as_secs_f64();
        loreforge_common::metrics::record_tool(duration, descriptor.name, outcome.success);
        info!(
            tool = descriptor.name,
            success = outcome.success,
            latency_ms = (duration * 1000.0) as u64,
            "Tool dispatch finished"
        );

        DispatchResult {
            formatted: format_outcome(descriptor.name, &outcome),
            outcome,
            state,
        }
    }

    async fn run_local(&self, local: LocalTool, arguments: &Map<String, Value>) -> Result<Value> {
        let query = arguments
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let limit = arguments
            .get("limit")
            .and_then(Value::as_f64)
            .map(|l| l.max(1.0) as usize)
            .unwrap_or(10);

        let results = match local {
            LocalTool::SearchKnowledge => {
                let mode = arguments
                    .get("mode")
                    .and_then(Value::as_str)
                    .and_then(|m| serde_json::from_value(Value::String(m.to_string())).ok())
                    .unwrap_or(SearchMode::Hybrid);
                let options = SearchOptions {
                    mode,
                    limit,
                    rerank: true,
                    filter: None,
                };
                self.engine.advanced_search(&query, &options).await?
            }
            LocalTool::HydeSearch => self.engine.hyde_search(&query, limit).await?,
            LocalTool::MultiSearch => {
                let variants: Vec<String> = arguments
                    .get("variants")
                    .and_then(Value::as_array)
                    .map(|a| {
                        a.iter()
                            .filter_map(|v| v.as_str().map(String::from))
                            .collect()
                    })
                    .unwrap_or_default();
                self.engine.multi_query_search(&query, &variants, limit).await?
            }
        };

        Ok(serde_json::to_value(results)?)
    }

    async fn run_remote(
        &self,
        descriptor: &ToolDescriptor,
        url: Option<&str>,
        arguments: &Map<String, Value>,
    ) -> Result<Value> {
        let url = url.ok_or_else(|| AppError::ConfigMissing {
            key: "tools.endpoint_base".to_string(),
        })?;
        let bearer = self.bearer_token.as_ref().ok_or_else(|| AppError::ConfigMissing {
            key: "tools.bearer_token".to_string(),
        })?;

        let response = self
            .http
            .post(url)
            .bearer_auth(bearer)
            .timeout(self.timeout)
            .json(&Value::Object(arguments.clone()))
            .send()
            .await
            .map_err(|e| AppError::unavailable(descriptor.name, e))?;

        if !response.status().is_success() {
            return Err(AppError::bad_response(
                descriptor.name,
                response.status(),
            ));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| AppError::bad_response(descriptor.name, e))
    }
}

/// Enforce required parameters, coerce declared types, drop the rest
pub fn validate_arguments(
    descriptor: &ToolDescriptor,
    mut raw: Map<String, Value>,
) -> Result<Map<String, Value>> {
    // `input` and `query` alias each other: positional tokens fold into
    // `input`, while search-like tools declare `query`
    alias_argument(descriptor, &mut raw, "query", "input");
    alias_argument(descriptor, &mut raw, "input", "query");

    let mut validated = Map::new();
    let mut missing: Vec<String> = Vec::new();

    for parameter in &descriptor.parameters {
        match raw.remove(parameter.name) {
            Some(value) => {
                let coerced = coerce(parameter.kind, value).ok_or_else(|| AppError::Validation {
                    message: format!("Invalid value for parameter: {}", parameter.name),
                    details: vec![format!("Invalid value for parameter: {}", parameter.name)],
                })?;
                validated.insert(parameter.name.to_string(), coerced);
            }
            None if parameter.required => {
                missing.push(format!("Missing required parameter: {}", parameter.name));
            }
            None => {}
        }
    }

    if !missing.is_empty() {
        return Err(AppError::Validation {
            message: format!("Invalid parameters for {}", descriptor.name),
            details: missing,
        });
    }

    // Anything left in `raw` is undeclared and silently dropped
    Ok(validated)
}

fn alias_argument(
    descriptor: &ToolDescriptor,
    raw: &mut Map<String, Value>,
    declared: &str,
    alias: &str,
) {
    let declares = descriptor.parameters.iter().any(|p| p.name == declared);
    let declares_alias = descriptor.parameters.iter().any(|p| p.name == alias);
    if declares && !declares_alias && !raw.contains_key(declared) {
        if let Some(value) = raw.remove(alias) {
            raw.insert(declared.to_string(), value);
        }
    }
}

/// Coerce a raw value to the declared kind
fn coerce(kind: ParamKind, value: Value) -> Option<Value> {
    match (kind, value) {
        (ParamKind::String, Value::String(s)) => Some(Value::String(s)),
        (ParamKind::String, Value::Number(n)) => Some(Value::String(n.to_string())),
        (ParamKind::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
        (ParamKind::Number, Value::Number(n)) => Some(Value::Number(n)),
        (ParamKind::Number, Value::String(s)) => {
            let parsed: f64 = s.trim().parse().ok()?;
            serde_json::Number::from_f64(parsed).map(Value::Number)
        }
        (ParamKind::Array, Value::Array(items)) => Some(Value::Array(items)),
        (ParamKind::Array, Value::String(s)) => {
            // Comma-separated first, whitespace-separated otherwise
            let parts: Vec<Value> = if s.contains(',') {
                s.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(|p| Value::String(p.to_string()))
                    .collect()
            } else {
                s.split_whitespace()
                    .map(|p| Value::String(p.to_string()))
                    .collect()
            };
            Some(Value::Array(parts))
        }
        _ => None,
    }
}

fn short_error(error: &AppError) -> String {
    match error {
        AppError::ConfigMissing { key } => format!("Tool endpoint not configured ({})", key),
        AppError::RemoteUnavailable { service, .. } => format!("{} did not respond", service),
        AppError::RemoteBadResponse { service, .. } => format!("{} returned an error", service),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loreforge_common::cache::MemoryCache;
    use loreforge_common::embeddings::MockEmbedder;
    use loreforge_common::llm::MockChatModel;
    use loreforge_common::rerank::NoopReranker;
    use loreforge_common::types::{Chunk, DocumentType};
    use loreforge_common::vector::{MemoryVectorStore, VectorStore};
    use loreforge_retrieval::{QueryRewriter, RetrievalConfig};
    use chrono::Utc;

    async fn make_dispatcher() -> ToolDispatcher {
        let vectors = Arc::new(MemoryVectorStore::new());
        let chunk = Chunk {
            id: Chunk::make_id("CORE/flow.md", 0),
            text: "flow states and deep work".to_string(),
            source: "CORE/flow.md".to_string(),
            section: "Flow".to_string(),
            chunk_index: 0,
            total_chunks: 1,
            doc_type: DocumentType::Documentation,
            tags: vec![],
            created_at: Utc::now(),
        };
        vectors
            .upsert_batch(&[(chunk, vec![0.5f32; 8])])
            .await
            .unwrap();

        let cache = Arc::new(MemoryCache::new());
        let llm = Arc::new(MockChatModel::new(vec![]).with_fallback("flow deep work"));
        let rewriter = QueryRewriter::new(llm.clone(), cache.clone(), 3600);
        let engine = Arc::new(RetrievalEngine::new(
            Arc::new(MockEmbedder::new(8)),
            vectors,
            None,
            cache,
            llm,
            Arc::new(NoopReranker),
            rewriter,
            RetrievalConfig::default(),
        ));

        ToolDispatcher::new(&ToolsConfig::default(), engine)
    }

    #[tokio::test]
    async fn test_missing_required_parameter_named_in_details() {
        let dispatcher = make_dispatcher().await;
        let result = dispatcher
            .execute("search_knowledge", serde_json::json!({}))
            .await;
        match result {
            Err(AppError::Validation { details, .. }) => {
                assert!(details
                    .iter()
                    .any(|d| d == "Missing required parameter: query"));
            }
            other => panic!("expected validation error, got {:?}", other.map(|r| r.outcome)),
        }
    }

    #[tokio::test]
    async fn test_excess_parameters_ignored() {
        let dispatcher = make_dispatcher().await;
        let result = dispatcher
            .execute(
                "search_knowledge",
                serde_json::json!({"query": "flow", "bogus": true, "limit": "2"}),
            )
            .await
            .unwrap();
        assert!(result.outcome.success);
        assert_eq!(result.state, DispatchState::Success);
    }

    #[tokio::test]
    async fn test_unknown_tool_not_found() {
        let dispatcher = make_dispatcher().await;
        let result = dispatcher.execute("frobnicate", serde_json::json!({})).await;
        assert!(matches!(result, Err(AppError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_command_line_input_aliases_query() {
        let dispatcher = make_dispatcher().await;
        let result = dispatcher
            .execute_command("/search --mode=semantic flow")
            .await
            .unwrap();
        assert!(result.outcome.success, "error: {:?}", result.outcome.error);
        assert_eq!(result.outcome.tool, "search_knowledge");
    }

    #[tokio::test]
    async fn test_unknown_command_is_failed_outcome() {
        let dispatcher = make_dispatcher().await;
        let result = dispatcher.execute_command("/warp 9").await.unwrap();
        assert!(!result.outcome.success);
        assert_eq!(result.state, DispatchState::Failed);
        assert!(result.outcome.error.as_deref().unwrap().contains("/warp"));
    }

    #[tokio::test]
    async fn test_remote_without_endpoint_fails_without_http_status() {
        let dispatcher = make_dispatcher().await;
        let result = dispatcher
            .execute("clos_analyze", serde_json::json!({"input": "routine"}))
            .await
            .unwrap();
        assert!(!result.outcome.success);
        let error = result.outcome.error.unwrap();
        assert!(error.contains("not configured"));
        assert!(!error.contains("404"));
    }

    #[test]
    fn test_coercion_rules() {
        assert_eq!(
            coerce(ParamKind::Number, Value::String("3".into())),
            Some(serde_json::json!(3.0))
        );
        assert_eq!(
            coerce(ParamKind::Array, Value::String("a, b,c".into())),
            Some(serde_json::json!(["a", "b", "c"]))
        );
        assert_eq!(
            coerce(ParamKind::Array, Value::String("a b c".into())),
            Some(serde_json::json!(["a", "b", "c"]))
        );
        assert_eq!(
            coerce(ParamKind::String, Value::Number(7.into())),
            Some(Value::String("7".into()))
        );
        assert_eq!(coerce(ParamKind::Number, Value::String("nope".into())), None);
    }
}
