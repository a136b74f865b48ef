//! Chat model abstraction
//!
//! Provides:
//! - The `ChatModel` trait for one-shot and streaming completions
//! - An OpenAI-compatible client with SSE stream parsing
//! - A scripted mock for testing
//! - Tolerant extraction of JSON objects/arrays from model output

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use crate::types::{ChatMessage, Role};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

/// Channel capacity for streamed token chunks
const STREAM_BUFFER: usize = 64;

/// A function/tool made available to the model
#[derive(Debug, Clone, Serialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// JSON schema for the arguments object
    pub parameters: serde_json::Value,
}

/// A tool call the model asked for during generation
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One item of a streamed completion
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A text token chunk
    Token(String),
    /// A model-directed tool call, surfaced once its arguments are complete
    ToolCall(ToolCallRequest),
}

/// A chat completion request
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// System prompt, sent ahead of the messages
    pub system: Option<String>,

    /// Conversation messages in order
    pub messages: Vec<ChatMessage>,

    /// Sampling temperature
    pub temperature: Option<f32>,

    /// Output token cap
    pub max_tokens: Option<u32>,

    /// Functions the model may call during generation
    pub tools: Vec<ToolDeclaration>,
}

impl ChatRequest {
    /// Single-user-message request, the common case for utility calls
    pub fn prompt(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            messages: vec![ChatMessage::user(user)],
            ..Self::default()
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Trait for chat completion providers
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// One-shot completion returning the full response text
    async fn complete(&self, request: ChatRequest) -> Result<String>;

    /// Streaming completion
    ///
    /// Events arrive on the returned channel as the provider emits them:
    /// token chunks in order, and tool calls once their arguments finish
    /// streaming. Dropping the receiver cancels the producer task before
    /// it issues further reads.
    async fn stream(&self, request: ChatRequest) -> Result<mpsc::Receiver<Result<StreamEvent>>>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

// Wire types for the OpenAI-compatible chat completions API

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<DeltaToolCall>,
}

#[derive(Deserialize)]
struct DeltaToolCall {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    function: DeltaFunction,
}

#[derive(Default, Deserialize)]
struct DeltaFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// OpenAI-compatible chat model client
pub struct OpenAiChatModel {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
    max_retries: u32,
}

impl OpenAiChatModel {
    /// Build from configuration; a missing API key fails at first use
    pub fn from_config(config: &LlmConfig) -> Self {
        Self::with_model(config, config.model.clone())
    }

    /// Build against the configured intent model (falls back to `model`)
    pub fn intent_from_config(config: &LlmConfig) -> Self {
        let model = config
            .intent_model
            .clone()
            .unwrap_or_else(|| config.model.clone());
        Self::with_model(config, model)
    }

    fn with_model(config: &LlmConfig, model: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model,
            max_retries: config.max_retries,
        }
    }

    fn wire_messages(request: &ChatRequest) -> Vec<WireMessage> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(WireMessage {
                role: "system",
                content: system.clone(),
            });
        }
        for message in &request.messages {
            messages.push(WireMessage {
                role: match message.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::System => "system",
                },
                content: message.content.clone(),
            });
        }
        messages
    }

    async fn send(&self, request: &ChatRequest, stream: bool) -> Result<reqwest::Response> {
        let api_key = self.api_key.as_ref().ok_or_else(|| AppError::ConfigMissing {
            key: "llm.api_key".to_string(),
        })?;
        let url = format!("{}/chat/completions", self.api_base);

        let body = CompletionRequest {
            model: self.model.clone(),
            messages: Self::wire_messages(request),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            tools: request
                .tools
                .iter()
                .map(|tool| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect(),
            stream,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::unavailable("llm", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::bad_response(
                "llm",
                format!("{}: {}", status, body),
            ));
        }

        Ok(response)
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(&self, request: ChatRequest) -> Result<String> {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(200 * 2_u64.pow(attempt))).await;
            }

            match self.send(&request, false).await {
                Ok(response) => {
                    let parsed: CompletionResponse = response
                        .json()
                        .await
                        .map_err(|e| AppError::bad_response("llm", e))?;
                    return parsed
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.message.content)
                        .ok_or_else(|| AppError::bad_response("llm", "empty completion"));
                }
                Err(e @ AppError::ConfigMissing { .. }) => return Err(e),
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "Completion failed, retrying");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AppError::unavailable("llm", "unknown error after retries")))
    }

    async fn stream(&self, request: ChatRequest) -> Result<mpsc::Receiver<Result<StreamEvent>>> {
        let response = self.send(&request, true).await?;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            // SSE events can split across network chunks; keep a line buffer
            let mut pending = String::new();
            // Tool-call fragments accumulate until the stream ends
            let mut calls: std::collections::BTreeMap<usize, (String, String)> =
                std::collections::BTreeMap::new();

            'outer: while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(AppError::unavailable("llm", e))).await;
                        return;
                    }
                };

                pending.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = pending.find('\n') {
                    let line = pending[..newline].trim().to_string();
                    pending.drain(..=newline);

                    let Some(payload) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if payload == "[DONE]" {
                        break 'outer;
                    }

                    let Ok(parsed) = serde_json::from_str::<StreamResponse>(payload) else {
                        continue;
                    };
                    let Some(choice) = parsed.choices.into_iter().next() else {
                        continue;
                    };

                    if let Some(content) = choice.delta.content {
                        if tx.send(Ok(StreamEvent::Token(content))).await.is_err() {
                            // Receiver dropped: client disconnected
                            return;
                        }
                    }

                    for fragment in choice.delta.tool_calls {
                        let entry = calls.entry(fragment.index).or_default();
                        if let Some(name) = fragment.function.name {
                            entry.0.push_str(&name);
                        }
                        if let Some(arguments) = fragment.function.arguments {
                            entry.1.push_str(&arguments);
                        }
                    }
                }
            }

            // Surface completed tool calls after the text finishes
            for (_, (name, arguments)) in calls {
                if name.is_empty() {
                    continue;
                }
                let arguments = serde_json::from_str(&arguments)
                    .unwrap_or(serde_json::Value::Object(Default::default()));
                let call = StreamEvent::ToolCall(ToolCallRequest { name, arguments });
                if tx.send(Ok(call)).await.is_err() {
                    return;
                }
            }
        });

        Ok(rx)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Scripted mock model for testing
///
/// Responses are popped in order; when the script runs out, a fixed
/// fallback is returned. Scripted tool calls are emitted once each at
/// the end of a streamed response. Every request is recorded for
/// assertions.
pub struct MockChatModel {
    responses: std::sync::Mutex<std::collections::VecDeque<String>>,
    tool_calls: std::sync::Mutex<std::collections::VecDeque<ToolCallRequest>>,
    requests: std::sync::Mutex<Vec<ChatRequest>>,
    fallback: String,
}

impl MockChatModel {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into_iter().map(String::from).collect()),
            tool_calls: std::sync::Mutex::new(std::collections::VecDeque::new()),
            requests: std::sync::Mutex::new(Vec::new()),
            fallback: "mock response".to_string(),
        }
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    /// Queue a tool call for the next streamed response
    pub fn with_tool_call(self, name: &str, arguments: serde_json::Value) -> Self {
        self.tool_calls
            .lock()
            .expect("mock lock")
            .push_back(ToolCallRequest {
                name: name.to_string(),
                arguments,
            });
        self
    }

    /// Requests observed so far
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().expect("mock lock").clone()
    }

    /// Number of calls served (complete and stream)
    pub fn call_count(&self) -> usize {
        self.requests.lock().expect("mock lock").len()
    }

    fn next_response(&self, request: ChatRequest) -> String {
        self.requests.lock().expect("mock lock").push(request);
        self.responses
            .lock()
            .expect("mock lock")
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn complete(&self, request: ChatRequest) -> Result<String> {
        Ok(self.next_response(request))
    }

    async fn stream(&self, request: ChatRequest) -> Result<mpsc::Receiver<Result<StreamEvent>>> {
        let response = self.next_response(request);
        let tool_call = self.tool_calls.lock().expect("mock lock").pop_front();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(async move {
            // Stream word-by-word to exercise chunked consumption
            for word in response.split_inclusive(' ') {
                if tx.send(Ok(StreamEvent::Token(word.to_string()))).await.is_err() {
                    return;
                }
            }
            if let Some(call) = tool_call {
                let _ = tx.send(Ok(StreamEvent::ToolCall(call))).await;
            }
        });
        Ok(rx)
    }

    fn model_name(&self) -> &str {
        "mock-chat"
    }
}

/// Create the answer-generation chat model from configuration
pub fn create_chat_model(config: &LlmConfig) -> std::sync::Arc<dyn ChatModel> {
    std::sync::Arc::new(OpenAiChatModel::from_config(config))
}

/// Create the intent-classification chat model from configuration
pub fn create_intent_model(config: &LlmConfig) -> std::sync::Arc<dyn ChatModel> {
    std::sync::Arc::new(OpenAiChatModel::intent_from_config(config))
}

/// Extract the first JSON object embedded in model output
///
/// Models often wrap JSON in prose or code fences; scan from the first
/// `{` to the last `}` and parse best-effort.
pub fn extract_json_object(text: &str) -> Option<serde_json::Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Extract the first JSON array embedded in model output
pub fn extract_json_array(text: &str) -> Option<serde_json::Value> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Parse a typed value from prose-wrapped model JSON
pub fn parse_llm_json<T: DeserializeOwned>(text: &str) -> Option<T> {
    let value = extract_json_object(text).or_else(|| extract_json_array(text))?;
    serde_json::from_value(value).ok()
}
