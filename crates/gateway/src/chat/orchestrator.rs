//! Chat turn orchestration
//!
//! Per-turn ordering: intent -> retrieval -> tools -> prompt -> stream.
//! Retrieval and tool failures never fail the turn: retrieval errors are
//! logged and the answer opens with a degradation note; tool errors ride
//! along as non-success tool results.

use super::intent::{classify_intent, Intent};
use super::prompt::{build_system_prompt, citations_for};
use crate::tools::ToolDispatcher;
use loreforge_common::config::ChatConfig;
use loreforge_common::errors::{AppError, Result};
use loreforge_common::llm::{ChatModel, ChatRequest, StreamEvent};
use loreforge_common::metrics::TurnMetrics;
use loreforge_common::types::{ChatMessage, Citation, Role, SearchResult, ToolOutcome};
use loreforge_retrieval::{RetrievalEngine, SearchOptions};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

const NOTE_DEGRADED: &str =
    "(Knowledge-base retrieval was unavailable for this answer, so it may lack citations.) ";

/// Everything resolved before streaming begins
pub struct TurnSetup {
    pub citations: Vec<Citation>,
    pub tool_outcomes: Vec<ToolOutcome>,
}

/// The chat orchestrator
pub struct ChatOrchestrator {
    llm: Arc<dyn ChatModel>,
    intent_llm: Arc<dyn ChatModel>,
    engine: Arc<RetrievalEngine>,
    tools: Arc<ToolDispatcher>,
    config: ChatConfig,
}

impl ChatOrchestrator {
    pub fn new(
        llm: Arc<dyn ChatModel>,
        intent_llm: Arc<dyn ChatModel>,
        engine: Arc<RetrievalEngine>,
        tools: Arc<ToolDispatcher>,
        config: ChatConfig,
    ) -> Self {
        Self {
            llm,
            intent_llm,
            engine,
            tools,
            config,
        }
    }

    /// Run one turn and stream the assistant's answer
    ///
    /// The returned setup carries citations and tool outcomes resolved
    /// before generation; the receiver yields token chunks in order.
    pub async fn run_turn(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<(TurnSetup, mpsc::Receiver<Result<String>>)> {
        let user_message = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .ok_or_else(|| AppError::validation("messages must contain a user message"))?;

        let mut turn_metrics = TurnMetrics::start();

        // 1. Intent
        let classification = classify_intent(self.intent_llm.as_ref(), &user_message).await;
        turn_metrics.intent(match classification.intent {
            Intent::Search => "search",
            Intent::Tool => "tool",
            Intent::Conversational => "conversational",
            Intent::Command => "command",
        });

        // 2. Retrieval; errors degrade the turn instead of failing it
        let mut degraded = false;
        let context: Vec<SearchResult> = if classification.needs_search {
            let options = SearchOptions {
                mode: classification.search_mode,
                filter: None,
                limit: self.config.context_limit,
                rerank: true,
            };
            match self.engine.advanced_search(&user_message, &options).await {
                Ok(results) => results,
                Err(e) => {
                    warn!(error = %e, "Retrieval failed, continuing without context");
                    degraded = true;
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        // 3. Slash-command tools run before prompt assembly
        let mut tool_outcomes: Vec<ToolOutcome> = Vec::new();
        let mut tool_sections: Vec<String> = Vec::new();
        if user_message.trim_start().starts_with('/') {
            if let Some(result) = self.tools.execute_command(user_message.trim()).await {
                tool_sections.push(result.formatted.clone());
                tool_outcomes.push(result.outcome);
            }
        }

        // 4. Prompt
        let system_prompt =
            build_system_prompt(&self.config.persona, &context, &tool_sections);
        let citations = citations_for(&context);

        info!(
            intent = ?classification.intent,
            context_results = context.len(),
            tools = tool_outcomes.len(),
            degraded,
            "Turn assembled"
        );

        // 5. Stream, with the registry declared for model-directed calls
        let declarations = self
            .tools
            .registry()
            .all()
            .iter()
            .map(|descriptor| descriptor.declaration())
            .collect();
        let request = ChatRequest {
            system: Some(system_prompt),
            messages,
            temperature: None,
            max_tokens: Some(self.config.max_answer_tokens),
            tools: declarations,
        };
        let upstream = self.llm.stream(request).await?;

        let note = (degraded && classification.needs_search).then(|| NOTE_DEGRADED.to_string());
        let receiver = relay_stream(upstream, note, self.tools.clone(), turn_metrics);

        Ok((
            TurnSetup {
                citations,
                tool_outcomes,
            },
            receiver,
        ))
    }
}

/// Forward the model stream, optionally prefixing a degradation note and
/// executing model-directed tool calls in-turn so the client sees one
/// continuous stream. Dropping the returned receiver stops the relay,
/// which in turn drops the upstream receiver and cancels the producer.
fn relay_stream(
    mut upstream: mpsc::Receiver<Result<StreamEvent>>,
    note: Option<String>,
    tools: Arc<ToolDispatcher>,
    turn_metrics: TurnMetrics,
) -> mpsc::Receiver<Result<String>> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        if let Some(note) = note {
            if tx.send(Ok(note)).await.is_err() {
                return;
            }
        }
        while let Some(event) = upstream.recv().await {
            let chunk = match event {
                Ok(StreamEvent::Token(token)) => Ok(token),
                Ok(StreamEvent::ToolCall(call)) => {
                    let formatted = match tools.execute(&call.name, call.arguments).await {
                        Ok(result) => result.formatted,
                        Err(e) => format!("**{}** failed: {}", call.name, e),
                    };
                    Ok(format!("\n\n{}\n", formatted))
                }
                Err(e) => Err(e),
            };
            if tx.send(chunk).await.is_err() {
                return;
            }
        }
        turn_metrics.finish();
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use loreforge_common::cache::MemoryCache;
    use loreforge_common::config::ToolsConfig;
    use loreforge_common::embeddings::MockEmbedder;
    use loreforge_common::llm::MockChatModel;
    use loreforge_common::rerank::NoopReranker;
    use loreforge_common::types::{Chunk, DocumentType};
    use loreforge_common::vector::{MemoryVectorStore, VectorStore};
    use loreforge_retrieval::{QueryRewriter, RetrievalConfig};
    use chrono::Utc;

    const INTENT_SEARCH: &str =
        r#"{"intent": "search", "needsSearch": true, "searchMode": "hybrid", "confidence": 0.9}"#;
    const INTENT_CHAT: &str =
        r#"{"intent": "conversational", "needsSearch": false, "confidence": 0.9}"#;

    async fn make_orchestrator(
        answer_llm: Arc<MockChatModel>,
        intent_llm: Arc<MockChatModel>,
        rewrite_llm: Arc<MockChatModel>,
    ) -> ChatOrchestrator {
        let vectors = Arc::new(MemoryVectorStore::new());
        let chunk = Chunk {
            id: Chunk::make_id("CORE/flow.md", 0),
            text: "Flow\n\nflow states and deep work".to_string(),
            source: "CORE/flow.md".to_string(),
            section: "Flow".to_string(),
            chunk_index: 0,
            total_chunks: 1,
            doc_type: DocumentType::Documentation,
            tags: vec![],
            created_at: Utc::now(),
        };
        vectors
            .upsert_batch(&[(chunk, vec![0.4f32; 8])])
            .await
            .unwrap();

        let cache = Arc::new(MemoryCache::new());
        let rewriter = QueryRewriter::new(rewrite_llm, cache.clone(), 3600);
        let engine = Arc::new(RetrievalEngine::new(
            Arc::new(MockEmbedder::new(8)),
            vectors,
            None,
            cache,
            answer_llm.clone(),
            Arc::new(NoopReranker),
            rewriter,
            RetrievalConfig::default(),
        ));
        let tools = Arc::new(ToolDispatcher::new(&ToolsConfig::default(), engine.clone()));

        ChatOrchestrator::new(
            answer_llm,
            intent_llm,
            engine,
            tools,
            ChatConfig::default(),
        )
    }

    async fn collect(mut rx: mpsc::Receiver<Result<String>>) -> String {
        let mut out = String::new();
        while let Some(chunk) = rx.recv().await {
            out.push_str(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_search_turn_streams_answer() {
        let answer = Arc::new(MockChatModel::new(vec!["Flow is a state of focus."]));
        let intent = Arc::new(MockChatModel::new(vec![INTENT_SEARCH]));
        let rewrite = Arc::new(MockChatModel::new(vec!["flow deep work"]));
        let orchestrator = make_orchestrator(answer.clone(), intent, rewrite).await;

        let (setup, rx) = orchestrator
            .run_turn(vec![ChatMessage::user("what is flow?")])
            .await
            .unwrap();

        assert!(!setup.citations.is_empty());
        assert_eq!(setup.citations[0].source, "CORE/flow.md");
        assert_eq!(collect(rx).await, "Flow is a state of focus.");

        // Context block landed in the answer model's system prompt
        let requests = answer.requests();
        let system = requests.last().unwrap().system.clone().unwrap();
        assert!(system.contains("## Retrieved Context"));
        assert!(system.contains("[source:section]"));
    }

    #[tokio::test]
    async fn test_conversational_turn_skips_retrieval() {
        let answer = Arc::new(MockChatModel::new(vec!["You're welcome!"]));
        let intent = Arc::new(MockChatModel::new(vec![INTENT_CHAT]));
        let rewrite = Arc::new(MockChatModel::new(vec![]));
        let orchestrator = make_orchestrator(answer.clone(), intent, rewrite.clone()).await;

        let (setup, rx) = orchestrator
            .run_turn(vec![ChatMessage::user("thanks!")])
            .await
            .unwrap();

        assert!(setup.citations.is_empty());
        assert_eq!(collect(rx).await, "You're welcome!");
        let requests = answer.requests();
        let system = requests.last().unwrap().system.clone().unwrap();
        assert!(!system.contains("## Retrieved Context"));
        // No rewrite happened
        assert_eq!(rewrite.call_count(), 0);
    }

    #[tokio::test]
    async fn test_command_turn_includes_tool_results() {
        let answer = Arc::new(MockChatModel::new(vec!["Here are your results."]));
        let intent = Arc::new(MockChatModel::new(vec![INTENT_CHAT]));
        let rewrite = Arc::new(MockChatModel::new(vec!["flow deep work"]));
        let orchestrator = make_orchestrator(answer.clone(), intent, rewrite).await;

        let (setup, rx) = orchestrator
            .run_turn(vec![ChatMessage::user("/search flow")])
            .await
            .unwrap();

        assert_eq!(setup.tool_outcomes.len(), 1);
        assert!(setup.tool_outcomes[0].success);
        assert_eq!(collect(rx).await, "Here are your results.");
        let requests = answer.requests();
        let system = requests.last().unwrap().system.clone().unwrap();
        assert!(system.contains("## Tool Results"));
        assert!(system.contains("search_knowledge"));
    }

    #[tokio::test]
    async fn test_model_directed_tool_call_appended_to_stream() {
        let answer = Arc::new(
            MockChatModel::new(vec!["Let me check. "])
                .with_tool_call("search_knowledge", serde_json::json!({"query": "flow"})),
        );
        let intent = Arc::new(MockChatModel::new(vec![INTENT_CHAT]));
        let rewrite = Arc::new(MockChatModel::new(vec!["flow deep work"]));
        let orchestrator = make_orchestrator(answer.clone(), intent, rewrite).await;

        let (_, rx) = orchestrator
            .run_turn(vec![ChatMessage::user("look up flow for me")])
            .await
            .unwrap();
        let text = collect(rx).await;
        assert!(text.starts_with("Let me check. "));
        // The dispatched tool's formatted output rides the same stream
        assert!(text.contains("search_knowledge"));
        assert!(text.contains("CORE/flow.md"));

        // The model was offered the registry as function declarations
        let requests = answer.requests();
        assert!(!requests.last().unwrap().tools.is_empty());
    }

    #[tokio::test]
    async fn test_missing_user_message_is_validation_error() {
        let answer = Arc::new(MockChatModel::new(vec![]));
        let intent = Arc::new(MockChatModel::new(vec![]));
        let rewrite = Arc::new(MockChatModel::new(vec![]));
        let orchestrator = make_orchestrator(answer, intent, rewrite).await;

        let result = orchestrator
            .run_turn(vec![ChatMessage::assistant("hello")])
            .await;
        assert!(matches!(
            result.map(|_| ()),
            Err(AppError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_degraded_retrieval_noted_in_opening() {
        use async_trait::async_trait;
        use loreforge_common::embeddings::Embedder;

        // An embedder that always fails makes retrieval fail while the
        // rest of the turn proceeds
        struct FailingEmbedder;
        #[async_trait]
        impl Embedder for FailingEmbedder {
            async fn embed(&self, _text: &str) -> loreforge_common::errors::Result<Vec<f32>> {
                Err(AppError::unavailable("embedder", "down"))
            }
            async fn embed_batch(
                &self,
                _texts: &[String],
            ) -> loreforge_common::errors::Result<Vec<Vec<f32>>> {
                Err(AppError::unavailable("embedder", "down"))
            }
            fn model_name(&self) -> &str {
                "failing"
            }
            fn dimension(&self) -> usize {
                8
            }
        }

        let answer = Arc::new(MockChatModel::new(vec!["The answer."]));
        let intent = Arc::new(MockChatModel::new(vec![INTENT_SEARCH]));
        let rewrite = Arc::new(MockChatModel::new(vec![]));
        let cache = Arc::new(MemoryCache::new());
        let rewriter = QueryRewriter::new(rewrite, cache.clone(), 3600);
        let engine = Arc::new(RetrievalEngine::new(
            Arc::new(FailingEmbedder),
            Arc::new(MemoryVectorStore::new()),
            None,
            cache,
            answer.clone(),
            Arc::new(NoopReranker),
            rewriter,
            RetrievalConfig::default(),
        ));
        let tools = Arc::new(ToolDispatcher::new(&ToolsConfig::default(), engine.clone()));
        let orchestrator = ChatOrchestrator::new(
            answer,
            intent,
            engine,
            tools,
            ChatConfig::default(),
        );

        let (setup, rx) = orchestrator
            .run_turn(vec![ChatMessage::user("what is flow?")])
            .await
            .unwrap();

        assert!(setup.citations.is_empty());
        let text = collect(rx).await;
        assert!(text.starts_with(NOTE_DEGRADED));
        assert!(text.ends_with("The answer."));
    }
}
