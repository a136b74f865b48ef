//! Query rewriting and entity extraction
//!
//! Both are short LLM calls, cached by query hash so repeated questions
//! skip the model entirely.

use loreforge_common::cache::{keys, CacheStore, CacheStoreExt};
use loreforge_common::errors::Result;
use loreforge_common::llm::{parse_llm_json, ChatModel, ChatRequest};
use std::sync::Arc;
use tracing::debug;

const REWRITE_SYSTEM_PROMPT: &str = "Rewrite the user's question so it is rich in \
searchable keywords while preserving intent. Respond with a single line \
containing only the rewritten query.";

const ENTITY_SYSTEM_PROMPT: &str = "Extract the named entities and key concepts \
from the user's question. Respond with only a JSON array of strings, \
e.g. [\"flow\", \"chess\"].";

/// Cached LLM query rewriting
pub struct QueryRewriter {
    llm: Arc<dyn ChatModel>,
    cache: Arc<dyn CacheStore>,
    ttl_secs: u64,
}

impl QueryRewriter {
    pub fn new(llm: Arc<dyn ChatModel>, cache: Arc<dyn CacheStore>, ttl_secs: u64) -> Self {
        Self {
            llm,
            cache,
            ttl_secs,
        }
    }

    /// Rewrite a query for keyword richness; cached for about an hour
    pub async fn rewrite(&self, query: &str) -> Result<String> {
        let key = keys::query_rewrite(query);
        if let Some(cached) = self.cache.get_json::<String>(&key).await? {
            loreforge_common::metrics::record_cache(true, "query-rewrite");
            return Ok(cached);
        }
        loreforge_common::metrics::record_cache(false, "query-rewrite");

        let response = self
            .llm
            .complete(
                ChatRequest::prompt(REWRITE_SYSTEM_PROMPT, query)
                    .with_temperature(0.2)
                    .with_max_tokens(200),
            )
            .await?;

        // Single line only; models sometimes add commentary after it
        let rewritten = response
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or(query)
            .trim_matches('"')
            .to_string();

        debug!(original = %query, rewritten = %rewritten, "Query rewritten");
        self.cache.put_json(&key, &rewritten, self.ttl_secs).await?;
        Ok(rewritten)
    }

    /// Extract entity names from a query for graph-mode retrieval
    pub async fn extract_entities(&self, query: &str) -> Result<Vec<String>> {
        let response = self
            .llm
            .complete(
                ChatRequest::prompt(ENTITY_SYSTEM_PROMPT, query)
                    .with_temperature(0.0)
                    .with_max_tokens(200),
            )
            .await?;

        let entities: Vec<String> = parse_llm_json(&response).unwrap_or_default();
        Ok(entities
            .into_iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loreforge_common::cache::MemoryCache;
    use loreforge_common::llm::MockChatModel;

    #[tokio::test]
    async fn test_rewrite_cached_after_first_call() {
        let llm = Arc::new(MockChatModel::new(vec!["flow state optimization techniques"]));
        let rewriter = QueryRewriter::new(llm.clone(), Arc::new(MemoryCache::new()), 3600);

        let first = rewriter.rewrite("how do I get into flow?").await.unwrap();
        let second = rewriter.rewrite("how do I get into flow?").await.unwrap();
        assert_eq!(first, "flow state optimization techniques");
        assert_eq!(first, second);
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_rewrite_takes_first_line() {
        let llm = Arc::new(MockChatModel::new(vec![
            "\"chess tactics endgame drills\"\nExplanation: I added keywords.",
        ]));
        let rewriter = QueryRewriter::new(llm, Arc::new(MemoryCache::new()), 3600);

        let rewritten = rewriter.rewrite("how to improve at chess").await.unwrap();
        assert_eq!(rewritten, "chess tactics endgame drills");
    }

    #[tokio::test]
    async fn test_extract_entities_with_prose() {
        let llm = Arc::new(MockChatModel::new(vec![
            "The entities are: [\"flow\", \"deep work\"] as requested.",
        ]));
        let rewriter = QueryRewriter::new(llm, Arc::new(MemoryCache::new()), 3600);

        let entities = rewriter.extract_entities("what links flow to deep work?").await.unwrap();
        assert_eq!(entities, vec!["flow", "deep work"]);
    }

    #[tokio::test]
    async fn test_extract_entities_garbage_yields_empty() {
        let llm = Arc::new(MockChatModel::new(vec!["no entities found"]));
        let rewriter = QueryRewriter::new(llm, Arc::new(MemoryCache::new()), 3600);

        let entities = rewriter.extract_entities("hello").await.unwrap();
        assert!(entities.is_empty());
    }
}
